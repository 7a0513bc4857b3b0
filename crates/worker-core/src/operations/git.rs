use serde::Deserialize;

use crate::models::{CoreError, CoreResult, OperationKind};
use crate::operations::Toolchain;
use crate::orchestration::OperationDescriptor;

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GitActionRequest {
    Status,
    Pull,
    Commit { message: String },
    Checkout { branch: String },
}

impl GitActionRequest {
    pub fn args(&self) -> CoreResult<Vec<String>> {
        let args: Vec<&str> = match self {
            GitActionRequest::Status => vec!["status", "--porcelain", "--branch"],
            GitActionRequest::Pull => vec!["pull", "--ff-only"],
            GitActionRequest::Commit { message } => {
                if message.trim().is_empty() {
                    return Err(invalid("commit message must not be empty"));
                }
                vec!["commit", "--all", "--message", message.as_str()]
            }
            GitActionRequest::Checkout { branch } => {
                if branch.trim().is_empty() || branch.starts_with('-') {
                    return Err(invalid(&format!("'{branch}' is not a valid branch name")));
                }
                vec!["checkout", branch.as_str()]
            }
        };
        Ok(args.into_iter().map(str::to_string).collect())
    }

    fn label(&self) -> &'static str {
        match self {
            GitActionRequest::Status => "status",
            GitActionRequest::Pull => "pull",
            GitActionRequest::Commit { .. } => "commit",
            GitActionRequest::Checkout { .. } => "checkout",
        }
    }
}

impl Toolchain {
    pub fn git_action(&self, request: GitActionRequest) -> CoreResult<OperationDescriptor> {
        let command = self.command(&self.git_program).args(request.args()?);
        Ok(self
            .command_descriptor(
                OperationKind::GitAction,
                command,
                format!("running git {}", request.label()),
            )?
            .cancelled_message(format!("git {} cancelled", request.label())))
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::validation(message).operation(OperationKind::GitAction)
}
