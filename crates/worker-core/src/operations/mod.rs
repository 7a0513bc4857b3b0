//! Concrete operations run against the tenant's project checkout.
//!
//! Each request kind turns into an [`OperationDescriptor`] that the
//! [`ProcessManager`](crate::orchestration::ProcessManager) drives through the
//! shared lifecycle. Command-backed kinds go through a [`ProcessExecutor`] so
//! tests can substitute their own.

pub mod build_model;
pub mod files;
pub mod git;

pub use build_model::BuildModelRequest;
pub use files::FileActionRequest;
pub use git::GitActionRequest;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::WorkerConfig;
use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessExitStatus, SpawnRequest, normalize_stream,
    spawn_validated, stream_lines,
};
use crate::models::{CoreError, CoreErrorKind, CoreResult, OperationKind};
use crate::orchestration::{OperationContext, OperationDescriptor};

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ToolchainRequest {
    BuildModel(BuildModelRequest),
    GitAction(GitActionRequest),
    FileAction(FileActionRequest),
}

impl ToolchainRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            ToolchainRequest::BuildModel(_) => OperationKind::BuildModel,
            ToolchainRequest::GitAction(_) => OperationKind::GitAction,
            ToolchainRequest::FileAction(_) => OperationKind::FileAction,
        }
    }
}

/// The single external toolchain instance this worker drives.
#[derive(Clone)]
pub struct Toolchain {
    executor: Arc<dyn ProcessExecutor>,
    project_dir: PathBuf,
    toolchain_program: String,
    git_program: String,
    command_timeout: Option<Duration>,
}

impl Toolchain {
    pub fn new(executor: Arc<dyn ProcessExecutor>, config: &WorkerConfig) -> Self {
        Self {
            executor,
            project_dir: config.project_dir.clone(),
            toolchain_program: config.toolchain_program.clone(),
            git_program: config.git_program.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    pub fn project_dir(&self) -> &PathBuf {
        &self.project_dir
    }

    pub fn descriptor(&self, request: ToolchainRequest) -> CoreResult<OperationDescriptor> {
        match request {
            ToolchainRequest::BuildModel(request) => self.build_model(request),
            ToolchainRequest::GitAction(request) => self.git_action(request),
            ToolchainRequest::FileAction(request) => self.file_action(request),
        }
    }

    fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program).working_dir(self.project_dir.clone())
    }

    fn command_descriptor(
        &self,
        kind: OperationKind,
        command: CommandSpec,
        in_progress_message: String,
    ) -> CoreResult<OperationDescriptor> {
        command.validate(kind)?;
        let executor = self.executor.clone();
        let timeout = self.command_timeout;

        Ok(OperationDescriptor::new(kind, move |context| {
            run_command(executor, kind, command, timeout, context)
        })
        .in_progress_message(in_progress_message))
    }
}

/// Runs one command to completion, forwarding its output as log lines.
async fn run_command(
    executor: Arc<dyn ProcessExecutor>,
    kind: OperationKind,
    command: CommandSpec,
    timeout: Option<Duration>,
    context: OperationContext,
) -> CoreResult<serde_json::Value> {
    let rendered = command.display();
    context.log_lines([format!("$ {rendered}")]);

    let request = SpawnRequest::new(kind, command)
        .process(context.process_id())
        .cancellation(context.token().clone())
        .timeout(timeout);
    let running = spawn_validated(executor.as_ref(), request)?;
    tracing::debug!(
        process_id = %context.process_id(),
        pid = ?running.pid(),
        "waiting for command"
    );
    let output = running.wait().await?;

    let stdout = normalize_stream(&output.stdout);
    let stderr = normalize_stream(&output.stderr);
    context.log_lines(stream_lines(stdout.as_deref()));
    context.log_lines(stream_lines(stderr.as_deref()));

    match output.status {
        ProcessExitStatus::ExitCode(0) => Ok(json!({
            "exit_code": 0,
            "stdout": stdout,
            "stderr": stderr,
        })),
        ProcessExitStatus::ExitCode(code) => {
            let detail = stream_lines(stderr.as_deref())
                .pop()
                .or_else(|| stream_lines(stdout.as_deref()).pop())
                .unwrap_or_default();
            Err(CoreError::new(
                CoreErrorKind::Operation,
                format!("'{rendered}' exited with status {code}: {detail}")
                    .trim_end_matches([' ', ':'])
                    .to_string(),
            )
            .operation(kind))
        }
        ProcessExitStatus::Terminated => Err(CoreError::new(
            CoreErrorKind::Operation,
            format!("'{rendered}' was terminated by a signal"),
        )
        .operation(kind)),
    }
}
