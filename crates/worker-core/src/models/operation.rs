use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    BuildModel,
    GitAction,
    FileAction,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::BuildModel => "build_model",
            OperationKind::GitAction => "git_action",
            OperationKind::FileAction => "file_action",
        }
    }
}
