use serde::{Deserialize, Serialize};

use worker_core::models::{ActivityStatus, CoreError, CoreErrorKind, ProcessId, ProcessRecord};
use worker_core::operations::ToolchainRequest;

/// One line of stdin.
#[derive(Debug, PartialEq)]
pub enum Input {
    Control(ControlCommand),
    Operation { request: ToolchainRequest, wait: bool },
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Status { process_id: ProcessId },
    Cancel { process_id: ProcessId },
    Activity,
    AdjustTimeout { seconds: u64 },
}

#[derive(Deserialize)]
struct OperationInput {
    #[serde(default)]
    wait: bool,
    #[serde(flatten)]
    request: ToolchainRequest,
}

pub fn parse_line(line: &str) -> Result<Input, CoreError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|error| CoreError::validation(format!("request is not valid JSON: {error}")))?;

    if value.get("command").is_some() {
        return serde_json::from_value(value)
            .map(Input::Control)
            .map_err(|error| CoreError::validation(format!("malformed command: {error}")));
    }

    let OperationInput { wait, request } = serde_json::from_value(value)
        .map_err(|error| CoreError::validation(format!("malformed operation request: {error}")))?;
    Ok(Input::Operation { request, wait })
}

/// One line of stdout besides broadcast events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Record { record: ProcessRecord },
    Activity { status: ActivityStatus },
    Ack,
    Error { kind: CoreErrorKind, message: String },
}

impl From<CoreError> for Response {
    fn from(error: CoreError) -> Self {
        Response::Error {
            kind: error.kind,
            message: error.message,
        }
    }
}
