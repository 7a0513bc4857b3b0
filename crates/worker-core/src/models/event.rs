use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::models::{ProcessId, ProcessStatus};

/// One message on the worker's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventStreamMessage {
    LogLines {
        process_id: ProcessId,
        lines: Vec<String>,
    },
    RequestResult {
        process_id: ProcessId,
        status: ProcessStatus,
        message: String,
        result: Option<serde_json::Value>,
    },
    SettingsUpdate {
        shutdown_timeout_seconds: u64,
    },
    CommandProgress {
        process_id: ProcessId,
        status: ProcessStatus,
        message: String,
    },
    Ping {
        sent_at: SystemTime,
    },
}

impl EventStreamMessage {
    pub fn process_id(&self) -> Option<ProcessId> {
        match self {
            EventStreamMessage::LogLines { process_id, .. }
            | EventStreamMessage::RequestResult { process_id, .. }
            | EventStreamMessage::CommandProgress { process_id, .. } => Some(*process_id),
            EventStreamMessage::SettingsUpdate { .. } | EventStreamMessage::Ping { .. } => None,
        }
    }
}
