use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, CoreResult, OperationKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl Display for ProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .strip_prefix('p')
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(ProcessId)
            .ok_or_else(|| CoreError::validation(format!("malformed process id '{value}'")))
    }
}

impl Serialize for ProcessId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }

    /// Position in the lifecycle; a transition is legal only when it moves forward.
    fn rank(self) -> u8 {
        match self {
            ProcessStatus::Queued => 0,
            ProcessStatus::InProgress => 1,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled => 2,
        }
    }

    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub operation: Option<OperationKind>,
    pub status: ProcessStatus,
    pub message: String,
    pub result: Option<serde_json::Value>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl ProcessRecord {
    pub fn queued(id: ProcessId, initial: InitialResult) -> Self {
        Self {
            id,
            operation: None,
            status: ProcessStatus::Queued,
            message: initial.message,
            result: initial.result,
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Decodes the stored payload into the caller's result type.
    pub fn result_as<T: DeserializeOwned>(&self) -> CoreResult<Option<T>> {
        self.result
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("result payload for '{}' has unexpected shape: {error}", self.id),
                )
                .process(self.id)
            })
    }
}

/// What a freshly issued process id carries until its work starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialResult {
    pub message: String,
    pub result: Option<serde_json::Value>,
}

impl InitialResult {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            result: None,
        }
    }
}
