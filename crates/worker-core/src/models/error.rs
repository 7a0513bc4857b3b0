use serde::Serialize;

use crate::models::{OperationKind, ProcessId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreErrorKind {
    NotFound,
    AlreadyTerminal,
    Validation,
    Operation,
    InvalidConfiguration,
    Cancelled,
    Timeout,
    ProcessFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub process: Option<ProcessId>,
    pub operation: Option<OperationKind>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            process: None,
            operation: None,
            kind,
            message: message.into(),
        }
    }

    pub fn process(mut self, process: ProcessId) -> Self {
        self.process = Some(process);
        self
    }

    pub fn operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Fills in attribution the error does not already carry.
    pub fn attribute(self, process: ProcessId, operation: Option<OperationKind>) -> Self {
        Self {
            process: self.process.or(Some(process)),
            operation: self.operation.or(operation),
            kind: self.kind,
            message: self.message,
        }
    }

    pub fn not_found(process: ProcessId) -> Self {
        Self::new(
            CoreErrorKind::NotFound,
            format!("unknown or evicted process id '{process}'"),
        )
        .process(process)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Validation, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidConfiguration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
