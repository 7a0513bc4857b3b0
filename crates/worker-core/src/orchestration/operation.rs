use std::future::Future;
use std::pin::Pin;

use crate::models::{CoreResult, EventStreamMessage, OperationKind, ProcessId};
use crate::orchestration::{CancellationToken, EventBroadcaster};

pub type OperationFuture = Pin<Box<dyn Future<Output = CoreResult<serde_json::Value>> + Send>>;

pub type OperationFn = Box<dyn FnOnce(OperationContext) -> OperationFuture + Send>;

/// Everything the shared orchestration needs to know about one request kind.
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub in_progress_message: String,
    pub cancelled_message: String,
    pub(crate) run: OperationFn,
}

impl OperationDescriptor {
    pub fn new<F, Fut>(kind: OperationKind, run: F) -> Self
    where
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<serde_json::Value>> + Send + 'static,
    {
        Self {
            kind,
            in_progress_message: format!("{} in progress", kind.as_str()),
            cancelled_message: format!("{} cancelled", kind.as_str()),
            run: Box::new(move |context| Box::pin(run(context)) as OperationFuture),
        }
    }

    pub fn in_progress_message(mut self, message: impl Into<String>) -> Self {
        self.in_progress_message = message.into();
        self
    }

    pub fn cancelled_message(mut self, message: impl Into<String>) -> Self {
        self.cancelled_message = message.into();
        self
    }
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("kind", &self.kind)
            .field("in_progress_message", &self.in_progress_message)
            .field("cancelled_message", &self.cancelled_message)
            .finish_non_exhaustive()
    }
}

/// Handed to a running operation: its identity, cancellation signal and log sink.
#[derive(Clone)]
pub struct OperationContext {
    process_id: ProcessId,
    token: CancellationToken,
    broadcaster: EventBroadcaster,
}

impl OperationContext {
    pub(crate) fn new(
        process_id: ProcessId,
        token: CancellationToken,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            process_id,
            token,
            broadcaster,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn log_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return;
        }
        self.broadcaster.publish(EventStreamMessage::LogLines {
            process_id: self.process_id,
            lines,
        });
    }
}

/// A request to run `operation` under an id issued by `generate_process_id`.
#[derive(Debug)]
pub struct OperationRequest {
    pub process_id: ProcessId,
    pub operation: OperationDescriptor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishMode {
    FireAndForget,
    WaitForCompletion,
}
