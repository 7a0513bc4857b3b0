use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::models::{
    ActivityStatus, CoreError, CoreErrorKind, CoreResult, EventStreamMessage, InitialResult,
    InstanceState, OperationKind, ProcessId, ProcessRecord, ProcessStatus,
};
use crate::orchestration::{
    ActivityTracker, BoundedResultStore, CancelOutcome, EventBroadcaster, OperationContext,
    OperationDescriptor, OperationRequest, PublishMode, SequentialTaskExecutor, Subscription,
    Work, WorkHandle, WorkOutcome, spawn_idle_monitor,
};

type ResultStore = BoundedResultStore<ProcessId, ProcessRecord>;

/// Public facade over the orchestration core.
///
/// Issues process ids, funnels every operation through the single sequential
/// executor, records outcomes in the bounded store and announces each status
/// transition on the event stream.
#[derive(Clone)]
pub struct ProcessManager {
    next_id: Arc<AtomicU64>,
    store: Arc<ResultStore>,
    executor: SequentialTaskExecutor,
    broadcaster: EventBroadcaster,
    tracker: Arc<ActivityTracker>,
    cancelled_messages: Arc<Mutex<HashMap<ProcessId, String>>>,
    /// Serialises submission against cancellation so each sees the other whole.
    submissions: Arc<Mutex<()>>,
}

impl ProcessManager {
    /// Must be called from within a tokio runtime; the executor worker is spawned here.
    pub fn new(
        result_capacity: usize,
        broadcaster: EventBroadcaster,
        tracker: Arc<ActivityTracker>,
    ) -> CoreResult<Self> {
        Ok(Self {
            next_id: Arc::new(AtomicU64::new(1)),
            store: Arc::new(BoundedResultStore::new(result_capacity)?),
            executor: SequentialTaskExecutor::new(),
            broadcaster,
            tracker,
            cancelled_messages: Arc::new(Mutex::new(HashMap::new())),
            submissions: Arc::new(Mutex::new(())),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> CoreResult<Self> {
        config.validate()?;
        let broadcaster = EventBroadcaster::new(config.subscriber_buffer)?;
        let tracker = Arc::new(ActivityTracker::new(config.shutdown_timeout_seconds)?);
        Self::new(config.result_capacity, broadcaster, tracker)
    }

    pub fn generate_process_id(&self, initial: InitialResult) -> CoreResult<ProcessId> {
        let raw = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
            .map_err(|_| CoreError::internal("process id space exhausted"))?;
        let id = ProcessId(raw);

        if let Some(evicted) = self.store.put(id, ProcessRecord::queued(id, initial)) {
            tracing::debug!(
                process_id = %id,
                evicted = %evicted,
                "result store full; oldest record evicted"
            );
        }
        Ok(id)
    }

    pub async fn publish_event(
        &self,
        request: OperationRequest,
        mode: PublishMode,
    ) -> CoreResult<ProcessRecord> {
        self.tracker.track_activity();
        if self.tracker.instance_state() == InstanceState::ShuttingDown {
            return Err(CoreError::validation(
                "worker instance is shutting down; no new work is accepted",
            )
            .process(request.process_id));
        }

        let OperationRequest {
            process_id: id,
            operation,
        } = request;
        let kind = operation.kind;

        let (queued, handle) = self.submit(id, operation)?;
        tracing::info!(
            process_id = %id,
            operation = kind.as_str(),
            mode = ?mode,
            "operation queued"
        );

        match mode {
            PublishMode::FireAndForget => Ok(queued),
            PublishMode::WaitForCompletion => {
                let outcome = handle.wait().await;
                match self.status(id) {
                    Err(error) if error.kind == CoreErrorKind::NotFound => {
                        tracing::debug!(
                            process_id = %id,
                            "record evicted while running; rebuilding from outcome"
                        );
                        Ok(settled_record(queued, kind, &outcome))
                    }
                    recorded => recorded,
                }
            }
        }
    }

    /// Claims a `Queued` record for `operation` and enqueues it. Nothing is
    /// touched unless the record is queued and has no pending work.
    fn submit(
        &self,
        id: ProcessId,
        operation: OperationDescriptor,
    ) -> CoreResult<(ProcessRecord, WorkHandle)> {
        let kind = operation.kind;
        let _submissions = lock_unit(&self.submissions);

        let current = self.status(id)?;
        if current.status != ProcessStatus::Queued || self.executor.is_pending(id) {
            return Err(rejected_submission(id, kind, current.status));
        }

        let queued = self
            .store
            .update(&id, |record| {
                record.operation = Some(kind);
                record.clone()
            })
            .ok_or_else(|| CoreError::not_found(id))?;
        lock_messages(&self.cancelled_messages).insert(id, operation.cancelled_message.clone());

        match self.executor.enqueue(id, self.orchestrate(id, operation)) {
            Ok(handle) => Ok((queued, handle)),
            Err(error) => {
                lock_messages(&self.cancelled_messages).remove(&id);
                let _ = self
                    .store
                    .update(&id, |record| record.operation = current.operation);
                Err(error.operation(kind))
            }
        }
    }

    pub fn status(&self, id: ProcessId) -> CoreResult<ProcessRecord> {
        self.store.try_get(&id).ok_or_else(|| CoreError::not_found(id))
    }

    /// Typed view of the stored result payload.
    pub fn status_as<T: DeserializeOwned>(&self, id: ProcessId) -> CoreResult<Option<T>> {
        self.status(id)?.result_as()
    }

    pub fn cancel(&self, id: ProcessId) -> CoreResult<()> {
        let _submissions = lock_unit(&self.submissions);
        let record = self.status(id)?;
        if record.status.is_terminal() {
            return Err(already_terminal(id, record.status));
        }

        let mut dequeued = None;
        let outcome = self.executor.cancel_with(id, || {
            let message = lock_messages(&self.cancelled_messages)
                .remove(&id)
                .unwrap_or_else(|| "cancelled before start".to_string());
            dequeued = Some(transition(
                &self.store,
                &self.broadcaster,
                id,
                ProcessStatus::Cancelled,
                message,
                None,
            ));
        });

        let applied = match outcome {
            CancelOutcome::Signalled => return Ok(()),
            CancelOutcome::Dequeued => dequeued.unwrap_or(Transition::Missing),
            CancelOutcome::Unknown => transition(
                &self.store,
                &self.broadcaster,
                id,
                ProcessStatus::Cancelled,
                "cancelled before submission".to_string(),
                None,
            ),
        };

        match applied {
            Transition::Rejected(current) => Err(already_terminal(id, current)),
            Transition::Applied | Transition::Missing => Ok(()),
        }
    }

    pub fn adjust_shutdown_timeout(&self, seconds: u64) -> CoreResult<()> {
        self.tracker.adjust_timeout(seconds)?;
        self.broadcaster.publish(EventStreamMessage::SettingsUpdate {
            shutdown_timeout_seconds: seconds,
        });
        Ok(())
    }

    pub fn track_activity(&self) {
        self.tracker.track_activity();
    }

    pub fn activity_status(&self) -> ActivityStatus {
        self.tracker.status()
    }

    pub fn tracker(&self) -> Arc<ActivityTracker> {
        self.tracker.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Idle monitor that also counts queued or running work as activity, so a
    /// long operation cannot idle the instance out from under itself.
    pub fn spawn_idle_monitor<F>(&self, interval: Duration, on_shutdown: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let executor = self.executor.clone();
        spawn_idle_monitor(
            self.tracker.clone(),
            interval,
            move || executor.is_busy(),
            on_shutdown,
        )
    }

    /// Publishes a `Ping` every `interval` so idle stream listeners can detect liveness.
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broadcaster.publish(EventStreamMessage::Ping {
                    sent_at: SystemTime::now(),
                });
            }
        })
    }

    /// Wraps one operation in the shared lifecycle: InProgress, run, terminal status.
    fn orchestrate(&self, id: ProcessId, operation: OperationDescriptor) -> Work {
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        let cancelled_messages = self.cancelled_messages.clone();
        let tracker = self.tracker.clone();

        Box::new(move |token| {
            Box::pin(async move {
                let OperationDescriptor {
                    kind,
                    in_progress_message,
                    cancelled_message,
                    run,
                } = operation;
                lock_messages(&cancelled_messages).remove(&id);

                if token.is_cancelled() {
                    transition(
                        &store,
                        &broadcaster,
                        id,
                        ProcessStatus::Cancelled,
                        cancelled_message.clone(),
                        None,
                    );
                    return Err(cancelled(id, kind, cancelled_message));
                }

                if let Transition::Rejected(current) = transition(
                    &store,
                    &broadcaster,
                    id,
                    ProcessStatus::InProgress,
                    in_progress_message,
                    None,
                ) {
                    tracing::warn!(
                        process_id = %id,
                        status = ?current,
                        "record already settled; operation skipped"
                    );
                    return Err(already_terminal(id, current).operation(kind));
                }
                tracing::info!(process_id = %id, operation = kind.as_str(), "operation started");

                let context = OperationContext::new(id, token.clone(), broadcaster.clone());
                let outcome = match tokio::spawn(async move { run(context).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(CoreError::internal(format!(
                        "operation terminated abnormally: {join_error}"
                    ))),
                }
                .map_err(|error| error.attribute(id, Some(kind)));

                let outcome = match outcome {
                    Ok(_) if token.is_cancelled() => Err(cancelled(id, kind, cancelled_message)),
                    Err(error)
                        if token.is_cancelled() || error.kind == CoreErrorKind::Cancelled =>
                    {
                        Err(cancelled(id, kind, cancelled_message))
                    }
                    outcome => outcome,
                };
                let (status, message, result) = settle(kind, &outcome);

                match &outcome {
                    Err(error) if status == ProcessStatus::Failed => tracing::warn!(
                        process_id = %id,
                        operation = kind.as_str(),
                        kind = ?error.kind,
                        message = %error.message,
                        "operation failed"
                    ),
                    _ => tracing::info!(
                        process_id = %id,
                        operation = kind.as_str(),
                        status = ?status,
                        "operation finished"
                    ),
                }

                transition(&store, &broadcaster, id, status, message, result);
                // The idle clock restarts when work finishes, not only when it arrives.
                tracker.track_activity();
                outcome
            })
        })
    }
}

enum Transition {
    Applied,
    /// The record was evicted; the event is still announced.
    Missing,
    Rejected(ProcessStatus),
}

/// Moves a record forward and announces the new status. Backward or
/// post-terminal moves are refused and leave the record untouched.
fn transition(
    store: &ResultStore,
    broadcaster: &EventBroadcaster,
    id: ProcessId,
    status: ProcessStatus,
    message: String,
    result: Option<serde_json::Value>,
) -> Transition {
    let applied = store.update(&id, |record| {
        if !record.status.can_transition_to(status) {
            return Err(record.status);
        }

        let now = SystemTime::now();
        record.status = status;
        record.message = message.clone();
        if result.is_some() {
            record.result = result.clone();
        }
        if status == ProcessStatus::InProgress {
            record.started_at = Some(now);
        }
        if status.is_terminal() {
            record.finished_at = Some(now);
        }
        Ok(record.result.clone())
    });

    let (outcome, result) = match applied {
        Some(Ok(stored)) => (Transition::Applied, stored),
        Some(Err(current)) => {
            tracing::debug!(
                process_id = %id,
                from = ?current,
                to = ?status,
                "status transition refused"
            );
            return Transition::Rejected(current);
        }
        None => {
            tracing::debug!(
                process_id = %id,
                to = ?status,
                "record evicted before status transition"
            );
            (Transition::Missing, result)
        }
    };

    let event = if status.is_terminal() {
        EventStreamMessage::RequestResult {
            process_id: id,
            status,
            message,
            result,
        }
    } else {
        EventStreamMessage::CommandProgress {
            process_id: id,
            status,
            message,
        }
    };
    broadcaster.publish(event);
    outcome
}

fn rejected_submission(id: ProcessId, kind: OperationKind, status: ProcessStatus) -> CoreError {
    if status.is_terminal() {
        return already_terminal(id, status).operation(kind);
    }
    CoreError::validation(format!("process '{id}' has already been submitted"))
        .process(id)
        .operation(kind)
}

fn already_terminal(id: ProcessId, status: ProcessStatus) -> CoreError {
    CoreError::new(
        CoreErrorKind::AlreadyTerminal,
        format!("process '{id}' already finished with status '{status:?}'"),
    )
    .process(id)
}

fn cancelled(id: ProcessId, kind: OperationKind, message: String) -> CoreError {
    CoreError::new(CoreErrorKind::Cancelled, message)
        .process(id)
        .operation(kind)
}

/// Terminal status, message and payload for a finished work item.
fn settle(
    kind: OperationKind,
    outcome: &WorkOutcome,
) -> (ProcessStatus, String, Option<serde_json::Value>) {
    match outcome {
        Ok(value) => (
            ProcessStatus::Completed,
            format!("{} completed", kind.as_str()),
            Some(value.clone()),
        ),
        Err(error) if error.kind == CoreErrorKind::Cancelled => {
            (ProcessStatus::Cancelled, error.message.clone(), None)
        }
        Err(error) => (ProcessStatus::Failed, error.message.clone(), None),
    }
}

fn settled_record(
    mut record: ProcessRecord,
    kind: OperationKind,
    outcome: &WorkOutcome,
) -> ProcessRecord {
    let (status, message, result) = settle(kind, outcome);
    record.status = status;
    record.message = message;
    record.result = result;
    record.finished_at = Some(SystemTime::now());
    record
}

fn lock_unit(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_messages(
    messages: &Mutex<HashMap<ProcessId, String>>,
) -> MutexGuard<'_, HashMap<ProcessId, String>> {
    messages.lock().unwrap_or_else(PoisonError::into_inner)
}
