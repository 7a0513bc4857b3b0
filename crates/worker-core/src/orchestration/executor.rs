use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};

use crate::models::{CoreError, CoreErrorKind, CoreResult, ProcessId};

pub type WorkOutcome = CoreResult<serde_json::Value>;

pub type WorkFuture = Pin<Box<dyn Future<Output = WorkOutcome> + Send>>;

pub type Work = Box<dyn FnOnce(CancellationToken) -> WorkFuture + Send>;

/// Cooperative cancellation signal handed to every work item.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once `cancel` has been called on any clone of this token.
    pub async fn cancelled(&self) {
        let mut receiver = self.flag.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelOutcome {
    /// The item had not started and will never run.
    Dequeued,
    /// The item is running and its token has been tripped.
    Signalled,
    /// Nothing with that id is queued or running.
    Unknown,
}

/// Handle to one enqueued work item.
pub struct WorkHandle {
    id: ProcessId,
    completion: oneshot::Receiver<WorkOutcome>,
}

impl WorkHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub async fn wait(self) -> WorkOutcome {
        let id = self.id;
        self.completion.await.unwrap_or_else(|_| {
            Err(CoreError::internal(format!(
                "executor dropped work item '{id}' without reporting an outcome"
            ))
            .process(id))
        })
    }
}

struct WorkItem {
    id: ProcessId,
    sequence: u64,
    work: Work,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SlotState {
    Queued,
    Running,
}

struct Slot {
    sequence: u64,
    state: SlotState,
    token: CancellationToken,
    completion: Option<oneshot::Sender<WorkOutcome>>,
}

#[derive(Default)]
struct SlotTable {
    next_sequence: u64,
    slots: HashMap<ProcessId, Slot>,
    running: Option<ProcessId>,
}

/// Single-worker FIFO executor: at most one work item body runs at a time.
///
/// Items run in submission order. A failing or panicking item is reported
/// through its handle and the worker moves on to the next one.
#[derive(Clone)]
pub struct SequentialTaskExecutor {
    queue: mpsc::UnboundedSender<WorkItem>,
    table: Arc<Mutex<SlotTable>>,
}

impl SequentialTaskExecutor {
    /// Spawns the worker loop; must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let table = Arc::new(Mutex::new(SlotTable::default()));
        tokio::spawn(run_worker(receiver, table.clone()));
        Self { queue, table }
    }

    pub fn enqueue(&self, id: ProcessId, work: Work) -> CoreResult<WorkHandle> {
        let (completion, receiver) = oneshot::channel();
        let mut table = lock_table(&self.table);
        if table.slots.contains_key(&id) {
            return Err(CoreError::validation(format!(
                "process '{id}' already has queued or running work"
            ))
            .process(id));
        }

        let sequence = table.next_sequence;
        table.next_sequence = table.next_sequence.wrapping_add(1);

        self.queue
            .send(WorkItem { id, sequence, work })
            .map_err(|_| CoreError::internal("executor worker has stopped").process(id))?;

        table.slots.insert(
            id,
            Slot {
                sequence,
                state: SlotState::Queued,
                token: CancellationToken::new(),
                completion: Some(completion),
            },
        );
        tracing::debug!(process_id = %id, queued = table.slots.len(), "work item enqueued");

        Ok(WorkHandle {
            id,
            completion: receiver,
        })
    }

    pub async fn enqueue_and_wait(&self, id: ProcessId, work: Work) -> WorkOutcome {
        self.enqueue(id, work)?.wait().await
    }

    pub fn cancel(&self, id: ProcessId) -> CancelOutcome {
        self.cancel_with(id, || {})
    }

    /// Like [`cancel`](Self::cancel), running `on_dequeued` for a not-yet-started
    /// item before its handle resolves.
    pub fn cancel_with(&self, id: ProcessId, on_dequeued: impl FnOnce()) -> CancelOutcome {
        let completion = {
            let mut table = lock_table(&self.table);
            let Some(slot) = table.slots.get(&id) else {
                return CancelOutcome::Unknown;
            };

            slot.token.cancel();
            if slot.state == SlotState::Running {
                tracing::info!(process_id = %id, "cancellation signalled to running work item");
                return CancelOutcome::Signalled;
            }

            table.slots.remove(&id).and_then(|mut slot| slot.completion.take())
        };

        tracing::info!(process_id = %id, "queued work item cancelled before start");
        on_dequeued();
        if let Some(completion) = completion {
            let _ = completion.send(Err(cancelled_before_start(id)));
        }
        CancelOutcome::Dequeued
    }

    /// Whether `id` has an item that is queued or running.
    pub fn is_pending(&self, id: ProcessId) -> bool {
        lock_table(&self.table).slots.contains_key(&id)
    }

    pub fn is_busy(&self) -> bool {
        !lock_table(&self.table).slots.is_empty()
    }

    pub fn running(&self) -> Option<ProcessId> {
        lock_table(&self.table).running
    }

    pub fn queued_len(&self) -> usize {
        let table = lock_table(&self.table);
        table
            .slots
            .values()
            .filter(|slot| slot.state == SlotState::Queued)
            .count()
    }
}

impl Default for SequentialTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<WorkItem>, table: Arc<Mutex<SlotTable>>) {
    while let Some(WorkItem { id, sequence, work }) = receiver.recv().await {
        let Some(token) = begin(&table, id, sequence) else {
            continue;
        };

        let started = Instant::now();
        tracing::debug!(process_id = %id, "work item started");

        let body = tokio::spawn(async move { work(token).await });
        let outcome = match body.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(CoreError::internal(format!(
                "work item '{id}' terminated abnormally: {join_error}"
            ))
            .process(id)),
        };

        let completion = finish(&table, id, sequence);
        tracing::debug!(
            process_id = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "work item finished"
        );
        if let Some(completion) = completion {
            let _ = completion.send(outcome);
        }
    }
}

/// Marks the item running unless it was cancelled while queued.
fn begin(table: &Mutex<SlotTable>, id: ProcessId, sequence: u64) -> Option<CancellationToken> {
    let mut table = lock_table(table);
    let slot = table.slots.get_mut(&id)?;
    if slot.sequence != sequence {
        return None;
    }
    slot.state = SlotState::Running;
    let token = slot.token.clone();
    table.running = Some(id);
    Some(token)
}

fn finish(
    table: &Mutex<SlotTable>,
    id: ProcessId,
    sequence: u64,
) -> Option<oneshot::Sender<WorkOutcome>> {
    let mut table = lock_table(table);
    table.running = None;
    match table.slots.get(&id) {
        Some(slot) if slot.sequence == sequence => {
            table.slots.remove(&id).and_then(|mut slot| slot.completion.take())
        }
        _ => None,
    }
}

fn lock_table(table: &Mutex<SlotTable>) -> MutexGuard<'_, SlotTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancelled_before_start(id: ProcessId) -> CoreError {
    CoreError::new(
        CoreErrorKind::Cancelled,
        format!("work item '{id}' cancelled before it started"),
    )
    .process(id)
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_for_every_clone() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_tripped() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
