pub mod activity;
pub mod broadcaster;
pub mod executor;
pub mod operation;
pub mod process_manager;
pub mod result_store;

pub use activity::{ActivityTracker, Clock, ManualClock, SystemClock, spawn_idle_monitor};
pub use broadcaster::{EventBroadcaster, PublishReport, SubscriberId, Subscription};
pub use executor::{
    CancelOutcome, CancellationToken, SequentialTaskExecutor, Work, WorkFuture, WorkHandle,
    WorkOutcome,
};
pub use operation::{
    OperationContext, OperationDescriptor, OperationFn, OperationFuture, OperationRequest,
    PublishMode,
};
pub use process_manager::ProcessManager;
pub use result_store::BoundedResultStore;
