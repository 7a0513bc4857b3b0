pub mod activity;
pub mod error;
pub mod event;
pub mod operation;
pub mod process;

pub use activity::{ActivityStatus, InstanceState};
pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use event::EventStreamMessage;
pub use operation::OperationKind;
pub use process::{InitialResult, ProcessId, ProcessRecord, ProcessStatus};
