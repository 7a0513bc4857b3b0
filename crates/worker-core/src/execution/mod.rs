//! Child-process plumbing for command-backed operations.
//!
//! A [`SpawnRequest`] names the command plus the process it runs for; a
//! [`ProcessExecutor`] turns it into a [`RunningProcess`] whose `wait` ends on
//! exit, timeout or cancellation, whichever comes first.

pub mod output;
pub mod tokio_process;

pub use output::{MAX_STREAM_BYTES, normalize_stream, stream_lines};
pub use tokio_process::TokioProcessExecutor;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, CoreResult, OperationKind, ProcessId};
use crate::orchestration::CancellationToken;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = CoreResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// Rendering for log lines; not shell-escaped.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn validate(&self, operation: OperationKind) -> CoreResult<()> {
        match self.problem() {
            Some(problem) => Err(CoreError::validation(problem).operation(operation)),
            None => Ok(()),
        }
    }

    fn problem(&self) -> Option<&'static str> {
        let has_nul = |text: &str| text.contains('\0');

        if self.program.as_os_str().is_empty() {
            return Some("command program path must not be empty");
        }
        if self.args.iter().any(|arg| arg.is_empty() || has_nul(arg)) {
            return Some("command args must be non-empty and free of NUL bytes");
        }
        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || has_nul(key) || has_nul(value))
        {
            return Some("environment entries must have a key and no NUL bytes");
        }
        None
    }
}

/// One command to run on behalf of a process.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub operation: OperationKind,
    pub process: Option<ProcessId>,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
    /// Tripping the token kills the process group while waiting.
    pub cancellation: Option<CancellationToken>,
}

impl SpawnRequest {
    pub fn new(operation: OperationKind, command: CommandSpec) -> Self {
        Self {
            operation,
            process: None,
            command,
            timeout: None,
            cancellation: None,
        }
    }

    pub fn process(mut self, process: ProcessId) -> Self {
        self.process = Some(process);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.command.validate(self.operation)?;
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(self.error(
                CoreErrorKind::Validation,
                "timeout must be greater than zero when provided",
            ));
        }
        Ok(())
    }

    /// An error attributed to this request's operation and process.
    pub fn error(&self, kind: CoreErrorKind, message: impl Into<String>) -> CoreError {
        let error = CoreError::new(kind, message).operation(self.operation);
        match self.process {
            Some(process) => error.process(process),
            None => error,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    /// Ended by a signal.
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> CoreResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: SpawnRequest,
) -> CoreResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}
