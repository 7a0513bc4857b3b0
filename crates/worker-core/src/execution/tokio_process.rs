use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessWaitFuture, RunningProcess,
    SpawnRequest,
};
use crate::models::{CoreErrorKind, CoreResult};

/// How long stream readers get after exit; descendants holding the pipes open
/// must not stall the caller.
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(250);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: SpawnRequest) -> CoreResult<Box<dyn RunningProcess>> {
        let command = &request.command;
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .process_group(0);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|error| {
            request.error(
                CoreErrorKind::ProcessFailure,
                format!("failed to spawn '{}': {error}", command.program.display()),
            )
        })?;

        let pid = child.id();
        tracing::debug!(
            pid = ?pid,
            command = %command.display(),
            operation = request.operation.as_str(),
            "spawned toolchain process"
        );

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            request,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    request: SpawnRequest,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let TokioRunningProcess {
            child,
            pid,
            request,
        } = *self;
        let child = child.into_inner().ok().flatten();

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                request.error(
                    CoreErrorKind::ProcessFailure,
                    "child process already consumed",
                )
            })?;
            let stdout = drain(child.stdout.take());
            let stderr = drain(child.stderr.take());

            let exited = async {
                match request.timeout {
                    Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
                    None => Some(child.wait().await),
                }
            };
            let cancelled = async {
                match &request.cancellation {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            let interrupted = tokio::select! {
                exited = exited => match exited {
                    Some(Ok(status)) => Ok(status),
                    Some(Err(error)) => Err(request.error(
                        CoreErrorKind::ProcessFailure,
                        format!("failed to wait for process: {error}"),
                    )),
                    None => Err(request.error(
                        CoreErrorKind::Timeout,
                        format!(
                            "process timed out after {}ms",
                            request.timeout.unwrap_or_default().as_millis()
                        ),
                    )),
                },
                _ = cancelled => Err(request.error(
                    CoreErrorKind::Cancelled,
                    "process terminated by cancellation",
                )),
            };

            let status = match interrupted {
                Ok(status) => status,
                Err(error) => {
                    if let Some(pid) = pid
                        && let Err(message) = kill_process_group(pid)
                    {
                        tracing::warn!(pid, %message, "failed to kill process group");
                    }
                    let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                    stdout.abort();
                    stderr.abort();
                    return Err(error);
                }
            };

            Ok(ProcessOutput {
                status: match status.code() {
                    Some(code) => ProcessExitStatus::ExitCode(code),
                    None => ProcessExitStatus::Terminated,
                },
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
            })
        })
    }
}

fn drain<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_WINDOW, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

/// SIGKILL to the whole group; a group that is already gone is not an error.
fn kill_process_group(pid: u32) -> Result<(), String> {
    let result = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if result == 0 {
        return Ok(());
    }

    let os_error = std::io::Error::last_os_error();
    if os_error.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(format!("failed to kill process group {pid}: {os_error}"))
}
