mod requests;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use worker_core::config::WorkerConfig;
use worker_core::execution::TokioProcessExecutor;
use worker_core::logging;
use worker_core::models::{CoreResult, InitialResult, ProcessRecord};
use worker_core::operations::{Toolchain, ToolchainRequest};
use worker_core::orchestration::{OperationRequest, ProcessManager, PublishMode};

use crate::requests::{ControlCommand, Input, Response, parse_line};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(
                kind = ?error.kind,
                message = %error.message,
                "invalid worker configuration"
            );
            return ExitCode::FAILURE;
        }
    };

    let manager = match ProcessManager::from_config(&config) {
        Ok(manager) => manager,
        Err(error) => {
            tracing::error!(
                kind = ?error.kind,
                message = %error.message,
                "failed to start orchestration core"
            );
            return ExitCode::FAILURE;
        }
    };
    let toolchain = Toolchain::new(Arc::new(TokioProcessExecutor), &config);

    tracing::info!(
        project_dir = %config.project_dir.display(),
        toolchain = %config.toolchain_program,
        shutdown_timeout_seconds = config.shutdown_timeout_seconds,
        "tenant worker started"
    );

    let (idle_tx, idle_rx) = oneshot::channel();
    let monitor = manager.spawn_idle_monitor(config.idle_check_interval(), move || {
        let _ = idle_tx.send(());
    });
    let heartbeat = manager.spawn_heartbeat(config.ping_interval());

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(out_rx));
    let forwarder = tokio::spawn(forward_events(manager.clone(), out_tx.clone()));
    let reader = tokio::spawn(read_requests(manager.clone(), toolchain, out_tx));

    tokio::select! {
        _ = idle_rx => tracing::info!("idle timeout elapsed; shutting down"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received; shutting down"),
    }

    reader.abort();
    forwarder.abort();
    heartbeat.abort();
    monitor.abort();
    // In-flight request tasks may still hold output senders; give them a moment only.
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    ExitCode::SUCCESS
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.recv().await {
        if stdout.write_all(line.as_bytes()).await.is_err()
            || stdout.write_all(b"\n").await.is_err()
            || stdout.flush().await.is_err()
        {
            tracing::warn!("stdout closed; dropping remaining output");
            return;
        }
    }
}

async fn forward_events(manager: ProcessManager, out: mpsc::UnboundedSender<String>) {
    let mut subscription = manager.subscribe();
    while let Some(event) = subscription.recv().await {
        match serde_json::to_string(event.as_ref()) {
            Ok(line) => {
                if out.send(line).is_err() {
                    return;
                }
            }
            Err(error) => tracing::warn!(%error, "failed to encode stream event"),
        }
    }
}

async fn read_requests(
    manager: ProcessManager,
    toolchain: Toolchain,
    out: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed; waiting for idle shutdown");
                return;
            }
            Err(error) => {
                tracing::error!(%error, "failed to read request line");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let manager = manager.clone();
        let toolchain = toolchain.clone();
        let out = out.clone();
        tokio::spawn(async move {
            let response = match parse_line(&line) {
                Ok(input) => handle(&manager, &toolchain, input).await,
                Err(error) => error.into(),
            };
            respond(&out, &response);
        });
    }
}

async fn handle(manager: &ProcessManager, toolchain: &Toolchain, input: Input) -> Response {
    match input {
        Input::Control(command) => {
            manager.track_activity();
            control(manager, command)
        }
        Input::Operation { request, wait } => match submit(manager, toolchain, request, wait).await
        {
            Ok(record) => Response::Record { record },
            Err(error) => error.into(),
        },
    }
}

fn control(manager: &ProcessManager, command: ControlCommand) -> Response {
    let outcome = match command {
        ControlCommand::Status { process_id } => {
            return match manager.status(process_id) {
                Ok(record) => Response::Record { record },
                Err(error) => error.into(),
            };
        }
        ControlCommand::Activity => {
            return Response::Activity {
                status: manager.activity_status(),
            };
        }
        ControlCommand::Cancel { process_id } => manager.cancel(process_id),
        ControlCommand::AdjustTimeout { seconds } => manager.adjust_shutdown_timeout(seconds),
    };

    match outcome {
        Ok(()) => Response::Ack,
        Err(error) => error.into(),
    }
}

async fn submit(
    manager: &ProcessManager,
    toolchain: &Toolchain,
    request: ToolchainRequest,
    wait: bool,
) -> CoreResult<ProcessRecord> {
    let operation = toolchain.descriptor(request)?;
    let process_id = manager.generate_process_id(InitialResult::message("queued"))?;
    let mode = if wait {
        PublishMode::WaitForCompletion
    } else {
        PublishMode::FireAndForget
    };

    manager
        .publish_event(
            OperationRequest {
                process_id,
                operation,
            },
            mode,
        )
        .await
}

fn respond(out: &mpsc::UnboundedSender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(error) => tracing::warn!(%error, "failed to encode response"),
    }
}
