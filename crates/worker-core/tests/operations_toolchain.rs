#![cfg(unix)]

use std::sync::Arc;

use serde_json::json;
use worker_core::config::WorkerConfig;
use worker_core::execution::TokioProcessExecutor;
use worker_core::models::{
    CoreErrorKind, EventStreamMessage, InitialResult, ProcessRecord, ProcessStatus,
};
use worker_core::operations::{
    BuildModelRequest, FileActionRequest, GitActionRequest, Toolchain, ToolchainRequest,
};
use worker_core::orchestration::{OperationRequest, ProcessManager, PublishMode};

struct Harness {
    _dir: tempfile::TempDir,
    manager: ProcessManager,
    toolchain: Toolchain,
}

fn harness(toolchain_program: &str, git_program: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        project_dir: dir.path().to_path_buf(),
        toolchain_program: toolchain_program.to_string(),
        git_program: git_program.to_string(),
        command_timeout_seconds: Some(10),
        ..WorkerConfig::default()
    };
    Harness {
        manager: ProcessManager::from_config(&config).unwrap(),
        toolchain: Toolchain::new(Arc::new(TokioProcessExecutor), &config),
        _dir: dir,
    }
}

impl Harness {
    async fn run(&self, request: ToolchainRequest) -> ProcessRecord {
        let operation = self.toolchain.descriptor(request).unwrap();
        let process_id = self
            .manager
            .generate_process_id(InitialResult::message("queued"))
            .unwrap();
        self.manager
            .publish_event(
                OperationRequest {
                    process_id,
                    operation,
                },
                PublishMode::WaitForCompletion,
            )
            .await
            .unwrap()
    }
}

fn file(request: FileActionRequest) -> ToolchainRequest {
    ToolchainRequest::FileAction(request)
}

#[tokio::test]
async fn file_actions_write_read_and_delete_inside_project() {
    let harness = harness("/bin/echo", "/bin/echo");

    let written = harness
        .run(file(FileActionRequest::Write {
            path: "models/orders.sql".to_string(),
            contents: "select 1".to_string(),
        }))
        .await;
    assert_eq!(written.status, ProcessStatus::Completed);
    assert_eq!(
        written.result,
        Some(json!({"path": "models/orders.sql", "bytes_written": 8}))
    );
    assert!(harness.toolchain.project_dir().join("models/orders.sql").exists());

    let read = harness
        .run(file(FileActionRequest::Read {
            path: "models/orders.sql".to_string(),
        }))
        .await;
    assert_eq!(
        read.result,
        Some(json!({"path": "models/orders.sql", "contents": "select 1"}))
    );

    let deleted = harness
        .run(file(FileActionRequest::Delete {
            path: "models/orders.sql".to_string(),
        }))
        .await;
    assert_eq!(deleted.status, ProcessStatus::Completed);
    assert!(!harness.toolchain.project_dir().join("models/orders.sql").exists());

    let missing = harness
        .run(file(FileActionRequest::Read {
            path: "models/orders.sql".to_string(),
        }))
        .await;
    assert_eq!(missing.status, ProcessStatus::Failed);
    assert!(missing.message.contains("failed to read"), "{}", missing.message);
}

#[tokio::test]
async fn escaping_file_paths_are_rejected_up_front() {
    let harness = harness("/bin/echo", "/bin/echo");
    let error = harness
        .toolchain
        .descriptor(file(FileActionRequest::Read {
            path: "../outside.txt".to_string(),
        }))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Validation);
}

#[tokio::test]
async fn build_model_runs_toolchain_and_streams_output() {
    let harness = harness("/bin/echo", "/bin/echo");
    let mut subscription = harness.manager.subscribe();

    let record = harness
        .run(ToolchainRequest::BuildModel(BuildModelRequest {
            select: Some("orders".to_string()),
            full_refresh: true,
            target: None,
        }))
        .await;
    assert_eq!(record.status, ProcessStatus::Completed);
    let result = record.result.unwrap();
    assert_eq!(result["exit_code"], json!(0));
    assert_eq!(
        result["stdout"].as_str().unwrap().trim(),
        "build --select orders --full-refresh"
    );

    let mut lines = Vec::new();
    while let Some(event) = subscription.try_recv() {
        if let EventStreamMessage::LogLines { lines: batch, .. } = event.as_ref() {
            lines.extend(batch.iter().cloned());
        }
    }
    assert_eq!(lines[0], "$ /bin/echo build --select orders --full-refresh");
    assert!(lines.contains(&"build --select orders --full-refresh".to_string()));
}

#[tokio::test]
async fn failing_git_command_marks_process_failed() {
    let harness = harness("/bin/echo", "/bin/false");
    let record = harness
        .run(ToolchainRequest::GitAction(GitActionRequest::Pull))
        .await;
    assert_eq!(record.status, ProcessStatus::Failed);
    assert!(record.message.contains("exited with status 1"), "{}", record.message);
}

#[tokio::test]
async fn flag_like_selectors_are_rejected() {
    let harness = harness("/bin/echo", "/bin/echo");
    let error = harness
        .toolchain
        .descriptor(ToolchainRequest::BuildModel(BuildModelRequest {
            select: Some("--everything".to_string()),
            ..BuildModelRequest::default()
        }))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Validation);
}
