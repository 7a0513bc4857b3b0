use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::json;

use crate::models::{CoreError, CoreErrorKind, CoreResult, OperationKind};
use crate::operations::Toolchain;
use crate::orchestration::{OperationContext, OperationDescriptor};

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileActionRequest {
    Read { path: String },
    Write { path: String, contents: String },
    Delete { path: String },
}

impl FileActionRequest {
    pub fn path(&self) -> &str {
        match self {
            FileActionRequest::Read { path }
            | FileActionRequest::Write { path, .. }
            | FileActionRequest::Delete { path } => path,
        }
    }
}

impl Toolchain {
    pub fn file_action(&self, request: FileActionRequest) -> CoreResult<OperationDescriptor> {
        let resolved = resolve_in_project(&self.project_dir, request.path())?;
        let message = format!("file action on '{}'", request.path());

        Ok(OperationDescriptor::new(OperationKind::FileAction, move |context| {
            run_file_action(request, resolved, context)
        })
        .in_progress_message(message))
    }
}

/// Joins `relative` onto the project directory, refusing anything that could
/// leave it.
pub fn resolve_in_project(project_dir: &Path, relative: &str) -> CoreResult<PathBuf> {
    let candidate = Path::new(relative);
    let escapes = relative.trim().is_empty()
        || candidate.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });

    if escapes {
        return Err(CoreError::validation(format!(
            "path '{relative}' must be relative to the project directory"
        ))
        .operation(OperationKind::FileAction));
    }

    Ok(project_dir.join(candidate))
}

async fn run_file_action(
    request: FileActionRequest,
    resolved: PathBuf,
    context: OperationContext,
) -> CoreResult<serde_json::Value> {
    if context.is_cancelled() {
        return Err(CoreError::new(CoreErrorKind::Cancelled, "file action cancelled"));
    }

    let io_error = |verb: &str, error: std::io::Error| {
        CoreError::new(
            CoreErrorKind::Operation,
            format!("failed to {verb} '{}': {error}", request.path()),
        )
        .operation(OperationKind::FileAction)
    };

    match &request {
        FileActionRequest::Read { path } => {
            let contents = tokio::fs::read_to_string(&resolved)
                .await
                .map_err(|error| io_error("read", error))?;
            Ok(json!({ "path": path, "contents": contents }))
        }
        FileActionRequest::Write { path, contents } => {
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|error| io_error("create parent of", error))?;
            }
            tokio::fs::write(&resolved, contents.as_bytes())
                .await
                .map_err(|error| io_error("write", error))?;
            context.log_lines([format!("wrote {} bytes to {path}", contents.len())]);
            Ok(json!({ "path": path, "bytes_written": contents.len() }))
        }
        FileActionRequest::Delete { path } => {
            tokio::fs::remove_file(&resolved)
                .await
                .map_err(|error| io_error("delete", error))?;
            context.log_lines([format!("deleted {path}")]);
            Ok(json!({ "path": path, "deleted": true }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_in_project;
    use crate::models::CoreErrorKind;
    use std::path::{Path, PathBuf};

    #[test]
    fn nested_relative_paths_resolve_inside_project() {
        let resolved = resolve_in_project(Path::new("/srv/project"), "models/orders.sql").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/project/models/orders.sql"));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for path in ["../secrets", "/etc/passwd", "models/../../x", ""] {
            let error = resolve_in_project(Path::new("/srv/project"), path).unwrap_err();
            assert_eq!(error.kind, CoreErrorKind::Validation, "{path}");
        }
    }
}
