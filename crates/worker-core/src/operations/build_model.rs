use serde::Deserialize;

use crate::models::{CoreError, CoreResult, OperationKind};
use crate::operations::Toolchain;
use crate::orchestration::OperationDescriptor;

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct BuildModelRequest {
    /// Node selector; the whole project is built when absent.
    #[serde(default)]
    pub select: Option<String>,
    #[serde(default)]
    pub full_refresh: bool,
    #[serde(default)]
    pub target: Option<String>,
}

impl BuildModelRequest {
    pub fn args(&self) -> CoreResult<Vec<String>> {
        let mut args = vec!["build".to_string()];

        if let Some(select) = &self.select {
            validate_flag_value("select", select)?;
            args.push("--select".to_string());
            args.push(select.clone());
        }
        if self.full_refresh {
            args.push("--full-refresh".to_string());
        }
        if let Some(target) = &self.target {
            validate_flag_value("target", target)?;
            args.push("--target".to_string());
            args.push(target.clone());
        }

        Ok(args)
    }
}

impl Toolchain {
    pub fn build_model(&self, request: BuildModelRequest) -> CoreResult<OperationDescriptor> {
        let args = request.args()?;
        let message = match &request.select {
            Some(select) => format!("building '{select}'"),
            None => "building project".to_string(),
        };
        let command = self.command(&self.toolchain_program).args(args);
        Ok(self
            .command_descriptor(OperationKind::BuildModel, command, message)?
            .cancelled_message("model build cancelled"))
    }
}

fn validate_flag_value(flag: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() || value.starts_with('-') {
        return Err(CoreError::validation(format!(
            "--{flag} value '{value}' is empty or looks like a flag"
        ))
        .operation(OperationKind::BuildModel));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::BuildModelRequest;
    use crate::models::CoreErrorKind;

    #[test]
    fn selector_and_flags_map_to_build_args() {
        let request = BuildModelRequest {
            select: Some("orders+".to_string()),
            full_refresh: true,
            target: Some("prod".to_string()),
        };

        assert_eq!(
            request.args().unwrap(),
            vec!["build", "--select", "orders+", "--full-refresh", "--target", "prod"]
        );
    }

    #[test]
    fn flag_like_selector_is_rejected() {
        let request = BuildModelRequest {
            select: Some("--exclude".to_string()),
            ..BuildModelRequest::default()
        };

        assert_eq!(request.args().unwrap_err().kind, CoreErrorKind::Validation);
    }
}
