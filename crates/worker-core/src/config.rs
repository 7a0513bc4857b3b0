//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreResult};

const ENV_PREFIX: &str = "TENANT_WORKER_";

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Process records kept before the oldest is evicted.
    pub result_capacity: usize,
    /// Per-subscriber event buffer.
    pub subscriber_buffer: usize,
    /// Idle time after which a running instance shuts itself down.
    pub shutdown_timeout_seconds: u64,
    pub idle_check_interval_seconds: u64,
    pub ping_interval_seconds: u64,
    /// Working directory shared by every toolchain, git and file operation.
    pub project_dir: PathBuf,
    pub toolchain_program: String,
    pub git_program: String,
    pub command_timeout_seconds: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            result_capacity: 512,
            subscriber_buffer: 256,
            shutdown_timeout_seconds: 900, // 15 minutes
            idle_check_interval_seconds: 5,
            ping_interval_seconds: 30,
            project_dir: PathBuf::from("."),
            toolchain_program: "dbt".to_string(),
            git_program: "git".to_string(),
            command_timeout_seconds: None,
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by `TENANT_WORKER_*` environment variables.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            CoreError::invalid_configuration(format!("malformed worker configuration: {error}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(raw) = get("RESULT_CAPACITY") {
            config.result_capacity = parse_setting("RESULT_CAPACITY", &raw)?;
        }
        if let Some(raw) = get("SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = parse_setting("SUBSCRIBER_BUFFER", &raw)?;
        }
        if let Some(raw) = get("SHUTDOWN_TIMEOUT_SECONDS") {
            config.shutdown_timeout_seconds = parse_setting("SHUTDOWN_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = get("IDLE_CHECK_INTERVAL_SECONDS") {
            config.idle_check_interval_seconds =
                parse_setting("IDLE_CHECK_INTERVAL_SECONDS", &raw)?;
        }
        if let Some(raw) = get("PING_INTERVAL_SECONDS") {
            config.ping_interval_seconds = parse_setting("PING_INTERVAL_SECONDS", &raw)?;
        }
        if let Some(raw) = get("PROJECT_DIR") {
            config.project_dir = PathBuf::from(raw);
        }
        if let Some(raw) = get("TOOLCHAIN_PROGRAM") {
            config.toolchain_program = raw;
        }
        if let Some(raw) = get("GIT_PROGRAM") {
            config.git_program = raw;
        }
        if let Some(raw) = get("COMMAND_TIMEOUT_SECONDS") {
            config.command_timeout_seconds = Some(parse_setting("COMMAND_TIMEOUT_SECONDS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let positive = [
            ("result_capacity", self.result_capacity as u64),
            ("subscriber_buffer", self.subscriber_buffer as u64),
            ("shutdown_timeout_seconds", self.shutdown_timeout_seconds),
            ("idle_check_interval_seconds", self.idle_check_interval_seconds),
            ("ping_interval_seconds", self.ping_interval_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(CoreError::invalid_configuration(format!(
                "{name} must be greater than zero"
            )));
        }

        if self.command_timeout_seconds == Some(0) {
            return Err(CoreError::invalid_configuration(
                "command_timeout_seconds must be greater than zero when provided",
            ));
        }

        if self.toolchain_program.trim().is_empty() || self.git_program.trim().is_empty() {
            return Err(CoreError::invalid_configuration(
                "toolchain and git program names must not be empty",
            ));
        }

        Ok(())
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_seconds)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }
}

fn parse_setting<T: FromStr>(name: &str, raw: &str) -> CoreResult<T> {
    raw.trim().parse().map_err(|_| {
        CoreError::invalid_configuration(format!("{ENV_PREFIX}{name} has invalid value '{raw}'"))
    })
}
