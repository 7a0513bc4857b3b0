use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Idle,
    Running,
    ShuttingDown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub first_activity_at: Option<SystemTime>,
    pub last_activity_at: SystemTime,
    pub shutdown_timeout_seconds: u64,
    pub time_left_seconds: u64,
    pub instance_state: InstanceState,
}
