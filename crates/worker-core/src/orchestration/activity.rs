use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use crate::models::{ActivityStatus, CoreError, CoreResult, InstanceState};

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to; used to simulate idle periods.
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct TrackerState {
    first_activity_at: Option<SystemTime>,
    last_activity_at: SystemTime,
    shutdown_timeout: Duration,
    instance_state: InstanceState,
}

/// Idle → Running → ShuttingDown lifecycle driven by request recency.
pub struct ActivityTracker {
    clock: Arc<dyn Clock>,
    state: Mutex<TrackerState>,
}

impl ActivityTracker {
    pub fn new(shutdown_timeout_seconds: u64) -> CoreResult<Self> {
        Self::with_clock(shutdown_timeout_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(shutdown_timeout_seconds: u64, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        if shutdown_timeout_seconds == 0 {
            return Err(CoreError::invalid_configuration(
                "shutdown timeout must be greater than zero seconds",
            ));
        }

        let now = clock.now();
        Ok(Self {
            clock,
            state: Mutex::new(TrackerState {
                first_activity_at: None,
                last_activity_at: now,
                shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
                instance_state: InstanceState::Idle,
            }),
        })
    }

    pub fn track_activity(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        match state.instance_state {
            InstanceState::ShuttingDown => {}
            InstanceState::Idle => {
                state.last_activity_at = now;
                state.first_activity_at.get_or_insert(now);
                state.instance_state = InstanceState::Running;
                tracing::info!("worker instance is now running");
            }
            InstanceState::Running => {
                state.last_activity_at = now;
            }
        }
    }

    /// Returns `true` on the single call that moves the instance into `ShuttingDown`.
    pub fn check_idle(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock_state();
        if state.instance_state != InstanceState::Running {
            return false;
        }

        let idle = idle_for(now, state.last_activity_at);
        if idle < state.shutdown_timeout {
            return false;
        }

        state.instance_state = InstanceState::ShuttingDown;
        tracing::info!(
            idle_seconds = idle.as_secs(),
            timeout_seconds = state.shutdown_timeout.as_secs(),
            "idle timeout reached; worker instance shutting down"
        );
        true
    }

    pub fn adjust_timeout(&self, seconds: u64) -> CoreResult<()> {
        if seconds == 0 {
            return Err(CoreError::validation(
                "shutdown timeout must be a positive number of seconds",
            ));
        }

        self.lock_state().shutdown_timeout = Duration::from_secs(seconds);
        tracing::info!(timeout_seconds = seconds, "shutdown timeout adjusted");
        Ok(())
    }

    pub fn instance_state(&self) -> InstanceState {
        self.lock_state().instance_state
    }

    pub fn status(&self) -> ActivityStatus {
        let now = self.clock.now();
        let state = self.lock_state();
        let idle = idle_for(now, state.last_activity_at);
        ActivityStatus {
            first_activity_at: state.first_activity_at,
            last_activity_at: state.last_activity_at,
            shutdown_timeout_seconds: state.shutdown_timeout.as_secs(),
            time_left_seconds: state.shutdown_timeout.saturating_sub(idle).as_secs(),
            instance_state: state.instance_state,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A clock that stepped backwards counts as no idle time.
fn idle_for(now: SystemTime, last_activity_at: SystemTime) -> Duration {
    now.duration_since(last_activity_at).unwrap_or_default()
}

/// Polls `check_idle` every `interval` and calls `on_shutdown` once the
/// tracker enters `ShuttingDown`, then exits. A tick on which `busy` holds
/// counts as activity.
pub fn spawn_idle_monitor<B, F>(
    tracker: Arc<ActivityTracker>,
    interval: Duration,
    busy: B,
    on_shutdown: F,
) -> JoinHandle<()>
where
    B: Fn() -> bool + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if busy() {
                tracker.track_activity();
            }
            if tracker.check_idle() {
                on_shutdown();
                return;
            }
            if tracker.instance_state() == InstanceState::ShuttingDown {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{ActivityTracker, ManualClock};
    use crate::models::{CoreErrorKind, InstanceState};
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn tracker(timeout: u64) -> (ActivityTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000)));
        let tracker = ActivityTracker::with_clock(timeout, clock.clone()).unwrap();
        (tracker, clock)
    }

    #[test]
    fn starts_idle_and_runs_after_first_activity() {
        let (tracker, clock) = tracker(5);
        assert_eq!(tracker.status().instance_state, InstanceState::Idle);
        assert!(tracker.status().first_activity_at.is_none());

        clock.advance(Duration::from_secs(2));
        tracker.track_activity();
        let status = tracker.status();
        assert_eq!(status.instance_state, InstanceState::Running);
        assert_eq!(status.first_activity_at, Some(status.last_activity_at));
    }

    #[test]
    fn idle_instance_never_times_out() {
        let (tracker, clock) = tracker(5);
        clock.advance(Duration::from_secs(60));
        assert!(!tracker.check_idle());
        assert_eq!(tracker.instance_state(), InstanceState::Idle);
    }

    #[test]
    fn time_left_counts_down_and_floors_at_zero() {
        let (tracker, clock) = tracker(10);
        tracker.track_activity();
        clock.advance(Duration::from_secs(4));
        assert_eq!(tracker.status().time_left_seconds, 6);

        clock.advance(Duration::from_secs(20));
        assert_eq!(tracker.status().time_left_seconds, 0);
    }

    #[test]
    fn shutdown_is_irreversible() {
        let (tracker, clock) = tracker(5);
        tracker.track_activity();
        clock.advance(Duration::from_secs(5));
        assert!(tracker.check_idle());
        assert!(!tracker.check_idle());

        let before = tracker.status().last_activity_at;
        clock.advance(Duration::from_secs(1));
        tracker.track_activity();
        let status = tracker.status();
        assert_eq!(status.instance_state, InstanceState::ShuttingDown);
        assert_eq!(status.last_activity_at, before);
    }

    #[test]
    fn adjust_timeout_rejects_zero() {
        let (tracker, _) = tracker(5);
        let error = tracker.adjust_timeout(0).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Validation);

        tracker.adjust_timeout(30).unwrap();
        assert_eq!(tracker.status().shutdown_timeout_seconds, 30);
    }

    #[test]
    fn zero_initial_timeout_is_a_configuration_error() {
        let error = ActivityTracker::new(0).err().unwrap();
        assert_eq!(error.kind, CoreErrorKind::InvalidConfiguration);
    }
}
