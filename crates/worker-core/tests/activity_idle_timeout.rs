use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use worker_core::models::InstanceState;
use worker_core::orchestration::{ActivityTracker, ManualClock, spawn_idle_monitor};

fn tracker(timeout: u64) -> (Arc<ActivityTracker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(50)));
    let tracker = Arc::new(ActivityTracker::with_clock(timeout, clock.clone()).unwrap());
    (tracker, clock)
}

#[tokio::test]
async fn quiet_instance_shuts_down_after_timeout() {
    let (tracker, clock) = tracker(5);
    tracker.track_activity();

    for _ in 0..6 {
        clock.advance(Duration::from_secs(1));
        if tracker.check_idle() {
            break;
        }
    }

    assert_eq!(tracker.instance_state(), InstanceState::ShuttingDown);
    let status = tracker.status();
    assert_eq!(status.time_left_seconds, 0);
    assert_eq!(status.first_activity_at, Some(UNIX_EPOCH + Duration::from_secs(50)));

    tracker.track_activity();
    assert_eq!(tracker.instance_state(), InstanceState::ShuttingDown);
    assert!(!tracker.check_idle());
}

#[tokio::test]
async fn steady_activity_keeps_instance_running() {
    let (tracker, clock) = tracker(5);
    for _ in 0..20 {
        tracker.track_activity();
        clock.advance(Duration::from_secs(3));
        assert!(!tracker.check_idle());
    }
    assert_eq!(tracker.instance_state(), InstanceState::Running);
}

#[tokio::test]
async fn never_active_instance_stays_idle() {
    let (tracker, clock) = tracker(5);
    clock.advance(Duration::from_secs(3_600));
    assert!(!tracker.check_idle());
    assert_eq!(tracker.instance_state(), InstanceState::Idle);
}

#[tokio::test]
async fn monitor_fires_shutdown_callback_once() {
    let (tracker, clock) = tracker(5);
    let fired = Arc::new(AtomicUsize::new(0));
    tracker.track_activity();

    let monitor = spawn_idle_monitor(tracker.clone(), Duration::from_millis(10), || false, {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(6));
    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.instance_state(), InstanceState::ShuttingDown);
}
