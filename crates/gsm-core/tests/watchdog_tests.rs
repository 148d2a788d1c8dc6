//! Integration tests for crash detection and the restart policy.

mod common;

use common::Harness;
use gsm_core::{ProcessWatchdog, ServerStatus, SettingKeys, StatusStore, WatchdogAction};
use serde_json::json;
use std::time::{Duration, Instant};

#[test]
fn test_healthy_tick_does_nothing() {
    let h = Harness::new(&["alpha"]);
    h.supervisor.start("alpha").unwrap();

    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert!(actions.is_empty());
    assert_eq!(h.launcher.launches(), 1);
}

#[test]
fn test_retries_then_gives_up() {
    let h = Harness::new(&["alpha"]);
    let watchdog = ProcessWatchdog::new(h.supervisor.clone());
    h.supervisor.start("alpha").unwrap();

    for crash in 1..=3u32 {
        h.launcher.current("alpha").crash();
        let actions = watchdog.tick();
        assert_eq!(
            actions,
            vec![WatchdogAction::Restarted {
                name: "alpha".to_string(),
                failure_count: crash,
            }]
        );
        assert_eq!(h.supervisor.failure_count("alpha"), Some(crash));
        assert!(h.supervisor.is_running("alpha"));
    }

    h.launcher.current("alpha").crash();
    let actions = watchdog.tick();

    assert_eq!(
        actions,
        vec![WatchdogAction::GaveUp {
            name: "alpha".to_string(),
            failure_count: 4,
        }]
    );
    assert!(!h.supervisor.is_running("alpha"));
    assert_eq!(
        h.status.get_status("alpha").unwrap(),
        Some(ServerStatus::Error)
    );
    assert_eq!(h.launcher.launches(), 4);

    // Stays down until started by hand
    assert!(watchdog.tick().is_empty());
    assert_eq!(h.launcher.launches(), 4);
}

#[test]
fn test_manual_start_resets_failures() {
    let h = Harness::new(&["alpha"]);
    let watchdog = ProcessWatchdog::new(h.supervisor.clone());
    h.supervisor.start("alpha").unwrap();

    h.launcher.current("alpha").crash();
    watchdog.tick();
    assert_eq!(h.supervisor.failure_count("alpha"), Some(1));

    h.supervisor.stop("alpha").unwrap();
    h.supervisor.start("alpha").unwrap();

    assert_eq!(h.supervisor.failure_count("alpha"), Some(0));
}

#[test]
fn test_zero_retries_never_restarts() {
    let h = Harness::new(&["alpha"]);
    h.settings.set(SettingKeys::MAX_RETRIES, json!(0));
    h.supervisor.start("alpha").unwrap();

    h.launcher.current("alpha").crash();
    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert!(matches!(
        actions.as_slice(),
        [WatchdogAction::GaveUp { failure_count: 1, .. }]
    ));
    assert_eq!(h.launcher.launches(), 1);
}

#[test]
fn test_intentional_stop_is_not_a_crash() {
    let h = Harness::new(&["alpha"]);
    h.supervisor.start("alpha").unwrap();
    h.supervisor.stop("alpha").unwrap();

    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert!(actions.is_empty());
    assert_eq!(
        h.status.get_status("alpha").unwrap(),
        Some(ServerStatus::Stopped)
    );
}

#[test]
fn test_failed_restart_leaves_server_unregistered() {
    let h = Harness::new(&["alpha"]);
    h.supervisor.start("alpha").unwrap();
    h.launcher.set_fail(true);
    h.launcher.current("alpha").crash();

    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert_eq!(
        actions,
        vec![WatchdogAction::RestartFailed {
            name: "alpha".to_string(),
            failure_count: 1,
        }]
    );
    assert!(!h.supervisor.is_running("alpha"));
    assert_eq!(h.supervisor.failure_count("alpha"), None);
    assert_eq!(
        h.status.get_status("alpha").unwrap(),
        Some(ServerStatus::Error)
    );
}

#[test]
fn test_only_crashed_server_is_restarted() {
    let h = Harness::new(&["alpha", "beta"]);
    h.supervisor.start("alpha").unwrap();
    h.supervisor.start("beta").unwrap();

    h.launcher.current("beta").crash();
    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert_eq!(actions.len(), 1);
    assert!(matches!(&actions[0], WatchdogAction::Restarted { name, .. } if name == "beta"));
    assert_eq!(h.supervisor.failure_count("alpha"), Some(0));
    assert_eq!(h.launcher.launches(), 3);
}

#[test]
fn test_background_watchdog_restarts() {
    let h = Harness::new(&["alpha"]);
    h.settings
        .set(SettingKeys::WATCHDOG_INTERVAL_SECS, json!(0.05));
    h.supervisor.start("alpha").unwrap();

    let mut handle = ProcessWatchdog::new(h.supervisor.clone()).spawn().unwrap();
    assert!(handle.is_running());

    h.launcher.current("alpha").crash();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.launcher.launches() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(h.launcher.launches(), 2);
    handle.stop();
    assert!(!handle.is_running());
}

#[test]
fn test_panicking_restart_does_not_block_others() {
    let h = Harness::new(&["alpha", "beta"]);
    h.supervisor.start("alpha").unwrap();
    h.supervisor.start("beta").unwrap();
    h.launcher.panic_on_launch("alpha");

    h.launcher.current("alpha").crash();
    h.launcher.current("beta").crash();
    let mut actions = ProcessWatchdog::new(h.supervisor.clone()).tick();
    actions.sort_by_key(|a| format!("{:?}", a));

    assert_eq!(
        actions,
        vec![
            WatchdogAction::RestartFailed {
                name: "alpha".to_string(),
                failure_count: 1,
            },
            WatchdogAction::Restarted {
                name: "beta".to_string(),
                failure_count: 1,
            },
        ]
    );
    assert!(h.supervisor.is_running("beta"));
    assert_eq!(
        h.status.get_status("alpha").unwrap(),
        Some(ServerStatus::Error)
    );
}

#[test]
fn test_panicking_liveness_check_counts_as_crash() {
    let h = Harness::new(&["alpha"]);
    h.supervisor.start("alpha").unwrap();
    h.launcher.current("alpha").panic_on_poll();

    let actions = ProcessWatchdog::new(h.supervisor.clone()).tick();

    assert_eq!(
        actions,
        vec![WatchdogAction::Restarted {
            name: "alpha".to_string(),
            failure_count: 1,
        }]
    );
    // The replacement handle is healthy
    assert!(h.supervisor.is_running("alpha"));
}

#[test]
fn test_background_watchdog_survives_panics() {
    let h = Harness::new(&["alpha", "beta"]);
    h.settings
        .set(SettingKeys::WATCHDOG_INTERVAL_SECS, json!(0.05));
    h.supervisor.start("alpha").unwrap();
    h.supervisor.start("beta").unwrap();
    h.launcher.panic_on_launch("alpha");

    let mut handle = ProcessWatchdog::new(h.supervisor.clone()).spawn().unwrap();
    h.launcher.current("alpha").crash();
    std::thread::sleep(Duration::from_millis(300));
    assert!(handle.is_running());

    // Still polling after the panic
    h.launcher.current("beta").crash();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.launcher.launches() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(h.launcher.launches(), 3);
    assert!(handle.is_running());
    handle.stop();
}
