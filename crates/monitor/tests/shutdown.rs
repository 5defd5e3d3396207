#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use monitor::{ClusterConfig, LifecycleController, LifecycleState, Timings};
use tempfile::TempDir;

/// Runs until signalled.
const LONG_RUNNING: &str = r#"#!/bin/sh
echo "[Node 0] Generation 1: 1 live cells"
while true; do
  sleep 1
done
"#;

/// Ignores SIGTERM, so only a kill stops it.
const STUBBORN: &str = r#"#!/bin/sh
trap '' TERM
echo "[Node 0] Generation 1: 1 live cells"
while true; do
  sleep 1
done
"#;

const GRACE_MS: u64 = 400;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn controller(executable: PathBuf) -> LifecycleController {
    let mut config = ClusterConfig::new(executable);
    config.nodes = 2;
    config.timings = Timings {
        coordinator_settle_ms: 50,
        collaborator_settle_ms: 10,
        grace_period_ms: GRACE_MS,
    };
    LifecycleController::new(config)
}

/// Stop a running session and report how long it took.
async fn stop_timed(controller: &LifecycleController) -> Duration {
    controller.start().await.unwrap();
    assert!(controller.is_running().await);
    assert_eq!(controller.live_count().await, 2);

    let started = Instant::now();
    controller.stop().await;
    let elapsed = started.elapsed();

    assert_eq!(controller.state(), LifecycleState::Idle);
    assert!(!controller.is_running().await);
    assert_eq!(controller.live_count().await, 0);
    elapsed
}

// Both scenarios share one test so no script is being written while another
// is being executed.
#[tokio::test]
async fn test_stop_terminates_then_kills() {
    let temp_dir = TempDir::new().unwrap();
    let graceful = write_script(temp_dir.path(), "long_running", LONG_RUNNING);
    let stubborn = write_script(temp_dir.path(), "stubborn", STUBBORN);

    let elapsed = stop_timed(&controller(graceful)).await;
    assert!(
        elapsed < Duration::from_millis(GRACE_MS),
        "graceful stop took {:?}",
        elapsed
    );

    let elapsed = stop_timed(&controller(stubborn)).await;
    assert!(
        elapsed >= Duration::from_millis(GRACE_MS),
        "stubborn node was not given the grace period: {:?}",
        elapsed
    );
    assert!(elapsed < Duration::from_secs(5), "kill took {:?}", elapsed);
}

#[tokio::test]
async fn test_controller_restarts_after_stop() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing");
    let controller = controller(missing);

    assert!(controller.start().await.is_err());
    controller.stop().await;
    assert!(controller.start().await.is_err());
    assert_eq!(controller.state(), LifecycleState::Idle);
}
