#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use events::{Event, EventKind, EventPayload, NodeId};
use monitor::{ClusterConfig, ClusterStats, LifecycleController, LifecycleState, Partition, Timings};
use tempfile::TempDir;

/// Stands in for the Game of Life node binary: prints a short run for the
/// node id it was given and exits.
const NODE_SCRIPT: &str = r#"#!/bin/sh
node=0
while [ $# -gt 0 ]; do
  if [ "$1" = "--node-id" ]; then
    node="$2"
  fi
  shift
done
start=$((node * 10))
end=$((start + 10))
echo "[Node $node] DSM initialized successfully"
echo "[Node $node] Partition: rows [$start, $end)"
for g in 1 2 3; do
  echo "[Node $node] Waiting at BARRIER_COMPUTE_$g..."
  echo "[Node $node] Generation $g: $((g + node)) live cells in partition"
done
echo "[Node $node] Page faults: 12 (R: 10, W: 2)"
echo "[Node $node] === Computation Complete ==="
echo "[Node $node] Final live cells: 4$node" >&2
"#;

fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("game_of_life");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fast_timings() -> Timings {
    Timings {
        coordinator_settle_ms: 50,
        collaborator_settle_ms: 10,
        grace_period_ms: 500,
    }
}

async fn collect_until_exit(controller: &LifecycleController) -> Vec<Event> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();

    loop {
        match controller.bus().receive(Duration::from_millis(100)).await {
            Some(event) => events.push(event),
            None if !controller.is_running().await && controller.drains_finished().await => {
                break
            }
            None => {}
        }
        assert!(Instant::now() < deadline, "nodes did not finish in time");
    }

    events.extend(std::iter::from_fn(|| controller.bus().try_receive()));
    events
}

#[tokio::test]
async fn test_session_collects_events_from_every_node() {
    let temp_dir = TempDir::new().unwrap();
    let executable = write_script(&temp_dir, NODE_SCRIPT);

    let mut config = ClusterConfig::new(executable);
    config.nodes = 3;
    config.timings = fast_timings();
    let controller = LifecycleController::new(config);

    controller.start().await.unwrap();
    assert_eq!(controller.state(), LifecycleState::Running);

    let events = collect_until_exit(&controller).await;
    assert!(!controller.is_running().await);
    assert_eq!(controller.state(), LifecycleState::Running);

    // Init, three generations, page faults and two completion lines per node.
    assert_eq!(events.len(), 21);
    assert!(events.iter().all(|event| event.kind() != EventKind::Error));

    let mut generations: HashMap<NodeId, Vec<u64>> = HashMap::new();
    for event in &events {
        if let EventPayload::Generation { generation, .. } = event.payload() {
            generations.entry(event.node()).or_default().push(*generation);
        }
    }
    for node in 0..3 {
        assert_eq!(generations[&node], vec![1, 2, 3], "node {}", node);
    }

    let tracker = controller.tracker();
    assert_eq!(tracker.minimum_generation(), 3);
    assert_eq!(
        tracker.partitions(),
        vec![
            (0, Partition { start_row: 0, end_row: 10 }),
            (1, Partition { start_row: 10, end_row: 20 }),
            (2, Partition { start_row: 20, end_row: 30 }),
        ]
    );

    let mut stats = ClusterStats::new();
    for event in &events {
        stats.apply(event);
    }
    assert_eq!(stats.completed_nodes(), 3);
    assert_eq!(stats.node(2).unwrap().final_live_cells, Some(42));
    assert_eq!(stats.total_page_faults(), 36);

    controller.stop().await;
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert_eq!(controller.live_count().await, 0);

    controller.stop().await;
    assert_eq!(controller.state(), LifecycleState::Idle);
}
