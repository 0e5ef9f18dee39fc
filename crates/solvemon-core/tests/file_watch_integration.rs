//! End-to-end tests for the monitor over a real snapshot file.
//!
//! These use the platform file watcher, so every wait is bounded by a
//! generous deadline instead of a fixed sleep.

use std::path::Path;
use std::time::Duration;

use solvemon_core::bus::SnapshotFrame;
use solvemon_core::monitor::{self, MonitorHandle, MonitorOptions};
use tempfile::TempDir;
use tokio::sync::broadcast;

const DEADLINE: Duration = Duration::from_secs(10);

fn snapshot_text(rows: &[&str], steps: u64) -> String {
    format!("{}\n\n{steps}: 0 / 10 / 3\n0.5\n", rows.join("\n"))
}

fn start(dir: &Path) -> MonitorHandle {
    monitor::spawn(&MonitorOptions {
        snapshot_path: dir.join("snapshot.txt"),
        stats_path: dir.join("stats.csv"),
        poll_interval: Duration::from_millis(20),
        bus_capacity: 16,
    })
    .unwrap()
}

/// Receive frames until one carries `stats`.
async fn wait_for_stats(rx: &mut broadcast::Receiver<SnapshotFrame>, stats: &str) -> SnapshotFrame {
    tokio::time::timeout(DEADLINE, async {
        loop {
            match rx.recv().await {
                Ok(frame) if frame.snapshot.stats() == stats => return frame,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("frame within deadline")
}

#[tokio::test]
async fn seed_snapshot_is_published_first() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("snapshot.txt"), snapshot_text(&["AB", "C."], 1)).unwrap();

    let monitor = start(dir.path());
    let latest = monitor.latest().expect("seed snapshot");
    assert_eq!(latest.stats(), "1: 0 / 10 / 3");
    assert_eq!(monitor.bus().last_seq(), 1);
    assert_eq!(monitor.heatmap_view().observations, 1);
    monitor.shutdown().unwrap();
}

#[tokio::test]
async fn rewrites_flow_to_bus_and_heatmap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.txt");
    std::fs::write(&path, snapshot_text(&["AB", "C."], 1)).unwrap();

    let monitor = start(dir.path());
    let mut rx = monitor.bus().subscribe();

    std::fs::write(&path, snapshot_text(&["AB", "CD"], 2)).unwrap();
    let frame = wait_for_stats(&mut rx, "2: 0 / 10 / 3").await;
    assert!(frame.seq >= 2);

    let view = monitor.heatmap_view();
    assert_eq!(view.ages.get(0, 0), Some(&1));
    assert_eq!(view.ages.get(1, 1), Some(&0));
    monitor.shutdown().unwrap();
}

#[tokio::test]
async fn replaced_file_is_still_observed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.txt");
    std::fs::write(&path, snapshot_text(&["A"], 1)).unwrap();

    let monitor = start(dir.path());
    let mut rx = monitor.bus().subscribe();

    let staging = dir.path().join("snapshot.tmp");
    std::fs::write(&staging, snapshot_text(&["B"], 2)).unwrap();
    std::fs::rename(&staging, &path).unwrap();
    wait_for_stats(&mut rx, "2: 0 / 10 / 3").await;

    std::fs::write(&path, snapshot_text(&["C"], 3)).unwrap();
    wait_for_stats(&mut rx, "3: 0 / 10 / 3").await;
    monitor.shutdown().unwrap();
}

#[tokio::test]
async fn torn_write_is_skipped_until_complete() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.txt");
    std::fs::write(&path, snapshot_text(&["AB"], 1)).unwrap();

    let monitor = start(dir.path());
    let mut rx = monitor.bus().subscribe();

    std::fs::write(&path, "AB\n\n2: 0 /").unwrap();
    std::fs::write(&path, snapshot_text(&["AX"], 3)).unwrap();
    let frame = wait_for_stats(&mut rx, "3: 0 / 10 / 3").await;
    assert_eq!(frame.snapshot.board().to_rows(), vec!["AX".to_string()]);

    // Nothing torn was ever published.
    assert!(monitor.latest().is_some_and(|s| s.metric().is_some()));
    monitor.shutdown().unwrap();
}
