//! Monitor runtime: a dedicated watcher thread feeding shared state.
//!
//! The watcher, its reload/compare/publish chain and the heatmap update all
//! run on one `snapshot-watcher` thread. Every accepted snapshot is folded
//! into the [`StabilityHeatmap`], stored as the latest snapshot and then
//! published on the [`SnapshotBus`], in that order, so a bus listener that
//! reads the heatmap sees at least the state that produced its frame.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::Error;
use crate::bus::SnapshotBus;
use crate::config::Config;
use crate::error::WatchError;
use crate::heatmap::{HeatmapView, StabilityHeatmap, UpdateSummary};
use crate::snapshot::Snapshot;
use crate::watcher::{
    ChangeNotifier, FileChangeNotifier, FileSnapshotSource, SnapshotSource, SnapshotWatcher,
    WatcherStats,
};

const WATCHER_THREAD_NAME: &str = "snapshot-watcher";

/// Monitor settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub snapshot_path: PathBuf,
    pub stats_path: PathBuf,
    pub poll_interval: Duration,
    pub bus_capacity: usize,
}

impl From<&Config> for MonitorOptions {
    fn from(config: &Config) -> Self {
        Self {
            snapshot_path: config.paths.snapshot_path(),
            stats_path: config.paths.stats_path(),
            poll_interval: Duration::from_millis(config.watcher.poll_interval_ms),
            bus_capacity: config.web.bus_capacity,
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared between the watcher thread and readers.
#[derive(Debug, Clone)]
pub struct MonitorState {
    bus: Arc<SnapshotBus>,
    heatmap: Arc<Mutex<StabilityHeatmap>>,
    latest: Arc<RwLock<Option<Arc<Snapshot>>>>,
    watcher_stats: Arc<Mutex<WatcherStats>>,
    solutions_seen: Arc<AtomicU64>,
    started_at: Instant,
}

/// Point-in-time health summary.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub uptime_secs: f64,
    pub has_snapshot: bool,
    pub published: u64,
    pub listeners: usize,
    pub watcher: WatcherStats,
}

impl MonitorState {
    #[must_use]
    pub fn new(bus_capacity: usize) -> Self {
        Self {
            bus: Arc::new(SnapshotBus::new(bus_capacity)),
            heatmap: Arc::new(Mutex::new(StabilityHeatmap::new())),
            latest: Arc::new(RwLock::new(None)),
            watcher_stats: Arc::new(Mutex::new(WatcherStats::default())),
            solutions_seen: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<SnapshotBus> {
        &self.bus
    }

    /// Most recently accepted snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `f` with the heatmap locked.
    pub fn with_heatmap<R>(&self, f: impl FnOnce(&StabilityHeatmap) -> R) -> R {
        f(&self.heatmap.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn heatmap_view(&self) -> HeatmapView {
        self.with_heatmap(StabilityHeatmap::view)
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            has_snapshot: self.latest().is_some(),
            published: self.bus.last_seq(),
            listeners: self.bus.receiver_count(),
            watcher: *self
                .watcher_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Fold an accepted snapshot into the heatmap, store it, then publish it.
    pub fn apply(&self, snapshot: &Arc<Snapshot>) -> UpdateSummary {
        let summary = self
            .heatmap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update_board(snapshot.board());
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(snapshot));
        self.note_solutions(snapshot);
        self.bus.publish(Arc::clone(snapshot));
        summary
    }

    fn note_solutions(&self, snapshot: &Snapshot) {
        let Some(record) = snapshot.csv_record() else {
            return;
        };
        let previous = self.solutions_seen.swap(record.solutions, Ordering::Relaxed);
        if record.solutions > previous {
            tracing::info!(
                solutions = record.solutions,
                new = record.solutions - previous,
                steps = record.steps,
                "Solution detected"
            );
        }
    }

    fn record_stats(&self, stats: WatcherStats) {
        *self
            .watcher_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Handle to a running monitor thread.
#[derive(Debug)]
pub struct MonitorHandle {
    state: MonitorState,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), WatchError>>>,
}

/// Spawn a monitor over the configured snapshot and CSV files.
pub fn spawn(options: &MonitorOptions) -> crate::Result<MonitorHandle> {
    let source =
        FileSnapshotSource::new(&options.snapshot_path).with_stats_log(&options.stats_path);
    let notifier = FileChangeNotifier::new(&options.snapshot_path);
    tracing::info!(
        snapshot = %options.snapshot_path.display(),
        stats = %options.stats_path.display(),
        "Starting snapshot monitor"
    );
    spawn_with(source, notifier, options.poll_interval, options.bus_capacity)
}

/// Spawn a monitor over any source and notifier.
///
/// Returns once the watcher is installed; installation failures are
/// returned here rather than from [`MonitorHandle::join`].
pub fn spawn_with<S, N>(
    source: S,
    notifier: N,
    poll_interval: Duration,
    bus_capacity: usize,
) -> crate::Result<MonitorHandle>
where
    S: SnapshotSource + 'static,
    N: ChangeNotifier + 'static,
{
    let state = MonitorState::new(bus_capacity);
    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();

    let thread_state = state.clone();
    let thread_stop = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name(WATCHER_THREAD_NAME.to_string())
        .spawn(move || {
            run_watcher(
                SnapshotWatcher::new(source, notifier),
                &thread_state,
                &thread_stop,
                poll_interval,
                &ready_tx,
            )
        })
        .map_err(|err| Error::Runtime(format!("failed to spawn watcher thread: {err}")))?;

    let mut handle = MonitorHandle {
        state,
        stop,
        thread: Some(thread),
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            handle.join_thread()?;
            Err(err.into())
        }
        Err(_) => Err(handle
            .join_thread()
            .err()
            .unwrap_or_else(|| Error::Runtime("watcher thread exited during startup".to_string()))),
    }
}

fn run_watcher<S: SnapshotSource, N: ChangeNotifier>(
    mut watcher: SnapshotWatcher<S, N>,
    state: &MonitorState,
    stop: &AtomicBool,
    poll_interval: Duration,
    ready: &mpsc::Sender<Result<(), WatchError>>,
) -> Result<(), WatchError> {
    let subscriber_state = state.clone();
    watcher.subscribe(move |snapshot| {
        subscriber_state.apply(snapshot);
        Ok(())
    });

    if let Err(err) = watcher.start_watching() {
        let _ = ready.send(Err(err.clone()));
        return Err(err);
    }
    if let Some(seed) = watcher.last_snapshot() {
        state.apply(&seed);
    }
    let _ = ready.send(Ok(()));

    let result = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        let outcome = watcher.wait_for_signal(poll_interval);
        state.record_stats(watcher.stats());
        if let Err(err) = outcome {
            break Err(err);
        }
    };

    watcher.stop_watching();
    state.record_stats(watcher.stats());
    result
}

impl MonitorHandle {
    /// Shared state (cloneable).
    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<SnapshotBus> {
        self.state.bus()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.state.latest()
    }

    #[must_use]
    pub fn heatmap_view(&self) -> HeatmapView {
        self.state.heatmap_view()
    }

    /// Whether the watcher thread has exited (stopped or failed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the watcher thread to stop. Takes effect within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the watcher thread. Surfaces a watcher failure.
    pub fn join(mut self) -> crate::Result<()> {
        self.join_thread()
    }

    /// Stop and wait.
    pub fn shutdown(self) -> crate::Result<()> {
        self.stop();
        self.join()
    }

    fn join_thread(&mut self) -> crate::Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Runtime("watcher thread panicked".to_string())),
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
        if let Err(err) = self.join_thread() {
            tracing::warn!(error = %err, "Monitor stopped with error");
        }
    }
}
