//! Snapshot watcher: file change signals in, semantic changes out.
//!
//! The solver rewrites its snapshot file in place. A single rewrite can raise
//! several filesystem events, and a read in the middle of a rewrite sees a
//! torn file. The watcher turns that noisy signal into a clean stream:
//!
//! 1. every change signal triggers a reload through a [`SnapshotSource`]
//! 2. unparseable content is logged and dropped (no state change)
//! 3. a parsed snapshot equal by value to the last accepted one is dropped
//! 4. anything else becomes the new baseline and is published to subscribers
//!
//! # Capabilities
//!
//! | Seam               | Production             | Tests                   |
//! |--------------------|------------------------|-------------------------|
//! | [`ChangeNotifier`] | [`FileChangeNotifier`] | [`ManualNotifier`]      |
//! | [`SnapshotSource`] | [`FileSnapshotSource`] | any `Fn() -> Result<_>` |
//!
//! All watcher state lives in a [`SnapshotWatcher`] value, so independent
//! watchers can coexist.
//!
//! ```ignore
//! let source = FileSnapshotSource::new(&snapshot_path).with_stats_log(&csv_path);
//! let mut watcher = SnapshotWatcher::new(source, FileChangeNotifier::new(&snapshot_path));
//! watcher.subscribe(|snapshot| {
//!     println!("{}", snapshot.stats());
//!     Ok(())
//! });
//! watcher.start_watching()?;
//! loop {
//!     watcher.wait_for_signal(Duration::from_millis(250))?;
//! }
//! ```

use notify::{EventKind, RecursiveMode, Watcher as _};
use serde::Serialize;
use std::ffi::OsString;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{ResourceError, WatchError};
use crate::snapshot::{self, Snapshot};
use crate::trends;

// =============================================================================
// Capabilities
// =============================================================================

/// A raw signal from the change notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// The watched file may have changed.
    Changed,
    /// The notification mechanism itself failed.
    Failed(String),
}

/// Callback installed into a [`ChangeNotifier`].
pub type SignalSink = Box<dyn Fn(WatchSignal) + Send + Sync + 'static>;

/// Source of file change signals.
pub trait ChangeNotifier: Send {
    /// Start delivering signals to `sink`. Replaces any previous sink.
    fn on_change(&mut self, sink: SignalSink) -> Result<(), WatchError>;

    /// Stop delivering signals. Idempotent.
    fn stop(&mut self);
}

/// Loads the current snapshot.
pub trait SnapshotSource: Send {
    fn load(&self) -> crate::Result<Snapshot>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> crate::Result<Snapshot> + Send,
{
    fn load(&self) -> crate::Result<Snapshot> {
        self()
    }
}

// =============================================================================
// File-backed implementations
// =============================================================================

/// Reads the snapshot file and, optionally, the trailing row of the
/// time-series log.
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    snapshot_path: PathBuf,
    stats_path: Option<PathBuf>,
}

impl FileSnapshotSource {
    #[must_use]
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            stats_path: None,
        }
    }

    /// Attach the CSV log whose last row becomes `csv_stats`.
    #[must_use]
    pub fn with_stats_log(mut self, stats_path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(stats_path.into());
        self
    }

    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn csv_tail(&self) -> Option<String> {
        let path = self.stats_path.as_deref()?;
        match trends::read_last_row(path) {
            Ok(row) => row,
            Err(err) => {
                tracing::debug!(error = %err, "CSV tail unavailable");
                None
            }
        }
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn load(&self) -> crate::Result<Snapshot> {
        let raw = std::fs::read_to_string(&self.snapshot_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::InvalidData {
                ResourceError::NotUtf8 {
                    path: self.snapshot_path.clone(),
                }
            } else {
                ResourceError::Read {
                    path: self.snapshot_path.clone(),
                    source,
                }
            }
        })?;
        let snapshot = snapshot::parse(&raw)?;
        Ok(snapshot.with_csv_stats(self.csv_tail()))
    }
}

/// [`ChangeNotifier`] backed by the platform file watcher.
///
/// Watches the parent directory rather than the file itself so that writers
/// which replace the file (rename over it) keep producing signals.
pub struct FileChangeNotifier {
    path: PathBuf,
    watcher: Option<notify::RecommendedWatcher>,
}

impl std::fmt::Debug for FileChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChangeNotifier")
            .field("path", &self.path)
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

impl FileChangeNotifier {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watcher: None,
        }
    }

    fn install_error(&self, reason: impl ToString) -> WatchError {
        WatchError::Install {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

fn touches_file(event: &notify::Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

impl ChangeNotifier for FileChangeNotifier {
    fn on_change(&mut self, sink: SignalSink) -> Result<(), WatchError> {
        let file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| self.install_error("path has no file name"))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) if touches_file(&event, &file_name) => sink(WatchSignal::Changed),
                Ok(_) => {}
                Err(err) => sink(WatchSignal::Failed(err.to_string())),
            })
            .map_err(|err| self.install_error(err))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| self.install_error(err))?;

        tracing::debug!(dir = %dir.display(), file = %self.path.display(), "File watcher installed");
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher unregisters it.
        self.watcher = None;
    }
}

/// [`ChangeNotifier`] driven by hand, through a [`ManualTrigger`].
#[derive(Debug, Default)]
pub struct ManualNotifier {
    trigger: ManualTrigger,
    install_failure: Option<String>,
}

/// Cloneable handle that fires signals into a [`ManualNotifier`].
#[derive(Clone, Default)]
pub struct ManualTrigger {
    sink: Arc<Mutex<Option<SignalSink>>>,
}

impl std::fmt::Debug for ManualTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTrigger")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl ManualTrigger {
    /// Deliver a signal. Returns `false` when no sink is installed.
    pub fn fire(&self, signal: WatchSignal) -> bool {
        let guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sink) => {
                sink(signal);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl ManualNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose installation always fails.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            trigger: ManualTrigger::default(),
            install_failure: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn trigger(&self) -> ManualTrigger {
        self.trigger.clone()
    }
}

impl ChangeNotifier for ManualNotifier {
    fn on_change(&mut self, sink: SignalSink) -> Result<(), WatchError> {
        if let Some(reason) = &self.install_failure {
            return Err(WatchError::Install {
                path: PathBuf::from("<manual>"),
                reason: reason.clone(),
            });
        }
        *self.trigger.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        *self.trigger.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// =============================================================================
// Subscribers
// =============================================================================

/// Handle returned by [`Subscribers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

/// A subscriber callback. Returning `Err` is logged and does not affect other
/// subscribers.
pub type SubscriberFn = dyn Fn(&Arc<Snapshot>) -> Result<(), String> + Send + Sync;

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<SubscriberFn>)>,
}

/// Ordered, cloneable subscriber registry.
///
/// Callbacks run synchronously in registration order. Each broadcast works on
/// the list as it stood when the broadcast began, so a callback may
/// unsubscribe itself (or anyone else) through a cloned handle without
/// disturbing the delivery in flight.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<SubscriberList>>,
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

impl Subscribers {
    fn list(&self) -> std::sync::MutexGuard<'_, SubscriberList> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<Snapshot>) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut list = self.list();
        list.next_id += 1;
        let id = SubscriptionId(list.next_id);
        list.entries.push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.list();
        let before = list.entries.len();
        list.entries.retain(|(entry, _)| *entry != id);
        list.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `snapshot` to every subscriber registered at call time.
    pub fn publish(&self, snapshot: &Arc<Snapshot>) -> Delivery {
        let entries: Vec<_> = self.list().entries.clone();
        let mut delivery = Delivery::default();

        for (id, callback) in entries {
            match catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(reason)) => {
                    delivery.failed += 1;
                    tracing::warn!(subscriber = ?id, %reason, "Snapshot subscriber failed");
                }
                Err(_) => {
                    delivery.failed += 1;
                    tracing::error!(subscriber = ?id, "Snapshot subscriber panicked");
                }
            }
        }

        delivery
    }
}

// =============================================================================
// SnapshotWatcher
// =============================================================================

/// What a single change signal amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// A new snapshot was accepted and published.
    Emitted(Delivery),
    /// The content parsed to the current baseline.
    Unchanged,
    /// The content could not be loaded or parsed; nothing changed.
    Discarded,
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherStats {
    pub notifications: u64,
    pub emitted: u64,
    pub unchanged: u64,
    pub discarded: u64,
    pub observer_failures: u64,
}

/// Turns change signals into de-duplicated snapshot publications.
pub struct SnapshotWatcher<S, N> {
    source: S,
    notifier: N,
    subscribers: Subscribers,
    last_valid: Option<Arc<Snapshot>>,
    is_watching: bool,
    signal_tx: mpsc::Sender<WatchSignal>,
    signal_rx: mpsc::Receiver<WatchSignal>,
    stats: WatcherStats,
}

impl<S, N> std::fmt::Debug for SnapshotWatcher<S, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWatcher")
            .field("is_watching", &self.is_watching)
            .field("has_baseline", &self.last_valid.is_some())
            .field("subscribers", &self.subscribers.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<S: SnapshotSource, N: ChangeNotifier> SnapshotWatcher<S, N> {
    #[must_use]
    pub fn new(source: S, notifier: N) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel();
        Self {
            source,
            notifier,
            subscribers: Subscribers::default(),
            last_valid: None,
            is_watching: false,
            signal_tx,
            signal_rx,
            stats: WatcherStats::default(),
        }
    }

    /// Cloneable handle to the subscriber registry.
    #[must_use]
    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<Snapshot>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// The most recently accepted snapshot.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.last_valid.clone()
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.is_watching
    }

    #[must_use]
    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    /// Seed the baseline with one blocking load and install the notifier.
    ///
    /// A no-op while already watching. A failed seed load leaves the
    /// baseline empty; the first good snapshot is then emitted.
    pub fn start_watching(&mut self) -> Result<(), WatchError> {
        if self.is_watching {
            tracing::debug!("Snapshot watcher already active");
            return Ok(());
        }

        // Signals queued while stopped belong to a previous session.
        while self.signal_rx.try_recv().is_ok() {}

        self.last_valid = match self.source.load() {
            Ok(snapshot) => Some(Arc::new(snapshot)),
            Err(err) => {
                tracing::warn!(error = %err, "Initial snapshot unavailable; waiting for first update");
                None
            }
        };

        let tx = self.signal_tx.clone();
        if let Err(err) = self.notifier.on_change(Box::new(move |signal| {
            // The receiver lives as long as the watcher; a send can only fail
            // after the watcher is gone.
            let _ = tx.send(signal);
        })) {
            self.last_valid = None;
            return Err(err);
        }

        self.is_watching = true;
        tracing::info!(
            has_baseline = self.last_valid.is_some(),
            "Snapshot watcher started"
        );
        Ok(())
    }

    /// Uninstall the notifier. The baseline is kept until the next start
    /// re-seeds it.
    pub fn stop_watching(&mut self) {
        if self.is_watching {
            self.notifier.stop();
            self.is_watching = false;
            tracing::info!("Snapshot watcher stopped");
        }
    }

    /// Handle one change signal: reload, compare, publish if different.
    pub fn notify(&mut self) -> NotifyOutcome {
        self.stats.notifications += 1;

        let snapshot = match self.source.load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.stats.discarded += 1;
                tracing::debug!(error = %err, "Discarding unreadable snapshot");
                return NotifyOutcome::Discarded;
            }
        };

        if self
            .last_valid
            .as_deref()
            .is_some_and(|previous| *previous == snapshot)
        {
            self.stats.unchanged += 1;
            tracing::trace!("Snapshot unchanged");
            return NotifyOutcome::Unchanged;
        }

        let snapshot = Arc::new(snapshot);
        self.last_valid = Some(Arc::clone(&snapshot));
        self.stats.emitted += 1;

        let delivery = self.subscribers.publish(&snapshot);
        tracing::debug!(
            stats = snapshot.stats(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Snapshot change published"
        );
        NotifyOutcome::Emitted(delivery)
    }

    /// Apply a raw notifier signal.
    pub fn handle_signal(&mut self, signal: WatchSignal) -> Result<NotifyOutcome, WatchError> {
        match signal {
            WatchSignal::Changed => Ok(self.notify()),
            WatchSignal::Failed(reason) => {
                self.stats.observer_failures += 1;
                self.notifier.stop();
                self.is_watching = false;
                self.last_valid = None;
                tracing::error!(%reason, "File watcher failed; watching stopped");
                Err(WatchError::Observer(reason))
            }
        }
    }

    /// Handle every signal already queued. Returns how many were handled.
    pub fn process_pending(&mut self) -> Result<usize, WatchError> {
        let mut handled = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            if !self.is_watching {
                continue;
            }
            self.handle_signal(signal)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Block up to `timeout` for the next signal and handle it.
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn wait_for_signal(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<NotifyOutcome>, WatchError> {
        match self.signal_rx.recv_timeout(timeout) {
            Ok(_) if !self.is_watching => Ok(None),
            Ok(signal) => self.handle_signal(signal).map(Some),
            // The watcher owns a sender, so the channel never disconnects
            // while `self` is alive.
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}
