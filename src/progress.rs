//! Progress reporting for fetch and generation phases.
//!
//! Progress is advisory. A sink that panics is caught and logged; the
//! operation it was observing carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::warn;

/// Phases, ordered by execution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressPhase {
    Fetch,
    Cluster,
    Stitch,
    Augment,
    Done,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Fetch => "fetch",
            ProgressPhase::Cluster => "cluster",
            ProgressPhase::Stitch => "stitch",
            ProgressPhase::Augment => "augment",
            ProgressPhase::Done => "done",
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub phase: ProgressPhase,
    pub detail: String,
    /// 0..=100
    pub percent: u8,
    /// Features fetched so far (fetch phase only)
    pub features_so_far: Option<usize>,
}

/// Receiver for progress updates.
///
/// Must not block. Implemented for any `Fn(&ProgressUpdate)` closure.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Sink that ignores every update.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Deliver an update, containing any panic raised by the sink.
pub(crate) fn emit(
    sink: &dyn ProgressSink,
    phase: ProgressPhase,
    percent: u8,
    detail: impl Into<String>,
    features_so_far: Option<usize>,
) {
    let update = ProgressUpdate {
        phase,
        detail: detail.into(),
        percent: percent.min(100),
        features_so_far,
    };
    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_progress(&update))).is_err() {
        warn!(
            "[Progress] Sink panicked during '{}' update, continuing",
            phase.as_str()
        );
    }
}

/// Integer percentage of `done / total`, 100 when `total` is zero.
pub(crate) fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Recording sink that keeps every update, for tests and polling callers.
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
    count: AtomicU32,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all updates received so far.
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Updates for one phase.
    pub fn phase(&self, phase: ProgressPhase) -> Vec<ProgressUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.phase == phase)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update.clone());
        }
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
