use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Frame accounting shared by the submitting side and the worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    superseded: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    engine_failures: AtomicU64,
    published: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    /// Replaced in the slot before the worker got to them.
    pub superseded: u64,
    pub processed: u64,
    /// Rejected by the converter (format or bounds).
    pub dropped: u64,
    pub engine_failures: u64,
    pub published: u64,
}

impl PipelineStats {
    pub(crate) fn frame_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn engine_failed(&self) {
        self.engine_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
        }
    }
}
