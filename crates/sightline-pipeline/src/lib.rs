//! Live frame pipeline: a keep-latest slot in front of one worker thread and
//! a one-slot mailbox behind it.
//!
//! ```text
//! submit(frame) -> LatestSlot -> worker (convert, rotate, infer, filter) -> mailbox -> overlay
//! ```

pub mod config;
pub mod doctor;
mod error;
pub mod mailbox;
pub mod slot;
pub mod stats;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sightline_vision::{GuardedEngine, InferenceEngine, LabelTable, PlanarFrame};
use tracing::{debug, info, warn};

pub use config::{AssetsConfig, PipelineConfig};
pub use error::StartupError;
pub use mailbox::{BatchReceiver, SharedBatch};
pub use slot::Offer;
pub use stats::StatsSnapshot;

use mailbox::mailbox;
use slot::LatestSlot;
use stats::PipelineStats;
use worker::{FrameProcessor, Queued};

pub struct Pipeline {
    slot: Arc<LatestSlot<Queued>>,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    next_sequence: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Validate everything up front and spawn the worker. Any failure here
    /// means no frame is ever accepted.
    pub fn start(
        config: PipelineConfig,
        engine: Box<dyn InferenceEngine>,
        labels: LabelTable,
    ) -> Result<(Self, BatchReceiver), StartupError> {
        config.validate()?;
        if labels.is_empty() {
            return Err(StartupError::Config("label table is empty".into()));
        }
        let engine = GuardedEngine::new(engine, config.input_size)?;
        info!(
            "pipeline: starting (threshold {}, input {}x{}, {} labels)",
            config.confidence_threshold,
            config.input_size,
            config.input_size,
            labels.len()
        );

        let slot = Arc::new(LatestSlot::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PipelineStats::default());
        let (publisher, receiver) = mailbox();
        let processor = FrameProcessor::new(config, engine, labels, stats.clone());

        let handle = {
            let (slot, cancel, stats) = (slot.clone(), cancel.clone(), stats.clone());
            thread::Builder::new()
                .name("sightline-worker".into())
                .spawn(move || worker::run(slot, processor, publisher, cancel, stats))
                .map_err(StartupError::Spawn)?
        };

        let pipeline = Self {
            slot,
            cancel,
            stats,
            next_sequence: AtomicU64::new(0),
            worker: Some(handle),
        };
        Ok((pipeline, receiver))
    }

    /// Hand a frame to the worker. Never blocks on processing; a frame still
    /// waiting from an earlier call is dropped and released.
    pub fn submit(&self, frame: PlanarFrame) -> Offer {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.frame_submitted();
        let outcome = self.slot.offer(Queued::new(sequence, frame));
        match outcome {
            Offer::Accepted => {}
            Offer::Superseded => self.stats.frame_superseded(),
            Offer::Closed => debug!("pipeline: frame {} arrived after stop", sequence),
        }
        outcome
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Request shutdown. Before this returns, the waiting frame is released
    /// and a frame mid-conversion has been converted and released. Inference
    /// in progress is not waited for; its result is discarded.
    pub fn stop(&self) {
        if self.cancel.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slot.close();
        info!("pipeline: stop requested");
    }

    /// Stop and wait for the worker to exit.
    pub fn join(mut self) -> StatsSnapshot {
        self.stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("pipeline: worker thread panicked");
            }
        }
        let s = self.stats.snapshot();
        info!(
            "pipeline: stopped (submitted {}, superseded {}, processed {}, dropped {}, engine failures {}, published {})",
            s.submitted, s.superseded, s.processed, s.dropped, s.engine_failures, s.published
        );
        s
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
