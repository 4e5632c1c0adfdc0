//! The single background stage: convert, rotate, infer, filter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sightline_vision::{
    postprocess, prepare_input, rotate, to_packed, DetectionBatchOutput, FrameError, GuardedEngine,
    LabelTable, PackedImage, PlanarFrame, RawDetectionBatch, Rotation,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::mailbox::BatchPublisher;
use crate::slot::LatestSlot;
use crate::stats::PipelineStats;

/// A frame waiting in the slot.
pub struct Queued {
    pub sequence: u64,
    pub frame: PlanarFrame,
    pub queued_at: Instant,
}

impl Queued {
    pub fn new(sequence: u64, frame: PlanarFrame) -> Self {
        Self {
            sequence,
            frame,
            queued_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Completed(DetectionBatchOutput),
    /// Stop was requested mid-frame; nothing is published.
    Cancelled,
}

/// Per-frame processing with the engine and labels it owns. Holds no state
/// between frames.
pub struct FrameProcessor {
    config: PipelineConfig,
    engine: GuardedEngine,
    labels: LabelTable,
    stats: Arc<PipelineStats>,
}

impl FrameProcessor {
    pub fn new(
        config: PipelineConfig,
        engine: GuardedEngine,
        labels: LabelTable,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            engine,
            labels,
            stats,
        }
    }

    /// Convert to packed NV21 and release the frame, whether or not
    /// conversion succeeded.
    pub fn convert(&self, job: Queued) -> Result<Converted, FrameError> {
        let Queued {
            sequence,
            frame,
            queued_at,
        } = job;
        let rotation = frame.rotation();
        let packed = to_packed(&frame);
        drop(frame);
        Ok(Converted {
            sequence,
            queued_at,
            rotation,
            packed: packed?,
        })
    }

    /// Rotate, infer and filter a converted frame.
    pub fn finish(&mut self, converted: Converted, cancel: &AtomicBool) -> Outcome {
        let Converted {
            sequence,
            queued_at,
            rotation,
            packed,
        } = converted;
        if cancel.load(Ordering::Acquire) {
            return Outcome::Cancelled;
        }
        let upright = rotate(packed, rotation);
        let (width, height) = (upright.width(), upright.height());
        let input = prepare_input(&upright, self.config.input_size, self.config.normalization());
        drop(upright);

        let started = Instant::now();
        let raw = match self.engine.try_detect(&input) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("worker: frame {}: {:#}; no detections", sequence, e);
                self.stats.engine_failed();
                RawDetectionBatch::empty()
            }
        };
        let detect_time = started.elapsed();

        if cancel.load(Ordering::Acquire) {
            return Outcome::Cancelled;
        }
        let (detections, drops) = postprocess(
            &raw,
            &self.labels,
            self.config.confidence_threshold,
            width,
            height,
        );
        debug!(
            "worker: frame {} {}x{} detect={:?} kept={} raw={} dropped={:?}",
            sequence,
            width,
            height,
            detect_time,
            detections.len(),
            raw.effective_count(),
            drops
        );

        Outcome::Completed(DetectionBatchOutput {
            sequence,
            source_width: width,
            source_height: height,
            detections,
            latency: queued_at.elapsed(),
        })
    }
}

/// A frame past conversion. Its capture buffer is already released.
pub struct Converted {
    sequence: u64,
    queued_at: Instant,
    rotation: Rotation,
    packed: PackedImage,
}

pub(crate) fn run(
    slot: Arc<LatestSlot<Queued>>,
    mut processor: FrameProcessor,
    publisher: BatchPublisher,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
) {
    info!("worker: started");
    while let Some((job, held)) = slot.take() {
        if cancel.load(Ordering::Acquire) {
            drop(job);
            break;
        }
        let sequence = job.sequence;
        let converted = processor.convert(job);
        // `stop` only waits this far.
        drop(held);
        let converted = match converted {
            Ok(converted) => converted,
            Err(e) => {
                stats.frame_dropped();
                warn!("worker: dropped frame {}: {}", sequence, e);
                continue;
            }
        };
        match processor.finish(converted, &cancel) {
            Outcome::Completed(batch) => {
                stats.frame_processed();
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                publisher.publish(batch);
                stats.batch_published();
            }
            Outcome::Cancelled => break,
        }
    }
    info!("worker: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_vision::engine::{CONTRACT_VERSION, OUTPUT_ARITY};
    use sightline_vision::{
        EngineError, EngineSpec, FrameFormat, InferenceEngine, InputTensor, Plane,
    };
    use std::sync::atomic::AtomicUsize;

    struct OneBox;

    impl InferenceEngine for OneBox {
        fn spec(&self) -> EngineSpec {
            EngineSpec {
                name: "one-box",
                input_size: 4,
                max_detections: 2,
                output_arity: OUTPUT_ARITY,
                contract_version: CONTRACT_VERSION,
            }
        }

        fn detect(&mut self, _input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
            Ok(RawDetectionBatch {
                boxes: vec![[0.0, 0.0, 0.5, 0.25], [0.0; 4]],
                classes: vec![1.0, 0.0],
                scores: vec![0.8, 0.1],
                count: 2.0,
            })
        }
    }

    struct Failing;

    impl InferenceEngine for Failing {
        fn spec(&self) -> EngineSpec {
            EngineSpec { name: "failing", ..OneBox.spec() }
        }

        fn detect(&mut self, _input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
            Err(EngineError::Fault("delegate lost".into()))
        }
    }

    fn process(p: &mut FrameProcessor, job: Queued, cancel: &AtomicBool) -> Result<Outcome, FrameError> {
        let converted = p.convert(job)?;
        Ok(p.finish(converted, cancel))
    }

    fn processor(engine: Box<dyn InferenceEngine>) -> (FrameProcessor, Arc<PipelineStats>) {
        let config = PipelineConfig { input_size: 4, ..Default::default() };
        let stats = Arc::new(PipelineStats::default());
        let engine = GuardedEngine::new(engine, 4).unwrap();
        let labels = LabelTable::from_names(["cat", "dog"]);
        (FrameProcessor::new(config, engine, labels, stats.clone()), stats)
    }

    fn frame(width: u32, height: u32, rotation: Rotation, released: &Arc<AtomicUsize>) -> PlanarFrame {
        let (w, h) = (width as usize, height as usize);
        let counter = released.clone();
        PlanarFrame::new(
            FrameFormat::Yuv420,
            width,
            height,
            rotation,
            Plane::new(vec![128u8; w * h], w, 1),
            Plane::new(vec![128u8; w * h / 4], w / 2, 1),
            Plane::new(vec![128u8; w * h / 4], w / 2, 1),
        )
        .with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn rotated_frame_reports_upright_dimensions() {
        let (mut p, _) = processor(Box::new(OneBox));
        let released = Arc::new(AtomicUsize::new(0));
        let job = Queued::new(1, frame(8, 4, Rotation::R90, &released));
        let cancel = AtomicBool::new(false);

        let Outcome::Completed(batch) = process(&mut p, job, &cancel).unwrap() else {
            panic!("frame was cancelled");
        };
        assert_eq!((batch.source_width, batch.source_height), (4, 8));
        assert_eq!(batch.detections.len(), 1);
        let det = &batch.detections[0];
        assert_eq!(det.label(), "dog");
        let b = det.bounding_box();
        assert_eq!((b.left(), b.top(), b.right(), b.bottom()), (0.0, 0.0, 1.0, 4.0));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_frame_is_still_released() {
        let (mut p, _) = processor(Box::new(OneBox));
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let short = PlanarFrame::new(
            FrameFormat::Yuv420,
            4,
            4,
            Rotation::R0,
            Plane::new(vec![0u8; 15], 4, 1),
            Plane::new(vec![0u8; 4], 2, 1),
            Plane::new(vec![0u8; 4], 2, 1),
        )
        .with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = process(&mut p, Queued::new(1, short), &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, FrameError::BufferBounds { plane: "Y", .. }));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_failure_yields_an_empty_batch() {
        let (mut p, stats) = processor(Box::new(Failing));
        let released = Arc::new(AtomicUsize::new(0));
        let job = Queued::new(3, frame(4, 4, Rotation::R0, &released));

        match process(&mut p, job, &AtomicBool::new(false)).unwrap() {
            Outcome::Completed(batch) => {
                assert_eq!(batch.sequence, 3);
                assert!(batch.detections.is_empty());
            }
            Outcome::Cancelled => panic!("frame was cancelled"),
        }
        assert_eq!(stats.snapshot().engine_failures, 1);
    }

    #[test]
    fn cancelled_frame_is_released_and_not_completed() {
        let (mut p, _) = processor(Box::new(OneBox));
        let released = Arc::new(AtomicUsize::new(0));
        let job = Queued::new(1, frame(4, 4, Rotation::R0, &released));
        let outcome = process(&mut p, job, &AtomicBool::new(true)).unwrap();
        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rgba_frame_is_refused_and_released() {
        let (p, _) = processor(Box::new(OneBox));
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let rgba = PlanarFrame::new(
            FrameFormat::Rgba8888,
            4,
            4,
            Rotation::R0,
            Plane::new(vec![0u8; 64], 16, 4),
            Plane::new(Vec::new(), 0, 1),
            Plane::new(Vec::new(), 0, 1),
        )
        .with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = p.convert(Queued::new(1, rgba)).err().unwrap();
        assert!(matches!(err, FrameError::UnsupportedFormat(_)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
