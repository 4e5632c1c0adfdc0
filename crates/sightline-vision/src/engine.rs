//! Inference engine contract.
//!
//! An engine takes a normalized square RGB tensor and fills the four SSD
//! post-processing outputs: boxes, class ids, scores and a detection count.
//! Engines are untrusted. `GuardedEngine` is the single call site the
//! pipeline uses; it validates the declared contract once at startup and
//! every batch afterwards, so a faulty engine costs one frame's detections
//! and nothing else.

use std::panic::{self, AssertUnwindSafe};

use tracing::{info, warn};

use crate::preprocess::InputTensor;
use crate::EngineError;

/// Boxes, classes, scores, count.
pub const OUTPUT_ARITY: usize = 4;
pub const CONTRACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub name: &'static str,
    /// Side of the square input the engine expects.
    pub input_size: u32,
    /// Slot capacity of every output array.
    pub max_detections: usize,
    pub output_arity: usize,
    pub contract_version: u32,
}

/// Raw engine output for one frame.
///
/// Boxes are normalized `[ymin, xmin, ymax, xmax]`. Classes and count are
/// floats because that is how SSD exports emit them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetectionBatch {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
    pub count: f32,
}

impl RawDetectionBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reported count as an index bound, never past the shortest array.
    pub fn effective_count(&self) -> usize {
        let slots = self.boxes.len().min(self.classes.len()).min(self.scores.len());
        if self.count.is_nan() || self.count <= 0.0 {
            return 0;
        }
        // float to int casts saturate
        (self.count as usize).min(slots)
    }
}

pub trait InferenceEngine: Send {
    fn spec(&self) -> EngineSpec;

    fn detect(&mut self, input: &InputTensor) -> Result<RawDetectionBatch, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn spec(&self) -> EngineSpec {
        (**self).spec()
    }

    fn detect(&mut self, input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
        (**self).detect(input)
    }
}

pub struct GuardedEngine {
    inner: Box<dyn InferenceEngine>,
    spec: EngineSpec,
}

impl GuardedEngine {
    /// Reject an engine whose contract differs from what the pipeline feeds
    /// and reads, before any frame reaches it.
    pub fn new(inner: Box<dyn InferenceEngine>, input_size: u32) -> Result<Self, EngineError> {
        let spec = inner.spec();
        if spec.contract_version != CONTRACT_VERSION {
            return Err(EngineError::Contract(format!(
                "{} implements contract v{}, expected v{}",
                spec.name, spec.contract_version, CONTRACT_VERSION
            )));
        }
        if spec.output_arity != OUTPUT_ARITY {
            return Err(EngineError::Contract(format!(
                "{} produces {} outputs, expected {}",
                spec.name, spec.output_arity, OUTPUT_ARITY
            )));
        }
        if spec.input_size != input_size {
            return Err(EngineError::Contract(format!(
                "{} expects {}x{} input, pipeline is configured for {}x{}",
                spec.name, spec.input_size, spec.input_size, input_size, input_size
            )));
        }
        if spec.max_detections == 0 {
            return Err(EngineError::Contract(format!("{} declares zero detection slots", spec.name)));
        }
        info!(
            "engine: {} ready (input {}x{}, {} slots)",
            spec.name, spec.input_size, spec.input_size, spec.max_detections
        );
        Ok(Self { inner, spec })
    }

    /// Run the engine and validate its output. Panics inside the engine are
    /// caught and reported as `EngineError::Fault`.
    pub fn try_detect(&mut self, input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
        let inner = &mut self.inner;
        let batch = match panic::catch_unwind(AssertUnwindSafe(|| inner.detect(input))) {
            Ok(result) => result?,
            Err(payload) => return Err(EngineError::Fault(panic_message(payload.as_ref()))),
        };
        self.validate(batch)
    }

    fn validate(&self, mut batch: RawDetectionBatch) -> Result<RawDetectionBatch, EngineError> {
        let max = self.spec.max_detections;
        let lens = (batch.boxes.len(), batch.classes.len(), batch.scores.len());
        if lens != (max, max, max) {
            return Err(EngineError::Malformed(format!(
                "output lengths (boxes {}, classes {}, scores {}) do not match {} slots",
                lens.0, lens.1, lens.2, max
            )));
        }
        if batch.count.is_nan() || batch.count < 0.0 {
            return Err(EngineError::Malformed(format!("detection count {}", batch.count)));
        }
        if batch.count > max as f32 {
            warn!("engine: reported {} detections for {} slots; clamping", batch.count, max);
            batch.count = max as f32;
        }
        Ok(batch)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        spec: EngineSpec,
        next: Option<Result<RawDetectionBatch, EngineError>>,
        panic: bool,
    }

    fn spec(max: usize) -> EngineSpec {
        EngineSpec {
            name: "scripted",
            input_size: 2,
            max_detections: max,
            output_arity: OUTPUT_ARITY,
            contract_version: CONTRACT_VERSION,
        }
    }

    impl InferenceEngine for Scripted {
        fn spec(&self) -> EngineSpec {
            self.spec.clone()
        }

        fn detect(&mut self, _input: &InputTensor) -> Result<RawDetectionBatch, EngineError> {
            if self.panic {
                panic!("tensor arena exhausted");
            }
            self.next.take().unwrap_or_else(|| Ok(RawDetectionBatch::empty()))
        }
    }

    fn guarded(next: Result<RawDetectionBatch, EngineError>, panic: bool) -> GuardedEngine {
        let engine = Scripted {
            spec: spec(3),
            next: Some(next),
            panic,
        };
        GuardedEngine::new(Box::new(engine), 2).unwrap()
    }

    fn input() -> InputTensor {
        InputTensor::new(2, vec![0.0; 12])
    }

    fn full(count: f32) -> RawDetectionBatch {
        RawDetectionBatch {
            boxes: vec![[0.0, 0.0, 1.0, 1.0]; 3],
            classes: vec![0.0; 3],
            scores: vec![0.9; 3],
            count,
        }
    }

    #[test]
    fn rejects_mismatched_contracts_at_startup() {
        let mut s = spec(10);
        s.output_arity = 3;
        let engine = Scripted { spec: s, next: None, panic: false };
        assert!(matches!(
            GuardedEngine::new(Box::new(engine), 2),
            Err(EngineError::Contract(_))
        ));

        let engine = Scripted { spec: spec(10), next: None, panic: false };
        assert!(matches!(
            GuardedEngine::new(Box::new(engine), 320),
            Err(EngineError::Contract(_))
        ));

        let mut s = spec(10);
        s.contract_version = 2;
        let engine = Scripted { spec: s, next: None, panic: false };
        assert!(GuardedEngine::new(Box::new(engine), 2).is_err());
    }

    #[test]
    fn over_capacity_count_is_clamped() {
        let mut engine = guarded(Ok(full(250.0)), false);
        let batch = engine.try_detect(&input()).unwrap();
        assert_eq!(batch.count, 3.0);
        assert_eq!(batch.effective_count(), 3);
    }

    #[test]
    fn faults_and_malformed_output_are_reported() {
        let mut engine = guarded(Err(EngineError::Fault("invoke failed".into())), false);
        assert!(matches!(engine.try_detect(&input()), Err(EngineError::Fault(_))));

        let mut short = full(2.0);
        short.scores.truncate(1);
        let mut engine = guarded(Ok(short), false);
        assert!(matches!(engine.try_detect(&input()), Err(EngineError::Malformed(_))));

        let mut engine = guarded(Ok(full(f32::NAN)), false);
        assert!(matches!(engine.try_detect(&input()), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn panics_are_caught_at_the_boundary() {
        let mut engine = guarded(Ok(full(1.0)), true);
        match engine.try_detect(&input()) {
            Err(EngineError::Fault(msg)) => assert!(msg.contains("arena")),
            other => panic!("unexpected {:?}", other),
        }
        // still callable after a caught panic
        assert!(matches!(engine.try_detect(&input()), Err(EngineError::Fault(_))));
    }

    #[test]
    fn effective_count_never_exceeds_arrays() {
        let mut batch = full(2.9);
        assert_eq!(batch.effective_count(), 2);
        batch.count = f32::INFINITY;
        assert_eq!(batch.effective_count(), 3);
        batch.count = -1.0;
        assert_eq!(batch.effective_count(), 0);
    }
}
