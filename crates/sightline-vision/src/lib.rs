mod error;
pub mod assets;
pub mod convert;
pub mod engine;
pub mod frame;
pub mod mapper;
pub mod orient;
pub mod postprocess;
pub mod preprocess;
#[cfg(feature = "engine-tflite")]
pub mod tflite;

use std::time::Duration;

use serde::Serialize;

pub use assets::{check_model_file, LabelTable};
pub use convert::{to_packed, PackedImage};
pub use engine::{EngineSpec, GuardedEngine, InferenceEngine, RawDetectionBatch};
pub use error::{AssetError, EngineError, FrameError};
pub use frame::{FrameFormat, Plane, PlanarFrame, Rotation};
pub use orient::rotate;
pub use postprocess::{postprocess, DropCounts};
pub use preprocess::{prepare_input, InputTensor, Normalization};
#[cfg(feature = "engine-tflite")]
pub use tflite::TfliteEngine;

/// Axis-aligned box with `left <= right` and `top <= bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl BoundingBox {
    /// Build from two corners in any order.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            left: x0.min(x1),
            top: y0.min(y1),
            right: x0.max(x1),
            bottom: y0.max(y1),
        }
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn top(&self) -> f32 {
        self.top
    }

    pub fn right(&self) -> f32 {
        self.right
    }

    pub fn bottom(&self) -> f32 {
        self.bottom
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::from_corners(self.left * sx, self.top * sy, self.right * sx, self.bottom * sy)
    }
}

/// One surviving detection, in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    bounding_box: BoundingBox,
    label: String,
    confidence: f32,
}

impl DetectionResult {
    /// `None` for an empty label or a confidence outside `[0, 1]`.
    pub fn new(bounding_box: BoundingBox, label: impl Into<String>, confidence: f32) -> Option<Self> {
        let label = label.into();
        if label.is_empty() || !(0.0..=1.0).contains(&confidence) {
            return None;
        }
        Some(Self {
            bounding_box,
            label,
            confidence,
        })
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Everything the overlay needs for one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionBatchOutput {
    pub sequence: u64,
    pub source_width: u32,
    pub source_height: u32,
    pub detections: Vec<DetectionResult>,
    #[serde(skip)]
    pub latency: Duration,
}
