//! Source-image pixels to view pixels.
//!
//! The overlay stretches full-bleed: each axis gets its own factor and the
//! aspect ratio is not kept. Factors are derived from the batch being drawn,
//! because a 90/270 rotation swaps the source dimensions between frames.

use serde::Serialize;

use crate::{BoundingBox, DetectionBatchOutput};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

impl ScaleFactors {
    /// `None` when either space has a zero dimension.
    pub fn between(source_width: u32, source_height: u32, view_width: u32, view_height: u32) -> Option<Self> {
        if source_width == 0 || source_height == 0 || view_width == 0 || view_height == 0 {
            return None;
        }
        Some(Self {
            x: view_width as f32 / source_width as f32,
            y: view_height as f32 / source_height as f32,
        })
    }

    pub fn for_batch(batch: &DetectionBatchOutput, view_width: u32, view_height: u32) -> Option<Self> {
        Self::between(batch.source_width, batch.source_height, view_width, view_height)
    }

    pub fn apply(&self, bounding_box: &BoundingBox) -> BoundingBox {
        bounding_box.scaled(self.x, self.y)
    }
}

/// A box ready to draw, with its caption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayBox {
    pub rect: BoundingBox,
    pub caption: String,
}

pub fn map_batch(batch: &DetectionBatchOutput, view_width: u32, view_height: u32) -> Vec<OverlayBox> {
    let Some(scale) = ScaleFactors::for_batch(batch, view_width, view_height) else {
        return Vec::new();
    };
    batch
        .detections
        .iter()
        .map(|d| OverlayBox {
            rect: scale.apply(d.bounding_box()),
            caption: format!("{} ({:.2})", d.label(), d.confidence()),
        })
        .collect()
}
