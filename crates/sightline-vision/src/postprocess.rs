use tracing::warn;

use crate::engine::RawDetectionBatch;
use crate::assets::LabelTable;
use crate::{BoundingBox, DetectionResult};

/// Why raw entries did not survive, per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    pub below_threshold: usize,
    pub invalid_class: usize,
    pub malformed: usize,
}

/// Filter raw engine output into pixel-space detections.
///
/// Entries are visited in engine order and survivors keep that order.
/// Boxes come out clamped to `[0, image_width] x [0, image_height]`.
pub fn postprocess(
    raw: &RawDetectionBatch,
    labels: &LabelTable,
    threshold: f32,
    image_width: u32,
    image_height: u32,
) -> (Vec<DetectionResult>, DropCounts) {
    let (w, h) = (image_width as f32, image_height as f32);
    let mut out = Vec::new();
    let mut drops = DropCounts::default();

    for i in 0..raw.effective_count() {
        let score = raw.scores[i];
        // NaN fails this comparison too
        if !(score >= threshold) {
            drops.below_threshold += 1;
            continue;
        }
        if score > 1.0 {
            warn!("postprocess: slot {} has score {} outside [0, 1]", i, score);
            drops.malformed += 1;
            continue;
        }

        let class = raw.classes[i];
        let label = class_index(class, labels.len()).and_then(|id| labels.get(id));
        let Some(label) = label else {
            warn!(
                "postprocess: slot {} has class id {} outside {} labels",
                i,
                class,
                labels.len()
            );
            drops.invalid_class += 1;
            continue;
        };

        let [ymin, xmin, ymax, xmax] = raw.boxes[i];
        if ![ymin, xmin, ymax, xmax].iter().all(|v| v.is_finite()) {
            warn!("postprocess: slot {} has a non-finite box", i);
            drops.malformed += 1;
            continue;
        }
        let bounding_box = BoundingBox::from_corners(
            xmin.clamp(0.0, 1.0) * w,
            ymin.clamp(0.0, 1.0) * h,
            xmax.clamp(0.0, 1.0) * w,
            ymax.clamp(0.0, 1.0) * h,
        );

        match DetectionResult::new(bounding_box, label, score) {
            Some(det) => out.push(det),
            None => drops.malformed += 1,
        }
    }

    (out, drops)
}

fn class_index(raw: f32, label_count: usize) -> Option<usize> {
    if !raw.is_finite() {
        return None;
    }
    let id = raw.trunc();
    if id < 0.0 || id >= label_count as f32 {
        return None;
    }
    Some(id as usize)
}
