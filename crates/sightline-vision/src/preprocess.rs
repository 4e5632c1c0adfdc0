use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::Deserialize;

use crate::convert::PackedImage;

/// Per-channel `(v - mean) / std` applied to 0..=255 samples.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalization {
    // MobileNet SSD family: inputs scaled to [-1, 1]
    fn default() -> Self {
        Self {
            mean: 127.5,
            std: 127.5,
        }
    }
}

/// Square float32 RGB model input, NHWC with batch 1.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    size: u32,
    data: Vec<f32>,
}

impl InputTensor {
    pub fn new(size: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), size as usize * size as usize * 3);
        Self { size, data }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

pub fn prepare_input(image: &PackedImage, size: u32, norm: Normalization) -> InputTensor {
    let rgb = nv21_to_rgb(image);
    let rgb = if rgb.dimensions() == (size, size) {
        rgb
    } else {
        imageops::resize(&rgb, size, size, FilterType::Triangle)
    };
    let data = rgb
        .as_raw()
        .iter()
        .map(|&v| (v as f32 - norm.mean) / norm.std)
        .collect();
    InputTensor::new(size, data)
}

/// Full-range BT.601 NV21 to RGB.
pub fn nv21_to_rgb(image: &PackedImage) -> RgbImage {
    let w = image.width() as usize;
    let luma = image.luma();
    let chroma = image.chroma();
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let (x, y) = (x as usize, y as usize);
        let l = luma[y * w + x] as f32;
        // a chroma row holds w / 2 pairs, i.e. w bytes
        let at = (y / 2) * w + (x / 2) * 2;
        let v = chroma[at] as f32 - 128.0;
        let u = chroma[at + 1] as f32 - 128.0;

        let r = l + 1.402_f32 * v;
        let g = l - 0.344_136_f32 * u - 0.714_136_f32 * v;
        let b = l + 1.772_f32 * u;
        Rgb([clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)])
    })
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
