//! Stand-in capture sources producing YUV 4:2:0 frames the way a camera
//! stack hands them over: padded rows, planar or interleaved chroma, and a
//! small pool of buffers that must come back before new ones go out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use image::{Rgb, RgbImage};
use rand::Rng;
use sightline_vision::{FrameFormat, PlanarFrame, Plane, Rotation};
use tracing::{debug, info, warn};

/// Buffers a capture stack keeps in flight.
pub const POOL_BUFFERS: usize = 4;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SourceConfig {
    pub kind: String, // "synthetic" | "images"
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Clockwise degrees the sensor image must turn to be upright.
    #[serde(default)]
    pub rotation: u32,
    #[serde(default)]
    pub row_padding: usize,
    /// 1 = planar chroma, 2 = interleaved VU (semiplanar).
    #[serde(default = "default_chroma_pixel_stride")]
    pub chroma_pixel_stride: usize,
    pub dir: Option<PathBuf>,
}

fn default_fps() -> u32 {
    15
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_chroma_pixel_stride() -> usize {
    2
}

impl SourceConfig {
    pub fn check(&self) -> Result<()> {
        anyhow::ensure!(self.fps >= 1 && self.fps <= 120, "source.fps should be 1..120");
        anyhow::ensure!(
            matches!(self.chroma_pixel_stride, 1 | 2),
            "source.chroma_pixel_stride must be 1 or 2"
        );
        Rotation::from_degrees(self.rotation).context("source.rotation")?;
        match self.kind.as_str() {
            "synthetic" => {
                anyhow::ensure!(
                    self.width >= 2 && self.height >= 2 && self.width % 2 == 0 && self.height % 2 == 0,
                    "source.width/height must be even and >= 2"
                );
            }
            "images" => {
                let dir = self.dir.as_ref().context("source.dir missing (kind=images)")?;
                anyhow::ensure!(dir.is_dir(), "source.dir is not a directory: {}", dir.display());
            }
            other => anyhow::bail!("unknown source.kind: {}", other),
        }
        Ok(())
    }
}

enum Content {
    Synthetic { width: u32, height: u32 },
    Images { frames: Vec<RgbImage>, next: usize },
}

pub struct FrameSource {
    content: Content,
    rotation: Rotation,
    layout: Layout,
    outstanding: Arc<AtomicUsize>,
}

impl FrameSource {
    pub fn open(cfg: &SourceConfig) -> Result<Self> {
        cfg.check()?;
        let content = match cfg.kind.as_str() {
            "synthetic" => Content::Synthetic {
                width: cfg.width,
                height: cfg.height,
            },
            "images" => {
                let dir = cfg.dir.as_ref().context("source.dir missing (kind=images)")?;
                Content::Images {
                    frames: load_images(dir)?,
                    next: 0,
                }
            }
            other => anyhow::bail!("unknown source.kind: {}", other),
        };
        Ok(Self {
            content,
            rotation: Rotation::from_degrees(cfg.rotation)?,
            layout: Layout {
                row_padding: cfg.row_padding,
                chroma_pixel_stride: cfg.chroma_pixel_stride,
            },
            outstanding: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Next frame, or `None` while every pool buffer is still leased out.
    pub fn next_frame(&mut self) -> Option<PlanarFrame> {
        if self.outstanding.load(Ordering::Acquire) >= POOL_BUFFERS {
            return None;
        }
        let rgb = match &mut self.content {
            Content::Synthetic { width, height } => synthetic_scene(*width, *height),
            Content::Images { frames, next } => {
                let img = frames[*next].clone();
                *next = (*next + 1) % frames.len();
                img
            }
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = self.outstanding.clone();
        Some(
            self.layout
                .frame_from_rgb(&rgb, self.rotation)
                .with_release(move || {
                    outstanding.fetch_sub(1, Ordering::AcqRel);
                }),
        )
    }

    /// Frames handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

fn load_images(dir: &Path) -> Result<Vec<RgbImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read source.dir {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut frames = Vec::new();
    for path in paths {
        match image::open(&path) {
            Ok(img) => {
                let rgb = even_crop(img.to_rgb8());
                if rgb.width() == 0 || rgb.height() == 0 {
                    warn!("source: {} is too small; skipping", path.display());
                    continue;
                }
                debug!("source: loaded {} ({}x{})", path.display(), rgb.width(), rgb.height());
                frames.push(rgb);
            }
            Err(e) => warn!("source: skipping {}: {}", path.display(), e),
        }
    }
    anyhow::ensure!(!frames.is_empty(), "no decodable images in {}", dir.display());
    info!("source: replaying {} images from {}", frames.len(), dir.display());
    Ok(frames)
}

/// 4:2:0 needs even dimensions; drop a trailing row/column if odd.
fn even_crop(img: RgbImage) -> RgbImage {
    let (w, h) = (img.width() & !1, img.height() & !1);
    if (w, h) == img.dimensions() {
        return img;
    }
    image::imageops::crop_imm(&img, 0, 0, w, h).to_image()
}

/// A dark background with a few random bright rectangles.
fn synthetic_scene(width: u32, height: u32) -> RgbImage {
    let mut rng = rand::thread_rng();
    let base = Rgb([rng.gen_range(10..60), rng.gen_range(10..60), rng.gen_range(10..60)]);
    let mut img = RgbImage::from_pixel(width, height, base);
    for _ in 0..rng.gen_range(1..=3) {
        let x0 = rng.gen_range(0..width);
        let y0 = rng.gen_range(0..height);
        let x1 = (x0 + rng.gen_range(1..=width / 2 + 1)).min(width);
        let y1 = (y0 + rng.gen_range(1..=height / 2 + 1)).min(height);
        let color = Rgb([rng.gen(), rng.gen(), rng.gen()]);
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, color);
            }
        }
    }
    img
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    row_padding: usize,
    chroma_pixel_stride: usize,
}

impl Layout {
    /// Full-range BT.601 RGB to YUV 4:2:0, chroma averaged per 2x2 block.
    /// `rgb` must have even dimensions.
    fn frame_from_rgb(&self, rgb: &RgbImage, rotation: Rotation) -> PlanarFrame {
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        let (cw, ch) = (w / 2, h / 2);
        let pad = self.row_padding;

        let y_rs = w + pad;
        let mut y = vec![0u8; y_rs * h];
        for (px, py, p) in rgb.enumerate_pixels() {
            y[py as usize * y_rs + px as usize] = luma(p);
        }

        let mut us = Vec::with_capacity(cw * ch);
        let mut vs = Vec::with_capacity(cw * ch);
        for by in 0..ch {
            for bx in 0..cw {
                let (mut u, mut v) = (0f32, 0f32);
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let p = rgb.get_pixel((bx * 2 + dx) as u32, (by * 2 + dy) as u32);
                    let (pu, pv) = chroma(p);
                    u += pu;
                    v += pv;
                }
                us.push(to_u8(u / 4.0));
                vs.push(to_u8(v / 4.0));
            }
        }

        let (u_plane, v_plane) = if self.chroma_pixel_stride == 1 {
            let rs = cw + pad;
            let mut u = vec![0u8; rs * ch];
            let mut v = vec![0u8; rs * ch];
            for row in 0..ch {
                u[row * rs..row * rs + cw].copy_from_slice(&us[row * cw..(row + 1) * cw]);
                v[row * rs..row * rs + cw].copy_from_slice(&vs[row * cw..(row + 1) * cw]);
            }
            (Plane::new(u, rs, 1), Plane::new(v, rs, 1))
        } else {
            // One VU buffer shared by both planes; the last row carries no padding.
            let rs = cw * 2 + pad;
            let len = rs * (ch - 1) + cw * 2;
            let mut vu = vec![0u8; len];
            for row in 0..ch {
                for col in 0..cw {
                    vu[row * rs + col * 2] = vs[row * cw + col];
                    vu[row * rs + col * 2 + 1] = us[row * cw + col];
                }
            }
            let vu = Bytes::from(vu);
            (
                Plane::new(vu.slice(1..len), rs, 2),
                Plane::new(vu.slice(0..len - 1), rs, 2),
            )
        };

        PlanarFrame::new(
            FrameFormat::Yuv420,
            w as u32,
            h as u32,
            rotation,
            Plane::new(y, y_rs, 1),
            u_plane,
            v_plane,
        )
    }
}

fn luma(p: &Rgb<u8>) -> u8 {
    let [r, g, b] = p.0.map(f32::from);
    to_u8(0.299 * r + 0.587 * g + 0.114 * b)
}

fn chroma(p: &Rgb<u8>) -> (f32, f32) {
    let [r, g, b] = p.0.map(f32::from);
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    (u, v)
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_vision::to_packed;

    fn synthetic(stride: usize, padding: usize) -> SourceConfig {
        SourceConfig {
            kind: "synthetic".into(),
            fps: 30,
            width: 8,
            height: 6,
            rotation: 90,
            row_padding: padding,
            chroma_pixel_stride: stride,
            dir: None,
        }
    }

    #[test]
    fn both_chroma_layouts_convert_to_the_same_image() {
        let rgb = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 200]));
        let planar = Layout { row_padding: 3, chroma_pixel_stride: 1 }.frame_from_rgb(&rgb, Rotation::R0);
        let semi = Layout { row_padding: 5, chroma_pixel_stride: 2 }.frame_from_rgb(&rgb, Rotation::R0);
        assert_eq!(semi.u().capacity(), semi.v().capacity());
        assert_eq!(to_packed(&planar).unwrap(), to_packed(&semi).unwrap());
    }

    #[test]
    fn gray_pixels_have_neutral_chroma() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([77, 77, 77]));
        let frame = Layout { row_padding: 0, chroma_pixel_stride: 1 }.frame_from_rgb(&rgb, Rotation::R0);
        assert!(frame.y().data().iter().all(|&v| v == 77));
        assert!(frame.u().data().iter().all(|&v| v == 128));
        assert!(frame.v().data().iter().all(|&v| v == 128));
    }

    #[test]
    fn pool_is_bounded_until_frames_come_back() {
        let mut source = FrameSource::open(&synthetic(2, 4)).unwrap();
        let frames: Vec<_> = (0..POOL_BUFFERS).map(|_| source.next_frame().unwrap()).collect();
        assert_eq!(frames[0].rotation(), Rotation::R90);
        assert!(source.next_frame().is_none());
        drop(frames);
        assert_eq!(source.outstanding(), 0);
        assert!(source.next_frame().is_some());
    }

    #[test]
    fn images_are_replayed_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(5, 4, Rgb([255, 255, 255])).save(dir.path().join("b.png")).unwrap();
        RgbImage::from_pixel(6, 6, Rgb([0, 0, 0])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let cfg = SourceConfig {
            kind: "images".into(),
            rotation: 0,
            dir: Some(dir.path().to_path_buf()),
            ..synthetic(1, 0)
        };
        let mut source = FrameSource::open(&cfg).unwrap();
        let dims: Vec<_> = (0..3)
            .map(|_| {
                let f = source.next_frame().unwrap();
                (f.width(), f.height())
            })
            .collect();
        assert_eq!(dims, [(6, 6), (4, 4), (6, 6)]);
    }

    #[test]
    fn rejects_bad_settings() {
        let mut cfg = synthetic(3, 0);
        assert!(cfg.check().is_err());
        cfg.chroma_pixel_stride = 2;
        cfg.rotation = 45;
        assert!(cfg.check().is_err());
        cfg.rotation = 0;
        cfg.kind = "webcam".into();
        assert!(cfg.check().is_err());
    }
}
