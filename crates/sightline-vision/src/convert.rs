//! Strided planar YUV 4:2:0 to packed NV21.
//!
//! Output layout: `width * height` luma bytes with no row padding, then one
//! V,U pair per 2x2 luma block, row-major over the half-resolution grid.
//! Every plane's largest offset is checked against its capacity before any
//! byte is copied, so a frame either converts completely or not at all.

use crate::frame::{FrameFormat, Plane, PlanarFrame};
use crate::FrameError;

/// Stride-free NV21 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PackedImage {
    /// Wrap an NV21 buffer. Dimensions must be even and `data` exactly
    /// `width * height * 3 / 2` bytes.
    pub fn from_nv21(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        check_dimensions(width, height)?;
        let expected = packed_len(width, height)?;
        if data.len() != expected {
            return Err(FrameError::UnsupportedFormat(format!(
                "NV21 buffer of {} bytes for {}x{} (expected {})",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, data })
    }

    pub(crate) fn from_raw_parts(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(Some(data.len()), packed_len(width, height).ok());
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Interleaved V,U pairs.
    pub fn chroma(&self) -> &[u8] {
        &self.data[self.luma_len()..]
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

pub(crate) fn packed_len(width: u32, height: u32) -> Result<usize, FrameError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|luma| luma.checked_add(luma / 2))
        .ok_or_else(|| {
            FrameError::UnsupportedFormat(format!("frame {}x{} overflows", width, height))
        })
}

fn check_dimensions(width: u32, height: u32) -> Result<(), FrameError> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(FrameError::UnsupportedFormat(format!(
            "subsampled frame must have positive even dimensions, got {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// Convert a YUV 4:2:0 frame into packed NV21.
pub fn to_packed(frame: &PlanarFrame) -> Result<PackedImage, FrameError> {
    if frame.format() != FrameFormat::Yuv420 {
        return Err(FrameError::UnsupportedFormat(format!("{:?}", frame.format())));
    }
    let (width, height) = (frame.width(), frame.height());
    check_dimensions(width, height)?;

    let (y, u, v) = (frame.y(), frame.u(), frame.v());
    for (name, plane) in [("Y", y), ("U", u), ("V", v)] {
        if plane.pixel_stride() == 0 || plane.row_stride() == 0 {
            return Err(FrameError::UnsupportedFormat(format!(
                "{} plane has a zero stride",
                name
            )));
        }
    }

    let w = width as usize;
    let h = height as usize;
    if y.row_stride() < w {
        return Err(FrameError::UnsupportedFormat(format!(
            "Y row stride {} is shorter than the row width {}",
            y.row_stride(),
            w
        )));
    }

    let (cw, ch) = (w / 2, h / 2);
    check_extent("Y", y, h, w)?;
    check_extent("U", u, ch, cw)?;
    check_extent("V", v, ch, cw)?;

    let mut out = Vec::with_capacity(packed_len(width, height)?);
    copy_luma(y, w, h, &mut out);
    interleave_chroma(v, u, cw, ch, &mut out);

    Ok(PackedImage::from_raw_parts(width, height, out))
}

/// Bytes a plane must hold to serve `rows * cols` samples.
fn required_len(rows: usize, cols: usize, row_stride: usize, pixel_stride: usize) -> Option<usize> {
    (rows - 1)
        .checked_mul(row_stride)?
        .checked_add((cols - 1).checked_mul(pixel_stride)?)?
        .checked_add(1)
}

fn check_extent(name: &'static str, plane: &Plane, rows: usize, cols: usize) -> Result<(), FrameError> {
    let required = required_len(rows, cols, plane.row_stride(), plane.pixel_stride()).unwrap_or(usize::MAX);
    if required > plane.capacity() {
        return Err(FrameError::BufferBounds {
            plane: name,
            required,
            capacity: plane.capacity(),
        });
    }
    Ok(())
}

fn copy_luma(y: &Plane, w: usize, h: usize, out: &mut Vec<u8>) {
    let src = y.data();
    let (rs, ps) = (y.row_stride(), y.pixel_stride());
    for row in 0..h {
        let start = row * rs;
        if ps == 1 {
            out.extend_from_slice(&src[start..start + w]);
        } else {
            out.extend((0..w).map(|col| src[start + col * ps]));
        }
    }
}

// V before U in every pair.
fn interleave_chroma(v: &Plane, u: &Plane, cw: usize, ch: usize, out: &mut Vec<u8>) {
    let (vd, ud) = (v.data(), u.data());
    for row in 0..ch {
        let v_row = row * v.row_stride();
        let u_row = row * u.row_stride();
        for col in 0..cw {
            out.push(vd[v_row + col * v.pixel_stride()]);
            out.push(ud[u_row + col * u.pixel_stride()]);
        }
    }
}
