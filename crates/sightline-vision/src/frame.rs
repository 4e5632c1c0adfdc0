//! Planar sensor frames as handed over by a capture source.
//!
//! A `PlanarFrame` owns its plane buffers and a `FrameLease`. The lease runs
//! its release callback exactly once, when the frame is dropped, so a capture
//! buffer goes back to its pool on every path: processed, rejected,
//! superseded by a newer frame, or drained at shutdown.

use std::fmt;

use bytes::Bytes;

use crate::FrameError;

/// Pixel layout tag reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Three planes, chroma subsampled 2x2 (YUV 4:2:0, planar or semiplanar).
    Yuv420,
    Rgba8888,
}

/// Clockwise rotation that makes a sensor frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self, FrameError> {
        match degrees {
            0 => Ok(Self::R0),
            90 => Ok(Self::R90),
            180 => Ok(Self::R180),
            270 => Ok(Self::R270),
            other => Err(FrameError::UnsupportedFormat(format!(
                "rotation of {} degrees",
                other
            ))),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::R0 => 0,
            Self::R90 => 90,
            Self::R180 => 180,
            Self::R270 => 270,
        }
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::R0 => Self::R0,
            Self::R90 => Self::R270,
            Self::R180 => Self::R180,
            Self::R270 => Self::R90,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::R90 | Self::R270)
    }
}

/// One channel buffer with its hardware strides.
#[derive(Clone)]
pub struct Plane {
    data: Bytes,
    row_stride: usize,
    pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Declared capacity of the backing buffer. No read may go past it.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("len", &self.data.len())
            .field("row_stride", &self.row_stride)
            .field("pixel_stride", &self.pixel_stride)
            .finish()
    }
}

/// Returns a capture buffer to its owner when dropped.
#[derive(Default)]
pub struct FrameLease {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameLease {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub struct PlanarFrame {
    format: FrameFormat,
    width: u32,
    height: u32,
    rotation: Rotation,
    planes: [Plane; 3],
    lease: FrameLease,
}

impl PlanarFrame {
    /// Planes are given in Y, U, V order.
    pub fn new(
        format: FrameFormat,
        width: u32,
        height: u32,
        rotation: Rotation,
        y: Plane,
        u: Plane,
        v: Plane,
    ) -> Self {
        Self {
            format,
            width,
            height,
            rotation,
            planes: [y, u, v],
            lease: FrameLease::default(),
        }
    }

    /// Attach the callback that hands the backing buffer back to the source.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.lease = FrameLease::new(release);
        self
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn y(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn u(&self) -> &Plane {
        &self.planes[1]
    }

    pub fn v(&self) -> &Plane {
        &self.planes[2]
    }
}

impl fmt::Debug for PlanarFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanarFrame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .field("planes", &self.planes)
            .field("leased", &self.lease.release.is_some())
            .finish()
    }
}
