//! Image containers and pinhole intrinsics for the tracking pyramid.
//!
//! Maps are dense row-major buffers. Invalid samples ("holes") are marked
//! in-band: depth and uncertainty use non-positive values, four-component
//! maps (normals, rendered points) use a non-positive `w`.

mod engine;

pub use engine::{CpuImageEngine, ImageEngine};

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size after one 2× subsampling step.
    pub fn halved(&self) -> Self {
        Self::new(self.width / 2, self.height / 2)
    }

    /// Size of pyramid level `level` (level 0 is this size).
    pub fn at_level(&self, level: usize) -> Self {
        Self::new(self.width >> level, self.height >> level)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A pixel type that carries its own invalid marker.
pub trait HoleSample: Copy + Send + Sync + 'static {
    /// Value written where no valid sample exists.
    const HOLE: Self;

    fn is_hole(&self) -> bool;

    /// Mean of a non-empty set of valid samples.
    fn mean(samples: &[Self]) -> Self;
}

impl HoleSample for f32 {
    const HOLE: Self = -1.0;

    #[inline]
    fn is_hole(&self) -> bool {
        // NaN counts as a hole as well.
        !(*self > 0.0)
    }

    fn mean(samples: &[Self]) -> Self {
        samples.iter().sum::<f32>() / samples.len() as f32
    }
}

impl HoleSample for [f32; 4] {
    const HOLE: Self = [0.0, 0.0, 0.0, -1.0];

    #[inline]
    fn is_hole(&self) -> bool {
        !(self[3] > 0.0)
    }

    fn mean(samples: &[Self]) -> Self {
        let mut sum = [0.0f32; 4];
        for s in samples {
            for (acc, v) in sum.iter_mut().zip(s) {
                *acc += v;
            }
        }
        let n = samples.len() as f32;
        sum.map(|v| v / n)
    }
}

/// Dense row-major image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMap<T> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T: Copy> ImageMap<T> {
    /// Create a map with every pixel set to `value`.
    pub fn filled(size: ImageSize, value: T) -> Self {
        Self {
            size,
            data: vec![value; size.pixel_count()],
        }
    }

    /// Wrap an existing buffer, checking its length against `size`.
    pub fn from_vec(size: ImageSize, data: Vec<T>) -> Result<Self, TrackerError> {
        if data.len() != size.pixel_count() {
            return Err(TrackerError::BufferSizeMismatch {
                size,
                expected: size.pixel_count(),
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    /// Build a map by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(size: ImageSize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(size.pixel_count());
        for y in 0..size.height {
            for x in 0..size.width {
                data.push(f(x, y));
            }
        }
        Self { size, data }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn width(&self) -> usize {
        self.size.width
    }

    pub fn height(&self) -> usize {
        self.size.height
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Sample at `(x, y)`, or `None` outside the image.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x < self.size.width && y < self.size.height {
            Some(self.data[x + y * self.size.width])
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let width = self.size.width;
        self.data[x + y * width] = value;
    }

    /// Row `y` as a slice.
    pub fn row(&self, y: usize) -> &[T] {
        let width = self.size.width;
        &self.data[y * width..(y + 1) * width]
    }

    /// Reshape to `size`, filling every pixel with `value`. Keeps the
    /// allocation when the capacity suffices.
    pub fn reset(&mut self, size: ImageSize, value: T) {
        self.size = size;
        self.data.clear();
        self.data.resize(size.pixel_count(), value);
    }
}

impl<T: HoleSample> ImageMap<T> {
    /// A map of the given size made entirely of holes.
    pub fn holes(size: ImageSize) -> Self {
        Self::filled(size, T::HOLE)
    }

    /// Number of non-hole samples.
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|s| !s.is_hole()).count()
    }
}

/// Pinhole projection parameters `(fx, fy, cx, cy)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// All four parameters multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.fx * factor,
            self.fy * factor,
            self.cx * factor,
            self.cy * factor,
        )
    }

    /// Camera-frame point for pixel `(x, y)` at the given depth.
    #[inline]
    pub fn back_project(&self, x: f64, y: f64, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (x - self.cx as f64) / self.fx as f64 * depth,
            (y - self.cy as f64) / self.fy as f64 * depth,
            depth,
        )
    }

    /// Continuous pixel coordinates of a camera-frame point, `None` behind
    /// the camera.
    #[inline]
    pub fn project(&self, point: &Vector3<f64>) -> Option<(f64, f64)> {
        if point.z <= 0.0 {
            return None;
        }
        Some((
            self.fx as f64 * point.x / point.z + self.cx as f64,
            self.fy as f64 * point.y / point.z + self.cy as f64,
        ))
    }
}
