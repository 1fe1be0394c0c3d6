//! Error types for tracker construction and frame setup.
//!
//! Numerical degeneracy during tracking is not an error: it is reported
//! through `Option`s and sentinels and recovered inside the control loop.

use thiserror::Error;

use crate::image::ImageSize;

/// Errors surfaced when building a tracker or handing it a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("invalid image size {0}: both dimensions must be non-zero")]
    InvalidImageSize(ImageSize),

    #[error("tracker needs at least one hierarchy level")]
    NoLevels,

    #[error("iteration type array has {actual} entries but {expected} levels were requested")]
    LevelCountMismatch { expected: usize, actual: usize },

    #[error("image size {size} is too small for {levels} hierarchy levels")]
    ImageTooSmallForLevels { size: ImageSize, levels: usize },

    #[error("termination threshold must be finite and positive, got {0}")]
    InvalidTerminationThreshold(f64),

    #[error("maximum damping must be finite and positive, got {0}")]
    InvalidDamping(f64),

    #[error("{what} has size {actual}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        expected: ImageSize,
        actual: ImageSize,
    },

    #[error("buffer holds {actual} samples, image size {size} needs {expected}")]
    BufferSizeMismatch {
        size: ImageSize,
        expected: usize,
        actual: usize,
    },
}
