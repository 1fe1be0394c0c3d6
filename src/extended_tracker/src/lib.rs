//! Hierarchical depth-frame-to-model camera tracking.
//!
//! This library estimates the rigid pose of a depth sensor against a
//! previously reconstructed surface by minimizing a frame-to-model alignment
//! residual with a damped (Levenberg-Marquardt style) Gauss-Newton loop over
//! an image pyramid, then grades the result with a fixed-weight classifier.
//!
//! # Architecture
//!
//! Tracking a frame runs in phases:
//! - Phase 1: Copy the frame into the finest pyramid level and downsample the
//!   coarser levels (`hierarchy`, `image`)
//! - Phase 2: Per level, coarse to fine, evaluate the cost (`evaluation`),
//!   solve the damped system (`optimization::linear`), compose the increment
//!   (`pose`) and check convergence (`optimization::convergence`)
//! - Phase 3: Grade the last accepted full-DoF statistics (`quality`)
//!
//! # Usage
//!
//! ```ignore
//! use extended_tracker::{ExtendedTracker, PointToPlaneEvaluator, TrackingState, View};
//!
//! let mut tracker = ExtendedTracker::builder()
//!     .image_size(640, 480)
//!     .build(PointToPlaneEvaluator::default())?;
//!
//! let mut state = TrackingState::new(reference_cloud, previous_pose);
//! let summary = tracker.track_camera(&mut state, &view)?;
//! println!("quality: {}, evaluations: {}", state.pose_quality, summary.evaluations);
//! ```

pub mod error;
pub mod evaluation;
pub mod hierarchy;
pub mod image;
pub mod optimization;
pub mod pose;
pub mod quality;
pub mod state;
pub mod test_utils;
pub mod timing;
pub mod tracker;

pub use error::TrackerError;
pub use evaluation::{
    CostEvaluator, EvaluationStatistics, LevelContext, PointToPlaneConfig, PointToPlaneEvaluator,
};
pub use hierarchy::{ImageHierarchy, IterationSchedule, LevelRange, SceneLevel, ViewLevel};
pub use image::{CpuImageEngine, HoleSample, ImageEngine, ImageMap, ImageSize, Intrinsics};
pub use optimization::{
    AcceptedStatistics, GaussNewtonSolver, IterationDebug, IterationType, OptimizationConfig,
    OptimizationOutcome, SolveDimension, TrackingDebug,
};
pub use pose::{apply_delta, Pose};
pub use quality::{
    HomkerMap, PoseQuality, QualityAssessment, QualityClassifier, QualityInputs, QualityModel,
    SvmClassifier,
};
pub use state::{ReferenceCloud, TrackingState, View};
pub use timing::FrameTiming;

// High-level API (recommended for most users)
pub use tracker::{
    ExtendedTracker, MemoryDevice, TrackerBuilder, TrackerConfig, TrackingSummary,
};
