//! High-level frame-to-model tracking API.
//!
//! # Example
//!
//! ```ignore
//! use extended_tracker::{ExtendedTracker, IterationType, PointToPlaneEvaluator};
//!
//! let mut tracker = ExtendedTracker::builder()
//!     .image_size(640, 480)
//!     .iteration_types(vec![IterationType::Both, IterationType::Both, IterationType::Rotation])
//!     .build(PointToPlaneEvaluator::default())?;
//!
//! let summary = tracker.track_camera(&mut state, &view)?;
//! println!("pose quality: {}", state.pose_quality);
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrackerError;
use crate::evaluation::{CostEvaluator, PointToPlaneEvaluator};
use crate::hierarchy::{ImageHierarchy, IterationSchedule, LevelRange};
use crate::image::{CpuImageEngine, ImageEngine, ImageSize};
use crate::optimization::{
    GaussNewtonSolver, IterationType, OptimizationConfig, OptimizationOutcome, TrackingDebug,
};
use crate::quality::{QualityAssessment, QualityClassifier, QualityInputs, QualityModel};
use crate::state::{TrackingState, View};
use crate::timing::{FrameTiming, Timer};

/// Where image buffers live. Only recorded; the CPU path is the only one
/// implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryDevice {
    #[default]
    Cpu,
    Cuda,
}

/// Configuration for [`ExtendedTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Full-resolution frame size.
    pub image_size: ImageSize,

    /// Iteration type per pyramid level, index 0 is the finest. Its length
    /// is the number of levels.
    pub iteration_types: Vec<IterationType>,

    /// A level stops once `‖step‖ / 6` falls below this value.
    pub termination_threshold: f64,

    /// Added to the quality classifier bias; larger values are more lenient.
    pub failure_detector_offset: f64,

    pub memory_device: MemoryDevice,

    /// Optional upper bound for the damping factor.
    pub max_damping: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            image_size: ImageSize::new(640, 480),
            iteration_types: Self::default_iteration_types(5),
            termination_threshold: 1e-3,
            failure_detector_offset: 5.0,
            memory_device: MemoryDevice::Cpu,
            max_damping: None,
        }
    }
}

impl TrackerConfig {
    /// Full DoF on the two finest levels, rotation only above them.
    pub fn default_iteration_types(levels: usize) -> Vec<IterationType> {
        (0..levels)
            .map(|level| {
                if level < 2 {
                    IterationType::Both
                } else {
                    IterationType::Rotation
                }
            })
            .collect()
    }

    pub fn num_levels(&self) -> usize {
        self.iteration_types.len()
    }

    /// Check the configuration for values the tracker cannot run with.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.image_size.is_empty() {
            return Err(TrackerError::InvalidImageSize(self.image_size));
        }
        let levels = self.num_levels();
        if levels == 0 {
            return Err(TrackerError::NoLevels);
        }
        if self.image_size.at_level(levels - 1).is_empty() {
            return Err(TrackerError::ImageTooSmallForLevels {
                size: self.image_size,
                levels,
            });
        }
        if !(self.termination_threshold.is_finite() && self.termination_threshold > 0.0) {
            return Err(TrackerError::InvalidTerminationThreshold(
                self.termination_threshold,
            ));
        }
        if let Some(max) = self.max_damping {
            if !(max.is_finite() && max > 0.0) {
                return Err(TrackerError::InvalidDamping(max));
            }
        }
        Ok(())
    }

    fn optimization_config(&self) -> OptimizationConfig {
        OptimizationConfig {
            termination_threshold: self.termination_threshold,
            max_damping: self.max_damping,
        }
    }
}

/// Builder for [`ExtendedTracker`].
#[derive(Clone)]
pub struct TrackerBuilder {
    config: TrackerConfig,
    levels: Option<usize>,
    explicit_types: bool,
    engine: Option<Arc<dyn ImageEngine>>,
}

impl TrackerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
            levels: None,
            explicit_types: false,
            engine: None,
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: TrackerConfig) -> Self {
        Self {
            config,
            levels: None,
            explicit_types: true,
            engine: None,
        }
    }

    /// Set the full-resolution frame size.
    pub fn image_size(mut self, width: usize, height: usize) -> Self {
        self.config.image_size = ImageSize::new(width, height);
        self
    }

    /// Set the iteration type of every level (index 0 is the finest).
    pub fn iteration_types(mut self, iteration_types: Vec<IterationType>) -> Self {
        self.config.iteration_types = iteration_types;
        self.explicit_types = true;
        self
    }

    /// Set the level count. Without explicit iteration types the default
    /// pattern is used; with them the count must match.
    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = Some(levels);
        self
    }

    /// Set the convergence threshold.
    pub fn termination_threshold(mut self, threshold: f64) -> Self {
        self.config.termination_threshold = threshold;
        self
    }

    /// Set the quality classifier bias offset.
    pub fn failure_detector_offset(mut self, offset: f64) -> Self {
        self.config.failure_detector_offset = offset;
        self
    }

    /// Bound the damping factor.
    pub fn max_damping(mut self, max_damping: f64) -> Self {
        self.config.max_damping = Some(max_damping);
        self
    }

    pub fn memory_device(mut self, device: MemoryDevice) -> Self {
        self.config.memory_device = device;
        self
    }

    /// Use a custom image engine instead of [`CpuImageEngine`].
    pub fn image_engine(mut self, engine: Arc<dyn ImageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build the tracker around `evaluator`.
    pub fn build<C: CostEvaluator>(self, evaluator: C) -> Result<ExtendedTracker<C>> {
        let mut config = self.config;
        if let Some(levels) = self.levels {
            if self.explicit_types {
                if levels != config.iteration_types.len() {
                    return Err(TrackerError::LevelCountMismatch {
                        expected: levels,
                        actual: config.iteration_types.len(),
                    })
                    .context("iteration types disagree with the requested level count");
                }
            } else {
                config.iteration_types = TrackerConfig::default_iteration_types(levels);
            }
        }

        let engine: Arc<dyn ImageEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(CpuImageEngine::new()),
        };
        ExtendedTracker::new(config, engine, evaluator).context("invalid tracker configuration")
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of tracking one frame.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSummary {
    /// Frame counter (1-based).
    pub frame: u64,
    /// Cost evaluations performed.
    pub evaluations: usize,
    /// Levels that stopped early on convergence.
    pub converged_levels: Vec<usize>,
    /// Iterations whose damped system could not be factorized.
    pub solve_failures: usize,
    /// Quality features and verdict, `None` if no full-DoF iteration was
    /// accepted.
    pub quality: Option<QualityAssessment>,
    pub timing: FrameTiming,
}

/// Hierarchical frame-to-model depth tracker.
///
/// Owns the pyramid, the schedule, the solver and the quality classifier;
/// the tracking state is passed in per frame.
pub struct ExtendedTracker<C = PointToPlaneEvaluator> {
    config: TrackerConfig,
    engine: Arc<dyn ImageEngine>,
    evaluator: C,
    hierarchy: ImageHierarchy,
    schedule: IterationSchedule,
    solver: GaussNewtonSolver,
    classifier: QualityClassifier,
    frame_count: u64,
}

impl ExtendedTracker<PointToPlaneEvaluator> {
    /// Create a builder for configuring the tracker.
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }
}

impl<C: CostEvaluator> ExtendedTracker<C> {
    /// Create a tracker. The schedule starts at `2·levels → 2` iterations
    /// and `0.01 → 0.002` space thresholds.
    pub fn new(
        config: TrackerConfig,
        engine: Arc<dyn ImageEngine>,
        evaluator: C,
    ) -> Result<Self, TrackerError> {
        config.validate()?;

        let hierarchy = ImageHierarchy::new(config.image_size, &config.iteration_types);
        let schedule = IterationSchedule::new(config.num_levels());
        let solver = GaussNewtonSolver::new(config.optimization_config());
        let classifier =
            QualityClassifier::new(QualityModel::default(), config.failure_detector_offset);

        Ok(Self {
            config,
            engine,
            evaluator,
            hierarchy,
            schedule,
            solver,
            classifier,
            frame_count: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &C {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut C {
        &mut self.evaluator
    }

    pub fn hierarchy(&self) -> &ImageHierarchy {
        &self.hierarchy
    }

    pub fn schedule(&self) -> &IterationSchedule {
        &self.schedule
    }

    /// Frames tracked so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Re-interpolate the per-level schedule. `None` keeps the current
    /// values of that parameter.
    pub fn setup_levels(
        &mut self,
        iterations: Option<LevelRange<usize>>,
        space_thresholds: Option<LevelRange<f32>>,
    ) {
        self.schedule.setup_levels(iterations, space_thresholds);
    }

    /// Refine `state.pose_d` against `state.point_cloud` using `view`, and
    /// update `state.pose_quality`.
    ///
    /// # Errors
    /// [`TrackerError::SizeMismatch`] if the frame or cloud size differs
    /// from the configured image size. Numerical trouble during
    /// optimization is never an error.
    pub fn track_camera(
        &mut self,
        state: &mut TrackingState,
        view: &View,
    ) -> Result<TrackingSummary, TrackerError> {
        self.track(state, view, None)
    }

    /// Like [`ExtendedTracker::track_camera`], also returning a
    /// per-iteration trace.
    pub fn track_camera_with_debug(
        &mut self,
        state: &mut TrackingState,
        view: &View,
    ) -> Result<(TrackingSummary, TrackingDebug), TrackerError> {
        let mut trace = TrackingDebug::new(self.frame_count + 1);
        trace.set_initial_pose(&state.pose_d.m());

        let summary = self.track(state, view, Some(&mut trace))?;

        trace.set_final_pose(&state.pose_d.m());
        trace.pose_quality = state.pose_quality;
        trace.quality_score = summary.quality.and_then(|q| q.score);
        Ok((summary, trace))
    }

    fn track(
        &mut self,
        state: &mut TrackingState,
        view: &View,
        trace: Option<&mut TrackingDebug>,
    ) -> Result<TrackingSummary, TrackerError> {
        self.frame_count += 1;
        let total = Timer::start();

        let timer = Timer::start();
        self.hierarchy.set_evaluation_data(
            view,
            &state.point_cloud,
            &state.point_cloud_pose.m(),
        )?;
        self.hierarchy.prepare_for_evaluation(self.engine.as_ref());
        let prepare_ms = timer.elapsed_ms();

        let outcome = self.solver.optimize(
            &self.hierarchy,
            &self.schedule,
            &mut state.pose_d,
            &mut self.evaluator,
            trace,
        );

        let timer = Timer::start();
        let quality = self.update_pose_quality(state, &outcome, view);
        let quality_ms = timer.elapsed_ms();

        debug!(
            frame = self.frame_count,
            evaluations = outcome.evaluations,
            solve_failures = outcome.solve_failures,
            pose_quality = state.pose_quality,
            "frame tracked"
        );

        Ok(TrackingSummary {
            frame: self.frame_count,
            evaluations: outcome.evaluations,
            converged_levels: outcome.converged_levels,
            solve_failures: outcome.solve_failures,
            quality,
            timing: FrameTiming {
                total_ms: total.elapsed_ms(),
                prepare_ms,
                evaluation_ms: outcome.evaluation_ms,
                solver_ms: outcome.solver_ms,
                quality_ms,
            },
        })
    }

    /// Grade the last accepted full-DoF statistics. The stored quality is
    /// left untouched when there are none or the features are unusable.
    fn update_pose_quality(
        &self,
        state: &mut TrackingState,
        outcome: &OptimizationOutcome,
        view: &View,
    ) -> Option<QualityAssessment> {
        let accepted = outcome.last_full_dof.as_ref()?;

        let inputs = QualityInputs {
            hessian: accepted.hessian,
            valid_points: accepted.valid_points,
            residual: accepted.residual,
            total_pixels: self.hierarchy.view_level(0).size().pixel_count(),
            max_valid: self.engine.count_valid_depths(&view.depth),
            finest_threshold: self.schedule.space_threshold(0) as f64,
        };

        let assessment = self.classifier.assess(&inputs);
        if let Some(quality) = assessment.quality {
            state.pose_quality = quality.value();
        }
        Some(assessment)
    }
}
