//! Cost evaluation contract between the optimizer and the correspondence
//! back end.
//!
//! The optimizer hands the evaluator one pyramid level at a time together
//! with the current camera-to-world estimate and receives un-normalized
//! sums: the squared residual, the number of valid correspondences, the
//! gradient and the Gauss-Newton Hessian. The gradient is the
//! descent-oriented right-hand side, so the step is `H⁻¹ g`.
//!
//! For 3-DoF levels the evaluator packs the active block into the leading
//! 3×3 of the Hessian and the first three entries of the gradient.

mod point_to_plane;

pub use point_to_plane::{PointToPlaneConfig, PointToPlaneEvaluator};

use nalgebra::{Matrix4, Matrix6, Vector6};

use crate::hierarchy::{SceneLevel, ViewLevel};
use crate::image::Intrinsics;
use crate::optimization::IterationType;

/// Everything an evaluator may read for one level.
#[derive(Debug, Clone, Copy)]
pub struct LevelContext<'a> {
    /// Level id, 0 is the finest.
    pub level_id: usize,
    pub iteration_type: IterationType,
    /// Correspondence gating threshold (squared distance).
    pub space_threshold: f32,
    /// Current frame data at this level.
    pub view: &'a ViewLevel,
    /// Reference surface. Always the finest scene level.
    pub reference: &'a SceneLevel,
    /// Reference intrinsics rescaled to this level. [`PointToPlaneEvaluator`]
    /// ignores them and projects with `reference.intrinsics`, since the
    /// reference surface is only held at full resolution.
    pub reference_intrinsics: Intrinsics,
    /// World-to-camera pose the reference surface was rendered from.
    pub scene_pose: &'a Matrix4<f64>,
}

/// Un-normalized statistics of one cost evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationStatistics {
    pub valid_points: usize,
    /// Residual of the evaluation; lower is better.
    pub residual: f64,
    pub gradient: Vector6<f64>,
    pub hessian: Matrix6<f64>,
}

impl Default for EvaluationStatistics {
    fn default() -> Self {
        Self::zeros()
    }
}

impl EvaluationStatistics {
    /// Create zero-initialized statistics.
    pub fn zeros() -> Self {
        Self {
            valid_points: 0,
            residual: 0.0,
            gradient: Vector6::zeros(),
            hessian: Matrix6::zeros(),
        }
    }

    /// Hessian divided by the valid point count.
    pub fn normalized_hessian(&self) -> Matrix6<f64> {
        if self.valid_points == 0 {
            return Matrix6::zeros();
        }
        self.hessian / self.valid_points as f64
    }

    /// Gradient divided by the valid point count.
    pub fn normalized_gradient(&self) -> Vector6<f64> {
        if self.valid_points == 0 {
            return Vector6::zeros();
        }
        self.gradient / self.valid_points as f64
    }
}

/// Computes residual, gradient and Hessian at a candidate pose.
pub trait CostEvaluator {
    fn compute_g_and_h(
        &mut self,
        context: &LevelContext<'_>,
        approx_inv_pose: &Matrix4<f64>,
    ) -> EvaluationStatistics;
}

impl<F> CostEvaluator for F
where
    F: FnMut(&LevelContext<'_>, &Matrix4<f64>) -> EvaluationStatistics,
{
    fn compute_g_and_h(
        &mut self,
        context: &LevelContext<'_>,
        approx_inv_pose: &Matrix4<f64>,
    ) -> EvaluationStatistics {
        self(context, approx_inv_pose)
    }
}
