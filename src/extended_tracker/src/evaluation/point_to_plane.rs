//! CPU point-to-plane cost evaluator.
//!
//! Each valid view pixel is back-projected with the level intrinsics and
//! moved into the world frame with the candidate camera-to-world pose. The
//! world point is then projected into the reference rendering, using the
//! scene pose and finest-level intrinsics, and paired with the reference
//! point and normal under the nearest pixel. The residual of a pair is the
//! signed distance `b = n · (q - p)` to the reference tangent plane.
//!
//! Linearizing `p → p + ω × p + t` gives `b - Aᵀξ` with
//! `A = [p × n, n]`, so the Gauss-Newton sums are `H = Σ A Aᵀ`,
//! `g = Σ b A` and the step is `H⁻¹ g`.

use nalgebra::{Matrix4, Vector3, Vector4, Vector6};
use rayon::prelude::*;

use super::{CostEvaluator, EvaluationStatistics, LevelContext};
use crate::image::HoleSample;
use crate::optimization::IterationType;

/// Residual reported when too few correspondences survive gating.
pub const INSUFFICIENT_POINTS_RESIDUAL: f64 = 1e5;

/// Configuration for [`PointToPlaneEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointToPlaneConfig {
    /// Minimum number of correspondences for the residual to be meaningful.
    /// Below it the residual is [`INSUFFICIENT_POINTS_RESIDUAL`].
    pub min_valid_points: usize,
}

impl Default for PointToPlaneConfig {
    fn default() -> Self {
        Self {
            min_valid_points: 100,
        }
    }
}

/// Multi-threaded CPU point-to-plane evaluator.
#[derive(Debug, Clone, Default)]
pub struct PointToPlaneEvaluator {
    config: PointToPlaneConfig,
}

impl PointToPlaneEvaluator {
    pub fn new(config: PointToPlaneConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PointToPlaneConfig {
        &self.config
    }
}

#[inline]
fn transform(m: &Matrix4<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    (m * Vector4::new(p.x, p.y, p.z, 1.0)).xyz()
}

#[inline]
fn xyz(sample: &[f32; 4]) -> Vector3<f64> {
    Vector3::new(sample[0] as f64, sample[1] as f64, sample[2] as f64)
}

/// Jacobian row of one correspondence, packed for the level's solve.
#[inline]
fn jacobian(
    world_point: &Vector3<f64>,
    normal: &Vector3<f64>,
    iteration_type: IterationType,
) -> Vector6<f64> {
    let rot = world_point.cross(normal);
    match iteration_type {
        IterationType::Rotation => Vector6::new(rot.x, rot.y, rot.z, 0.0, 0.0, 0.0),
        IterationType::Translation => Vector6::new(normal.x, normal.y, normal.z, 0.0, 0.0, 0.0),
        IterationType::Both => Vector6::new(rot.x, rot.y, rot.z, normal.x, normal.y, normal.z),
        IterationType::None => Vector6::zeros(),
    }
}

fn merge(mut a: EvaluationStatistics, b: EvaluationStatistics) -> EvaluationStatistics {
    a.valid_points += b.valid_points;
    a.residual += b.residual;
    a.gradient += b.gradient;
    a.hessian += b.hessian;
    a
}

impl CostEvaluator for PointToPlaneEvaluator {
    fn compute_g_and_h(
        &mut self,
        context: &LevelContext<'_>,
        approx_inv_pose: &Matrix4<f64>,
    ) -> EvaluationStatistics {
        let iteration_type = context.iteration_type;
        if !iteration_type.is_active() {
            return EvaluationStatistics::zeros();
        }

        let view = context.view;
        let reference = context.reference;
        let scene_pose = context.scene_pose;
        let threshold = context.space_threshold as f64;
        let ref_width = reference.points.width() as f64;
        let ref_height = reference.points.height() as f64;

        let sums = (0..view.depth.height())
            .into_par_iter()
            .fold(EvaluationStatistics::zeros, |mut acc, y| {
                for (x, depth) in view.depth.row(y).iter().enumerate() {
                    if depth.is_hole() {
                        continue;
                    }

                    let camera_point =
                        view.intrinsics
                            .back_project(x as f64, y as f64, *depth as f64);
                    let world_point = transform(approx_inv_pose, &camera_point);
                    let reference_point = transform(scene_pose, &world_point);

                    let Some((u, v)) = reference.intrinsics.project(&reference_point) else {
                        continue;
                    };
                    let (u, v) = ((u + 0.5).floor(), (v + 0.5).floor());
                    if u < 0.0 || v < 0.0 || u >= ref_width || v >= ref_height {
                        continue;
                    }
                    let (u, v) = (u as usize, v as usize);

                    let (Some(ref_point), Some(ref_normal)) =
                        (reference.points.get(u, v), reference.normals.get(u, v))
                    else {
                        continue;
                    };
                    if ref_point.is_hole() || ref_normal.is_hole() {
                        continue;
                    }

                    let diff = xyz(&ref_point) - world_point;
                    if diff.norm_squared() > threshold {
                        continue;
                    }

                    let normal = xyz(&ref_normal);
                    let b = normal.dot(&diff);
                    let a = jacobian(&world_point, &normal, iteration_type);

                    acc.valid_points += 1;
                    acc.residual += b * b;
                    acc.gradient += a * b;
                    acc.hessian += a * a.transpose();
                }
                acc
            })
            .reduce(EvaluationStatistics::zeros, merge);

        let residual = if sums.valid_points >= self.config.min_valid_points && sums.valid_points > 0
        {
            sums.residual / sums.valid_points as f64
        } else {
            INSUFFICIENT_POINTS_RESIDUAL
        };

        EvaluationStatistics { residual, ..sums }
    }
}
