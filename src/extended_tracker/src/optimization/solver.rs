//! Damped Gauss-Newton optimization over the image pyramid.
//!
//! This module implements the per-frame control loop:
//! 1. Visit the levels from coarsest to finest, skipping `None` levels
//! 2. Evaluate the cost at the current pose
//! 3. Accept (save pose, store normalized statistics, relax damping) or
//!    reject (roll back, stiffen damping)
//! 4. Solve the damped system built from the last accepted statistics
//! 5. Compose the step onto the inverse pose, re-orthonormalize and check
//!    convergence

use nalgebra::{Matrix6, Vector6};
use tracing::{debug, trace, warn};

use super::convergence::has_converged;
use super::debug::{IterationDebug, TrackingDebug};
use super::linear::compute_delta;
use super::types::{AcceptedStatistics, IterationType, OptimizationOutcome};
use crate::evaluation::{CostEvaluator, LevelContext};
use crate::hierarchy::{ImageHierarchy, IterationSchedule};
use crate::pose::{apply_delta, Pose};
use crate::timing::Timer;

/// Configuration for the optimization loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationConfig {
    /// A level stops once `‖step‖ / 6` falls below this value.
    pub termination_threshold: f64,

    /// Upper bound for the damping factor. `None` lets it grow without
    /// limit on repeated rejections.
    pub max_damping: Option<f64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            termination_threshold: 1e-3,
            max_damping: None,
        }
    }
}

/// Hierarchical damped Gauss-Newton solver.
#[derive(Debug, Clone, Default)]
pub struct GaussNewtonSolver {
    config: OptimizationConfig,
}

impl GaussNewtonSolver {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    fn raise_damping(&self, lambda: f64) -> f64 {
        let raised = lambda * 10.0;
        match self.config.max_damping {
            Some(max) => raised.min(max),
            None => raised,
        }
    }

    fn relax_damping(lambda: f64) -> f64 {
        lambda / 10.0
    }

    /// Refine `pose` (world to camera) against the prepared hierarchy.
    ///
    /// The accepted statistics start at zero and carry over from one level
    /// to the next; the rollback pose, best residual and damping reset per
    /// level. If `trace` is given every iteration is appended to it.
    ///
    /// An evaluation is accepted when it has valid points and its residual
    /// is no larger than the best one of the level. A NaN residual is
    /// therefore rejected and rolled back, although it never compares
    /// greater than the best residual.
    pub fn optimize<C>(
        &self,
        hierarchy: &ImageHierarchy,
        schedule: &IterationSchedule,
        pose: &mut Pose,
        evaluator: &mut C,
        mut trace: Option<&mut TrackingDebug>,
    ) -> OptimizationOutcome
    where
        C: CostEvaluator + ?Sized,
    {
        let mut outcome = OptimizationOutcome::default();
        let mut good_hessian = Matrix6::<f64>::zeros();
        let mut good_gradient = Vector6::<f64>::zeros();

        for level_id in (0..hierarchy.num_levels()).rev() {
            let view = hierarchy.view_level(level_id);
            let iteration_type = view.iteration_type;
            let Some(dimension) = iteration_type.solve_dimension() else {
                continue;
            };

            let context = LevelContext {
                level_id,
                iteration_type,
                space_threshold: schedule.space_threshold(level_id),
                view,
                reference: hierarchy.reference(),
                reference_intrinsics: hierarchy.scene_level(level_id).intrinsics,
                scene_pose: hierarchy.scene_pose(),
            };

            let mut last_known_good = *pose;
            let mut best_residual = f64::INFINITY;
            let mut lambda = 1.0;
            let mut level_iterations = 0;
            let mut level_converged = false;

            for iteration in 0..schedule.iterations(level_id) {
                level_iterations += 1;
                let approx_inv_pose = pose.inv_m();

                let timer = Timer::start();
                let stats = evaluator.compute_g_and_h(&context, &approx_inv_pose);
                outcome.evaluation_ms += timer.elapsed_ms();
                outcome.evaluations += 1;

                let timer = Timer::start();
                let accepted = stats.valid_points > 0 && stats.residual <= best_residual;
                if accepted {
                    last_known_good = *pose;
                    best_residual = stats.residual;
                    good_hessian = stats.normalized_hessian();
                    good_gradient = stats.normalized_gradient();
                    lambda = Self::relax_damping(lambda);

                    if iteration_type == IterationType::Both {
                        outcome.last_full_dof = Some(AcceptedStatistics {
                            hessian: good_hessian,
                            gradient: good_gradient,
                            residual: stats.residual,
                            valid_points: stats.valid_points,
                            level_id,
                        });
                    }
                } else {
                    pose.set_from(&last_known_good);
                    lambda = self.raise_damping(lambda);
                }

                let mut damped = good_hessian;
                for i in 0..6 {
                    damped[(i, i)] *= 1.0 + lambda;
                }

                let mut record = trace.as_ref().map(|_| {
                    let mut it = IterationDebug::new(level_id, iteration, iteration_type);
                    it.residual = stats.residual;
                    it.valid_points = stats.valid_points;
                    it.accepted = accepted;
                    it.damping = lambda;
                    it.set_pose_before_step(&approx_inv_pose);
                    it
                });

                let Some(packed) = compute_delta(&good_gradient, &damped, dimension) else {
                    warn!(
                        level_id,
                        iteration,
                        lambda,
                        "damped system is not positive definite, skipping step"
                    );
                    outcome.solve_failures += 1;
                    outcome.solver_ms += timer.elapsed_ms();
                    if let (Some(trace), Some(mut it)) = (trace.as_deref_mut(), record.take()) {
                        it.solve_failed = true;
                        trace.iterations.push(it);
                    }
                    continue;
                };

                let step = iteration_type.expand_step(&packed);
                let updated = apply_delta(&pose.inv_m(), &step, iteration_type);
                pose.set_inv_m(updated);
                pose.coerce();

                let converged = has_converged(&step, self.config.termination_threshold);
                outcome.solver_ms += timer.elapsed_ms();

                trace!(
                    level_id,
                    iteration,
                    residual = stats.residual,
                    valid_points = stats.valid_points,
                    accepted,
                    lambda,
                    step_norm = step.norm(),
                    "gauss-newton iteration"
                );

                if let (Some(trace), Some(mut it)) = (trace.as_deref_mut(), record.take()) {
                    it.set_step(&step);
                    it.converged = converged;
                    trace.iterations.push(it);
                }

                if converged {
                    level_converged = true;
                    break;
                }
            }

            if level_converged {
                outcome.converged_levels.push(level_id);
            }

            debug!(
                level_id,
                iteration_type = ?iteration_type,
                iterations = level_iterations,
                best_residual,
                converged = level_converged,
                "level finished"
            );
        }

        if let Some(trace) = trace {
            trace.total_evaluations += outcome.evaluations;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::EvaluationStatistics;
    use crate::hierarchy::LevelRange;
    use crate::image::ImageSize;
    use crate::test_utils::{perturb_pose, pose_error};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix4, Vector3};

    fn hierarchy(types: &[IterationType]) -> ImageHierarchy {
        ImageHierarchy::new(ImageSize::new(16, 16), types)
    }

    fn fixed_schedule(levels: usize, iterations: usize) -> IterationSchedule {
        let mut schedule = IterationSchedule::new(levels);
        schedule.setup_levels(Some(LevelRange::new(iterations, iterations)), None);
        schedule
    }

    /// First-order twist taking `current` onto `target` (both inverse poses).
    fn twist_towards(target: &Matrix4<f64>, current: &Matrix4<f64>) -> Vector6<f64> {
        let delta = target * current.try_inverse().unwrap();
        let r = Vector3::new(
            (delta[(2, 1)] - delta[(1, 2)]) / 2.0,
            (delta[(0, 2)] - delta[(2, 0)]) / 2.0,
            (delta[(1, 0)] - delta[(0, 1)]) / 2.0,
        );
        Vector6::new(r.x, r.y, r.z, delta[(0, 3)], delta[(1, 3)], delta[(2, 3)])
    }

    fn pack(twist: &Vector6<f64>, iteration_type: IterationType) -> Vector6<f64> {
        match iteration_type {
            IterationType::Translation => {
                Vector6::new(twist[3], twist[4], twist[5], 0.0, 0.0, 0.0)
            }
            _ => iteration_type.mask_twist(twist),
        }
    }

    /// Quadratic bowl around `target`: H = I, g = twist towards the target.
    fn bowl(
        target: Pose,
    ) -> impl FnMut(&LevelContext<'_>, &Matrix4<f64>) -> EvaluationStatistics {
        move |context: &LevelContext<'_>, inv_pose: &Matrix4<f64>| {
            let twist = twist_towards(&target.inv_m(), inv_pose);
            let valid = 1000.0;
            EvaluationStatistics {
                valid_points: 1000,
                residual: twist.norm_squared(),
                gradient: pack(&twist, context.iteration_type) * valid,
                hessian: Matrix6::identity() * valid,
            }
        }
    }

    #[test]
    fn test_converges_on_quadratic_bowl() {
        let target = Pose::identity();
        let start = perturb_pose(
            &target,
            &Vector6::new(0.02, -0.01, 0.015, 0.05, -0.03, 0.02),
        );

        let types = [IterationType::Rotation, IterationType::Both, IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = IterationSchedule::new(3);
        let solver = GaussNewtonSolver::default();

        let mut pose = start;
        let mut evaluator = bowl(target);
        let mut trace = TrackingDebug::new(1);
        let outcome = solver.optimize(
            &hierarchy,
            &schedule,
            &mut pose,
            &mut evaluator,
            Some(&mut trace),
        );

        let (rotation_error, translation_error) = pose_error(&pose, &target);
        assert!(rotation_error < 1e-4, "rotation error {rotation_error}");
        assert!(translation_error < 1e-4, "translation error {translation_error}");

        // The coarsest level stops well before its six iterations.
        let coarse: Vec<_> = trace.level_iterations(2).collect();
        assert!(coarse.len() < 6);
        assert!(coarse.last().unwrap().converged);
        assert!(outcome.converged_levels.contains(&2));
        assert_eq!(trace.total_evaluations, outcome.evaluations);

        // Level 0 is rotation-only, so the full-DoF statistics come from level 1.
        let last = outcome.last_full_dof.unwrap();
        assert_eq!(last.level_id, 1);
        assert_eq!(last.valid_points, 1000);
        assert_relative_eq!(last.hessian[(3, 3)], 1.0);
    }

    #[test]
    fn test_rejection_restores_pose_and_raises_damping() {
        let types = [IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = fixed_schedule(1, 3);
        let solver = GaussNewtonSolver::default();

        let residuals = [1.0, 2.0, 0.5];
        let mut seen_poses = Vec::new();
        let mut call = 0;
        let mut evaluator = |_: &LevelContext<'_>, inv_pose: &Matrix4<f64>| {
            seen_poses.push(*inv_pose);
            let residual = residuals[call];
            call += 1;
            EvaluationStatistics {
                valid_points: 1000,
                residual,
                gradient: Vector6::new(0.0, 0.0, 0.0, 0.05, 0.0, 0.0) * 1000.0,
                hessian: Matrix6::identity() * 1000.0,
            }
        };

        let mut pose = Pose::identity();
        let mut trace = TrackingDebug::new(1);
        solver.optimize(&hierarchy, &schedule, &mut pose, &mut evaluator, Some(&mut trace));

        let accepted: Vec<bool> = trace.iterations.iter().map(|it| it.accepted).collect();
        assert_eq!(accepted, vec![true, false, true]);
        assert_relative_eq!(trace.iterations[0].damping, 0.1, epsilon = 1e-15);
        assert_relative_eq!(trace.iterations[1].damping, 1.0, epsilon = 1e-15);
        assert_relative_eq!(trace.iterations[2].damping, 0.1, epsilon = 1e-15);

        // The rejected iteration rolls back to the start pose before the
        // stiffer step is taken from it.
        assert_relative_eq!(seen_poses[1][(0, 3)], 0.05 / 1.1, epsilon = 1e-12);
        assert_relative_eq!(seen_poses[2][(0, 3)], 0.05 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_damping_clamp() {
        let types = [IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = fixed_schedule(1, 6);
        let solver = GaussNewtonSolver::new(OptimizationConfig {
            max_damping: Some(100.0),
            ..Default::default()
        });

        let mut call = 0.0;
        let mut evaluator = |_: &LevelContext<'_>, _: &Matrix4<f64>| {
            call += 1.0;
            EvaluationStatistics {
                valid_points: 10,
                residual: call,
                gradient: Vector6::repeat(10.0),
                hessian: Matrix6::identity() * 10.0,
            }
        };

        let mut pose = Pose::identity();
        let mut trace = TrackingDebug::new(1);
        solver.optimize(&hierarchy, &schedule, &mut pose, &mut evaluator, Some(&mut trace));

        let damping: Vec<f64> = trace.iterations.iter().map(|it| it.damping).collect();
        let expected = [0.1, 1.0, 10.0, 100.0, 100.0, 100.0];
        assert_eq!(damping.len(), expected.len());
        for (d, e) in damping.iter().zip(expected) {
            assert_relative_eq!(*d, e, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_damping_grows_without_limit_by_default() {
        let types = [IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = fixed_schedule(1, 8);
        let solver = GaussNewtonSolver::new(OptimizationConfig::default());
        assert_eq!(solver.config().max_damping, None);

        // Rising residuals reject every call after the first; the large
        // gradient keeps the step above the termination threshold.
        let mut call = 0.0;
        let mut evaluator = |_: &LevelContext<'_>, _: &Matrix4<f64>| {
            call += 1.0;
            EvaluationStatistics {
                valid_points: 10,
                residual: call,
                gradient: Vector6::repeat(1e8),
                hessian: Matrix6::identity() * 10.0,
            }
        };

        let mut pose = Pose::identity();
        let mut trace = TrackingDebug::new(1);
        solver.optimize(
            &hierarchy,
            &schedule,
            &mut pose,
            &mut evaluator,
            Some(&mut trace),
        );

        let damping: Vec<f64> = trace.iterations.iter().map(|it| it.damping).collect();
        let expected = [0.1, 1.0, 10.0, 100.0, 1e3, 1e4, 1e5, 1e6];
        assert_eq!(damping.len(), expected.len());
        for (d, e) in damping.iter().zip(expected) {
            assert_relative_eq!(*d, e, max_relative = 1e-12);
        }
        assert!(trace.iterations.iter().all(|it| !it.converged));
    }

    #[test]
    fn test_damping_relaxes_by_tenfold_on_each_accept() {
        let mut lambda = 1.0;
        for _ in 0..400 {
            lambda = GaussNewtonSolver::relax_damping(lambda);
        }
        assert_eq!(lambda, 0.0);
        assert_relative_eq!(GaussNewtonSolver::relax_damping(1e-3), 1e-4, max_relative = 1e-12);
    }

    #[test]
    fn test_no_correspondences_keeps_pose() {
        let types = [IterationType::Both, IterationType::Translation];
        let hierarchy = hierarchy(&types);
        let schedule = fixed_schedule(2, 3);
        let solver = GaussNewtonSolver::default();

        let start = perturb_pose(&Pose::identity(), &Vector6::new(0.0, 0.1, 0.0, 0.2, 0.0, 0.0));
        let mut pose = start;
        let mut evaluator =
            |_: &LevelContext<'_>, _: &Matrix4<f64>| EvaluationStatistics::zeros();
        let outcome = solver.optimize(&hierarchy, &schedule, &mut pose, &mut evaluator, None);

        assert_eq!(outcome.evaluations, 6);
        assert_eq!(outcome.solve_failures, 6);
        assert!(outcome.last_full_dof.is_none());
        assert_eq!(pose.m(), start.m());
    }

    #[test]
    fn test_none_levels_are_skipped() {
        let types = [IterationType::None, IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = IterationSchedule::new(2);
        let solver = GaussNewtonSolver::default();

        let mut levels_seen = Vec::new();
        let mut evaluator = |context: &LevelContext<'_>, _: &Matrix4<f64>| {
            levels_seen.push(context.level_id);
            EvaluationStatistics::zeros()
        };
        let mut pose = Pose::identity();
        solver.optimize(&hierarchy, &schedule, &mut pose, &mut evaluator, None);

        assert!(!levels_seen.is_empty());
        assert!(levels_seen.iter().all(|&level| level == 1));
    }

    #[test]
    fn test_nan_residual_is_rejected() {
        let types = [IterationType::Both];
        let hierarchy = hierarchy(&types);
        let schedule = fixed_schedule(1, 2);
        let solver = GaussNewtonSolver::default();

        let mut call = 0;
        let mut evaluator = |_: &LevelContext<'_>, _: &Matrix4<f64>| {
            call += 1;
            EvaluationStatistics {
                valid_points: 100,
                residual: if call == 1 { 1.0 } else { f64::NAN },
                gradient: Vector6::new(0.0, 0.0, 0.0, 0.1, 0.0, 0.0) * 100.0,
                hessian: Matrix6::identity() * 100.0,
            }
        };
        let mut pose = Pose::identity();
        let mut trace = TrackingDebug::new(1);
        solver.optimize(&hierarchy, &schedule, &mut pose, &mut evaluator, Some(&mut trace));

        assert_eq!(trace.iterations.len(), 2);
        assert!(trace.iterations[0].accepted);
        assert!(!trace.iterations[1].accepted);
        assert_relative_eq!(trace.iterations[1].damping, 1.0, epsilon = 1e-15);
    }
}
