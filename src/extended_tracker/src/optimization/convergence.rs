//! Step-size convergence test.

use nalgebra::Vector6;

/// Check whether a step is small enough to stop the level.
///
/// The criterion is the Euclidean norm divided by the parameter count:
/// `‖step‖ / 6 < threshold`. The division is by 6 regardless of how many
/// parameters the level optimizes.
pub fn has_converged(step: &Vector6<f64>, threshold: f64) -> bool {
    step.norm() / 6.0 < threshold
}
