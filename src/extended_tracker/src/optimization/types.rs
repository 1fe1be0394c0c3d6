//! Type definitions for the damped Gauss-Newton tracker.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

/// Which pose parameters a pyramid level optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationType {
    /// Rotation only (3 DoF).
    Rotation,
    /// Translation only (3 DoF).
    Translation,
    /// Full rigid motion (6 DoF).
    Both,
    /// Level is skipped.
    None,
}

/// Size of the linear system solved at a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveDimension {
    Three,
    Six,
}

impl SolveDimension {
    pub fn size(&self) -> usize {
        match self {
            SolveDimension::Three => 3,
            SolveDimension::Six => 6,
        }
    }
}

impl IterationType {
    /// Dimension of the system to solve, `None` for skipped levels.
    pub fn solve_dimension(&self) -> Option<SolveDimension> {
        match self {
            IterationType::Rotation | IterationType::Translation => Some(SolveDimension::Three),
            IterationType::Both => Some(SolveDimension::Six),
            IterationType::None => None,
        }
    }

    /// Whether the level is optimized at all.
    pub fn is_active(&self) -> bool {
        !matches!(self, IterationType::None)
    }

    /// Zero the twist entries this level does not optimize.
    ///
    /// Twist layout is `[r0, r1, r2, t0, t1, t2]`.
    pub fn mask_twist(&self, twist: &Vector6<f64>) -> Vector6<f64> {
        let mut masked = *twist;
        match self {
            IterationType::Rotation => masked.fixed_rows_mut::<3>(3).fill(0.0),
            IterationType::Translation => masked.fixed_rows_mut::<3>(0).fill(0.0),
            IterationType::Both => {}
            IterationType::None => masked.fill(0.0),
        }
        masked
    }

    /// Map a solver output, packed into its leading entries, back to a full
    /// twist.
    pub fn expand_step(&self, packed: &Vector6<f64>) -> Vector6<f64> {
        match self {
            IterationType::Rotation => {
                Vector6::new(packed[0], packed[1], packed[2], 0.0, 0.0, 0.0)
            }
            IterationType::Translation => {
                Vector6::new(0.0, 0.0, 0.0, packed[0], packed[1], packed[2])
            }
            IterationType::Both => *packed,
            IterationType::None => Vector6::zeros(),
        }
    }
}

/// Normalized statistics of the last accepted full-DoF iteration of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedStatistics {
    /// Hessian divided by the valid point count.
    pub hessian: Matrix6<f64>,
    /// Gradient divided by the valid point count.
    pub gradient: Vector6<f64>,
    pub residual: f64,
    pub valid_points: usize,
    pub level_id: usize,
}

/// Result of one optimization pass over the pyramid.
#[derive(Debug, Clone, Default)]
pub struct OptimizationOutcome {
    /// Cost evaluations performed across all levels.
    pub evaluations: usize,
    /// Levels that stopped early on convergence.
    pub converged_levels: Vec<usize>,
    /// Iterations whose damped system could not be factorized.
    pub solve_failures: usize,
    /// Last accepted full-DoF statistics, if any level of type `Both` accepted.
    pub last_full_dof: Option<AcceptedStatistics>,
    /// Time spent in the cost evaluator (zero without `profiling`).
    pub evaluation_ms: f64,
    /// Time spent solving and updating the pose (zero without `profiling`).
    pub solver_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_dimension() {
        assert_eq!(
            IterationType::Rotation.solve_dimension(),
            Some(SolveDimension::Three)
        );
        assert_eq!(
            IterationType::Translation.solve_dimension(),
            Some(SolveDimension::Three)
        );
        assert_eq!(
            IterationType::Both.solve_dimension(),
            Some(SolveDimension::Six)
        );
        assert_eq!(IterationType::None.solve_dimension(), None);
        assert!(!IterationType::None.is_active());
    }

    #[test]
    fn test_mask_twist() {
        let twist = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(
            IterationType::Rotation.mask_twist(&twist),
            Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0)
        );
        assert_eq!(
            IterationType::Translation.mask_twist(&twist),
            Vector6::new(0.0, 0.0, 0.0, 4.0, 5.0, 6.0)
        );
        assert_eq!(IterationType::Both.mask_twist(&twist), twist);
        assert_eq!(IterationType::None.mask_twist(&twist), Vector6::zeros());
    }

    #[test]
    fn test_expand_step() {
        let packed = Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0);
        assert_eq!(
            IterationType::Rotation.expand_step(&packed),
            Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0)
        );
        assert_eq!(
            IterationType::Translation.expand_step(&packed),
            Vector6::new(0.0, 0.0, 0.0, 1.0, 2.0, 3.0)
        );
        let full = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(IterationType::Both.expand_step(&full), full);
    }
}
