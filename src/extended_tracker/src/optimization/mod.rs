//! Damped Gauss-Newton optimization for frame-to-model tracking.
//!
//! For each pyramid level, coarse to fine:
//! 1. Evaluate residual, gradient and Hessian at the current pose
//! 2. Accept or roll back depending on whether the residual improved
//! 3. Solve the damped system: Δ = (H + λ·diag(H))⁻¹g
//! 4. Compose Δ onto the pose and check ‖Δ‖/6 against the threshold

pub mod convergence;
pub mod debug;
pub mod linear;
pub mod solver;
pub mod types;

pub use convergence::has_converged;
pub use debug::{IterationDebug, TrackingDebug};
pub use linear::{cholesky_determinant, compute_delta, sanitize_determinant};
pub use solver::{GaussNewtonSolver, OptimizationConfig};
pub use types::{AcceptedStatistics, IterationType, OptimizationOutcome, SolveDimension};
