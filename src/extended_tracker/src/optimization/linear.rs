//! Cholesky-based solve of the damped normal equations.
//!
//! Solves `H · Δ = g` where `g` is the descent-oriented right-hand side
//! produced by the cost evaluator. For 3-DoF levels only the leading 3×3
//! block of `H` and the first three entries of `g` take part.

use nalgebra::{Matrix6, Vector3, Vector6};

use super::types::SolveDimension;

/// Solve the (damped) system for the step.
///
/// # Returns
/// The step packed into a 6-vector (entries beyond `dimension` are zero),
/// or `None` if the system is not positive definite or the result is not
/// finite.
pub fn compute_delta(
    nabla: &Vector6<f64>,
    hessian: &Matrix6<f64>,
    dimension: SolveDimension,
) -> Option<Vector6<f64>> {
    let delta = match dimension {
        SolveDimension::Three => {
            let block = hessian.fixed_view::<3, 3>(0, 0).into_owned();
            let rhs: Vector3<f64> = nabla.fixed_rows::<3>(0).into_owned();
            let x = block.cholesky()?.solve(&rhs);
            Vector6::new(x[0], x[1], x[2], 0.0, 0.0, 0.0)
        }
        SolveDimension::Six => hessian.cholesky()?.solve(nabla),
    };

    if delta.iter().all(|v| v.is_finite()) {
        Some(delta)
    } else {
        None
    }
}

/// Determinant of a symmetric positive definite matrix from its Cholesky
/// factor, `(Π lᵢᵢ)²`.
///
/// # Returns
/// NaN if the factorization fails.
pub fn cholesky_determinant(matrix: &Matrix6<f64>) -> f64 {
    match matrix.cholesky() {
        Some(chol) => {
            let diag_product: f64 = chol.l().diagonal().iter().product();
            diag_product * diag_product
        }
        None => f64::NAN,
    }
}

/// Replace non-finite or non-positive determinants with zero.
pub fn sanitize_determinant(determinant: f64) -> f64 {
    if determinant.is_finite() && determinant > 0.0 {
        determinant
    } else {
        0.0
    }
}
