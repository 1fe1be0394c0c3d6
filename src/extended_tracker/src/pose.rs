//! Rigid sensor poses and the incremental pose update.
//!
//! A [`Pose`] keeps the world-to-camera matrix `M` together with its inverse
//! (camera-to-world). The optimizer works on the inverse: each iteration
//! left-multiplies it by a first-order increment and then coerces the result
//! back onto SE(3).

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6,
};

use crate::optimization::IterationType;

/// Rigid transform held as a homogeneous matrix and its inverse.
///
/// Invariant: `m() * inv_m()` is the identity within numerical tolerance
/// whenever the pose has been coerced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    m: Matrix4<f64>,
    inv_m: Matrix4<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            m: Matrix4::identity(),
            inv_m: Matrix4::identity(),
        }
    }

    /// Pose from a world-to-camera matrix. The matrix is coerced onto SE(3).
    pub fn from_m(m: Matrix4<f64>) -> Self {
        let mut pose = Self { m, inv_m: m };
        pose.coerce();
        pose
    }

    /// Pose from a camera-to-world matrix. The matrix is coerced onto SE(3).
    pub fn from_inv_m(inv_m: Matrix4<f64>) -> Self {
        let mut pose = Self::identity();
        pose.set_inv_m(inv_m);
        pose.coerce();
        pose
    }

    /// Pose from a world-to-camera isometry.
    pub fn from_isometry(isometry: &Isometry3<f64>) -> Self {
        let m = isometry.to_homogeneous();
        Self {
            m,
            inv_m: isometry.inverse().to_homogeneous(),
        }
    }

    /// World-to-camera isometry of this pose.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let rotation = Rotation3::from_matrix_unchecked(self.rotation());
        Isometry3::from_parts(
            Translation3::from(self.translation()),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }

    pub fn m(&self) -> Matrix4<f64> {
        self.m
    }

    pub fn inv_m(&self) -> Matrix4<f64> {
        self.inv_m
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.m.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.m.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Replace the world-to-camera matrix. Call [`Pose::coerce`] afterwards
    /// if `m` may have drifted off SE(3).
    pub fn set_m(&mut self, m: Matrix4<f64>) {
        self.m = m;
        self.inv_m = m.try_inverse().unwrap_or_else(|| rigid_inverse(&m));
    }

    /// Replace the camera-to-world matrix. Call [`Pose::coerce`] afterwards
    /// if `inv_m` may have drifted off SE(3).
    pub fn set_inv_m(&mut self, inv_m: Matrix4<f64>) {
        self.inv_m = inv_m;
        self.m = inv_m.try_inverse().unwrap_or_else(|| rigid_inverse(&inv_m));
    }

    pub fn set_from(&mut self, other: &Pose) {
        *self = *other;
    }

    /// Project the rotation block onto SO(3) (polar decomposition via SVD),
    /// reset the last row and recompute the inverse analytically.
    pub fn coerce(&mut self) {
        let rotation = nearest_rotation(&self.rotation());
        let translation = self.translation();

        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

        self.m = m;
        self.inv_m = rigid_inverse(&m);
    }
}

/// Closest rotation to `r` in the Frobenius sense.
fn nearest_rotation(r: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = r.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    let r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        u_flipped * v_t
    } else {
        r_orth
    }
}

/// Inverse of a homogeneous rigid transform: `[Rᵀ, -Rᵀt]`.
pub(crate) fn rigid_inverse(m: &Matrix4<f64>) -> Matrix4<f64> {
    let r_t = m.fixed_view::<3, 3>(0, 0).transpose();
    let t = m.fixed_view::<3, 1>(0, 3).into_owned();

    let mut inv = Matrix4::identity();
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_t);
    inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-(r_t * t)));
    inv
}

/// Compose a twist `[r0, r1, r2, t0, t1, t2]` onto an inverse pose.
///
/// The twist is first masked to the DoF that `iteration_type` optimizes.
/// The increment uses the first-order rotation `I + [r]×`:
///
/// ```text
/// T = [  1   -r2   r1   t0 ]
///     [  r2   1   -r0   t1 ]
///     [ -r1   r0   1    t2 ]
///     [  0    0    0    1  ]
/// ```
///
/// and the result is `T · inv_pose`. The result is not orthonormal; the
/// caller must coerce it.
pub fn apply_delta(
    inv_pose: &Matrix4<f64>,
    twist: &Vector6<f64>,
    iteration_type: IterationType,
) -> Matrix4<f64> {
    let s = iteration_type.mask_twist(twist);

    #[rustfmt::skip]
    let increment = Matrix4::new(
        1.0,   -s[2],  s[1], s[3],
        s[2],   1.0,  -s[0], s[4],
        -s[1],  s[0],  1.0,  s[5],
        0.0,    0.0,   0.0,  1.0,
    );

    increment * inv_pose
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> Pose {
        let iso = Isometry3::new(Vector3::new(0.3, -0.2, 1.5), Vector3::new(0.1, -0.05, 0.2));
        Pose::from_isometry(&iso)
    }

    fn assert_matrix_eq(a: &Matrix4<f64>, b: &Matrix4<f64>, eps: f64) {
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(a[(i, j)], b[(i, j)], epsilon = eps);
            }
        }
    }

    #[test]
    fn test_inverse_invariant() {
        let pose = sample_pose();
        assert_matrix_eq(&(pose.m() * pose.inv_m()), &Matrix4::identity(), 1e-12);
    }

    #[test]
    fn test_isometry_roundtrip() {
        let pose = sample_pose();
        let back = Pose::from_isometry(&pose.to_isometry());
        assert_matrix_eq(&back.m(), &pose.m(), 1e-12);
    }

    #[test]
    fn test_zero_twist_leaves_pose_unchanged() {
        let pose = sample_pose();
        for iteration_type in [
            IterationType::Rotation,
            IterationType::Translation,
            IterationType::Both,
        ] {
            let updated = apply_delta(&pose.inv_m(), &Vector6::zeros(), iteration_type);
            assert_matrix_eq(&updated, &pose.inv_m(), 1e-15);
        }
    }

    #[test]
    fn test_rotation_type_zeroes_translation() {
        let twist = Vector6::new(0.01, 0.02, 0.03, 0.5, 0.6, 0.7);
        let updated = apply_delta(&Matrix4::identity(), &twist, IterationType::Rotation);

        assert_relative_eq!(updated[(0, 3)], 0.0);
        assert_relative_eq!(updated[(1, 3)], 0.0);
        assert_relative_eq!(updated[(2, 3)], 0.0);
        assert_relative_eq!(updated[(1, 0)], 0.03);
        assert_relative_eq!(updated[(0, 2)], 0.02);
        assert_relative_eq!(updated[(2, 1)], 0.01);
    }

    #[test]
    fn test_translation_type_zeroes_rotation() {
        let twist = Vector6::new(0.01, 0.02, 0.03, 0.5, 0.6, 0.7);
        let updated = apply_delta(&Matrix4::identity(), &twist, IterationType::Translation);

        let rotation = updated.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!((rotation - Matrix3::identity()).norm(), 0.0);
        assert_relative_eq!(updated[(0, 3)], 0.5);
        assert_relative_eq!(updated[(1, 3)], 0.6);
        assert_relative_eq!(updated[(2, 3)], 0.7);
    }

    #[test]
    fn test_increment_composes_on_the_left() {
        let pose = sample_pose();
        let twist = Vector6::new(0.0, 0.0, 0.0, 0.1, 0.0, 0.0);
        let updated = apply_delta(&pose.inv_m(), &twist, IterationType::Both);

        let expected_translation =
            pose.inv_m().fixed_view::<3, 1>(0, 3) + Vector3::new(0.1, 0.0, 0.0);
        assert_relative_eq!(updated[(0, 3)], expected_translation[0], epsilon = 1e-12);
        assert_relative_eq!(updated[(1, 3)], expected_translation[1], epsilon = 1e-12);
    }

    #[test]
    fn test_coerce_restores_orthonormality() {
        let pose = sample_pose();
        let twist = Vector6::new(0.05, -0.04, 0.03, 0.01, 0.02, 0.03);
        let drifted = apply_delta(&pose.inv_m(), &twist, IterationType::Both);

        let mut updated = pose;
        updated.set_inv_m(drifted);
        let r = updated.rotation();
        assert!((r.transpose() * r - Matrix3::identity()).norm() > 1e-4);

        updated.coerce();
        let r = updated.rotation();
        assert_relative_eq!((r.transpose() * r - Matrix3::identity()).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        assert_matrix_eq(&(updated.m() * updated.inv_m()), &Matrix4::identity(), 1e-12);
    }

    #[test]
    fn test_from_inv_m_matches_isometry() {
        let pose = sample_pose();
        let rebuilt = Pose::from_inv_m(pose.inv_m());
        assert_matrix_eq(&rebuilt.m(), &pose.m(), 1e-12);
    }
}
