//! Test utilities for generating synthetic depth frames.
//!
//! The scene is a closed axis-aligned box ("room") seen from the inside:
//! walls at `x = ±1.5`, floor and ceiling at `y = ±1`, front and back at
//! `z = 3` and `z = -5`. Every pixel of a camera placed in the room hits a
//! wall, and the three wall orientations constrain all six pose parameters.

use nalgebra::{Vector3, Vector6};

use crate::image::{ImageMap, ImageSize, Intrinsics};
use crate::optimization::IterationType;
use crate::pose::{apply_delta, Pose};
use crate::state::{ReferenceCloud, View};

/// Plane `normal · x = offset` with the normal pointing into the room.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

/// The six walls of the box room.
pub fn box_room() -> [Plane; 6] {
    let plane = |n: [f64; 3], offset: f64| Plane {
        normal: Vector3::new(n[0], n[1], n[2]),
        offset,
    };
    [
        plane([1.0, 0.0, 0.0], -1.5),
        plane([-1.0, 0.0, 0.0], -1.5),
        plane([0.0, 1.0, 0.0], -1.0),
        plane([0.0, -1.0, 0.0], -1.0),
        plane([0.0, 0.0, -1.0], -3.0),
        plane([0.0, 0.0, 1.0], -5.0),
    ]
}

/// Surface sample hit by one camera ray.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    /// Depth along the camera z axis.
    pub depth: f64,
    pub world_point: Vector3<f64>,
    pub world_normal: Vector3<f64>,
}

/// Cast the ray through pixel `(x, y)` of a camera at `pose` into the room.
pub fn cast_ray(pose: &Pose, intrinsics: &Intrinsics, x: f64, y: f64) -> Option<RayHit> {
    let inv = pose.inv_m();
    let rotation = inv.fixed_view::<3, 3>(0, 0).into_owned();
    let origin: Vector3<f64> = inv.fixed_view::<3, 1>(0, 3).into_owned();

    // Unit depth along the camera z axis, so the ray parameter is the depth.
    let direction = rotation * intrinsics.back_project(x, y, 1.0);

    box_room()
        .iter()
        .filter_map(|plane| {
            let denom = plane.normal.dot(&direction);
            if denom.abs() < 1e-12 {
                return None;
            }
            let t = (plane.offset - plane.normal.dot(&origin)) / denom;
            (t > 0.0).then_some((t, plane.normal))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(t, normal)| RayHit {
            depth: t,
            world_point: origin + direction * t,
            world_normal: normal,
        })
}

fn homogeneous(v: &Vector3<f64>) -> [f32; 4] {
    [v.x as f32, v.y as f32, v.z as f32, 1.0]
}

/// Render the depth frame seen from `pose`.
pub fn render_view(pose: &Pose, size: ImageSize, intrinsics: Intrinsics) -> View {
    let rotation = pose.rotation();
    let hits = ImageMap::from_fn(size, |x, y| cast_ray(pose, &intrinsics, x as f64, y as f64));

    let depth = ImageMap::from_fn(size, |x, y| {
        hits.get(x, y)
            .flatten()
            .map_or(-1.0, |hit| hit.depth as f32)
    });
    let depth_normals = ImageMap::from_fn(size, |x, y| {
        hits.get(x, y)
            .flatten()
            .map_or([0.0, 0.0, 0.0, -1.0], |hit| {
                homogeneous(&(rotation * hit.world_normal))
            })
    });

    View {
        depth,
        depth_uncertainty: ImageMap::filled(size, 0.01),
        depth_normals,
        intrinsics,
    }
}

/// Render the world-frame reference cloud seen from `pose`.
pub fn render_reference(pose: &Pose, size: ImageSize, intrinsics: Intrinsics) -> ReferenceCloud {
    let hits = ImageMap::from_fn(size, |x, y| cast_ray(pose, &intrinsics, x as f64, y as f64));

    ReferenceCloud {
        points: ImageMap::from_fn(size, |x, y| {
            hits.get(x, y)
                .flatten()
                .map_or([0.0, 0.0, 0.0, -1.0], |hit| homogeneous(&hit.world_point))
        }),
        normals: ImageMap::from_fn(size, |x, y| {
            hits.get(x, y)
                .flatten()
                .map_or([0.0, 0.0, 0.0, -1.0], |hit| homogeneous(&hit.world_normal))
        }),
    }
}

/// Depth frame and reference cloud rendered from the same pose.
pub fn render_frame(
    pose: &Pose,
    size: ImageSize,
    intrinsics: Intrinsics,
) -> (View, ReferenceCloud) {
    (
        render_view(pose, size, intrinsics),
        render_reference(pose, size, intrinsics),
    )
}

/// Apply a small twist `[r0, r1, r2, t0, t1, t2]` to the camera-to-world
/// side of `pose`.
pub fn perturb_pose(pose: &Pose, twist: &Vector6<f64>) -> Pose {
    Pose::from_inv_m(apply_delta(&pose.inv_m(), twist, IterationType::Both))
}

/// Rotation angle (radians) and translation distance between two poses.
pub fn pose_error(a: &Pose, b: &Pose) -> (f64, f64) {
    let delta = a.m() * b.inv_m();
    let rotation = delta.fixed_view::<3, 3>(0, 0);
    let cos = ((rotation.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
    let translation = delta.fixed_view::<3, 1>(0, 3).norm();
    (cos.acos(), translation)
}
