//! Per-frame inputs and the tracking state carried between frames.

use crate::image::{ImageMap, ImageSize, Intrinsics};
use crate::pose::Pose;

/// One depth frame at full resolution.
#[derive(Debug, Clone)]
pub struct View {
    /// Depth in meters, holes ≤ 0.
    pub depth: ImageMap<f32>,
    /// Per-pixel depth uncertainty, holes ≤ 0.
    pub depth_uncertainty: ImageMap<f32>,
    /// Camera-frame normals `[x, y, z, w]`, holes where `w ≤ 0`.
    pub depth_normals: ImageMap<[f32; 4]>,
    pub intrinsics: Intrinsics,
}

impl View {
    pub fn size(&self) -> ImageSize {
        self.depth.size()
    }
}

/// Rendering of the reconstructed surface used as the alignment target.
///
/// World-frame points and normals, holes where `w ≤ 0`.
#[derive(Debug, Clone)]
pub struct ReferenceCloud {
    pub points: ImageMap<[f32; 4]>,
    pub normals: ImageMap<[f32; 4]>,
}

impl ReferenceCloud {
    /// A cloud of the given size with no valid sample.
    pub fn empty(size: ImageSize) -> Self {
        Self {
            points: ImageMap::holes(size),
            normals: ImageMap::holes(size),
        }
    }
}

/// Tracking state carried from frame to frame.
#[derive(Debug, Clone)]
pub struct TrackingState {
    /// Current depth-sensor pose estimate (world to camera). Used as the
    /// initial guess and overwritten with the refined pose.
    pub pose_d: Pose,
    /// Pose the reference cloud was rendered from.
    pub point_cloud_pose: Pose,
    pub point_cloud: ReferenceCloud,
    /// Reliability grade of `pose_d`: 1.0 good, 0.5 poor, 0.2 failed.
    pub pose_quality: f32,
}

impl TrackingState {
    /// State whose current estimate is the pose the cloud was rendered from.
    pub fn new(point_cloud: ReferenceCloud, point_cloud_pose: Pose) -> Self {
        Self {
            pose_d: point_cloud_pose,
            point_cloud_pose,
            point_cloud,
            pose_quality: 1.0,
        }
    }
}
