//! Image pyramid for the current frame and the reference surface.
//!
//! Level 0 is the finest (full resolution); each coarser level halves the
//! image size and the intrinsics. The view pyramid is rebuilt from the
//! frame every call to [`ImageHierarchy::prepare_for_evaluation`]. The
//! reference cloud lives only at level 0 and is never resampled; coarser
//! scene levels carry intrinsics only.

mod schedule;

pub use schedule::{IterationSchedule, LevelRange};

use nalgebra::Matrix4;

use crate::error::TrackerError;
use crate::image::{ImageEngine, ImageMap, ImageSize, Intrinsics};
use crate::optimization::IterationType;
use crate::state::{ReferenceCloud, View};

/// Current-frame data at one pyramid level.
#[derive(Debug, Clone)]
pub struct ViewLevel {
    pub depth: ImageMap<f32>,
    pub depth_uncertainty: ImageMap<f32>,
    pub depth_normals: ImageMap<[f32; 4]>,
    pub intrinsics: Intrinsics,
    pub iteration_type: IterationType,
}

impl ViewLevel {
    fn new(size: ImageSize, iteration_type: IterationType) -> Self {
        Self {
            depth: ImageMap::holes(size),
            depth_uncertainty: ImageMap::holes(size),
            depth_normals: ImageMap::holes(size),
            intrinsics: Intrinsics::default(),
            iteration_type,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.depth.size()
    }
}

/// Reference surface data at one pyramid level.
///
/// Points and normals are world-frame `[x, y, z, w]` with `w > 0` marking
/// a valid sample. Only level 0 holds them; coarser levels are empty.
#[derive(Debug, Clone)]
pub struct SceneLevel {
    pub intrinsics: Intrinsics,
    pub points: ImageMap<[f32; 4]>,
    pub normals: ImageMap<[f32; 4]>,
}

impl SceneLevel {
    fn new(size: ImageSize) -> Self {
        Self {
            intrinsics: Intrinsics::default(),
            points: ImageMap::holes(size),
            normals: ImageMap::holes(size),
        }
    }
}

/// View and scene pyramids owned by a tracker.
#[derive(Debug, Clone)]
pub struct ImageHierarchy {
    image_size: ImageSize,
    view_levels: Vec<ViewLevel>,
    scene_levels: Vec<SceneLevel>,
    scene_pose: Matrix4<f64>,
}

impl ImageHierarchy {
    /// Allocate a pyramid with one level per entry of `iteration_types`
    /// (index 0 is the finest).
    pub fn new(image_size: ImageSize, iteration_types: &[IterationType]) -> Self {
        let view_levels = iteration_types
            .iter()
            .enumerate()
            .map(|(level, &iteration_type)| {
                ViewLevel::new(image_size.at_level(level), iteration_type)
            })
            .collect();

        // Coarser scene levels never hold samples.
        let scene_levels = (0..iteration_types.len())
            .map(|level| {
                let size = if level == 0 {
                    image_size
                } else {
                    ImageSize::default()
                };
                SceneLevel::new(size)
            })
            .collect();

        Self {
            image_size,
            view_levels,
            scene_levels,
            scene_pose: Matrix4::identity(),
        }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn num_levels(&self) -> usize {
        self.view_levels.len()
    }

    pub fn view_level(&self, level: usize) -> &ViewLevel {
        &self.view_levels[level]
    }

    pub fn scene_level(&self, level: usize) -> &SceneLevel {
        &self.scene_levels[level]
    }

    /// The finest scene level, the one every evaluation reads.
    pub fn reference(&self) -> &SceneLevel {
        &self.scene_levels[0]
    }

    /// World-to-camera pose of the reference rendering.
    pub fn scene_pose(&self) -> &Matrix4<f64> {
        &self.scene_pose
    }

    /// Copy a frame and its reference surface into level 0.
    ///
    /// # Errors
    /// [`TrackerError::SizeMismatch`] if any map differs from the
    /// configured image size.
    pub fn set_evaluation_data(
        &mut self,
        view: &View,
        cloud: &ReferenceCloud,
        scene_pose: &Matrix4<f64>,
    ) -> Result<(), TrackerError> {
        let expected = self.image_size;
        let check = |what: &'static str, actual: ImageSize| {
            if actual == expected {
                Ok(())
            } else {
                Err(TrackerError::SizeMismatch {
                    what,
                    expected,
                    actual,
                })
            }
        };
        check("depth map", view.depth.size())?;
        check("depth uncertainty map", view.depth_uncertainty.size())?;
        check("depth normal map", view.depth_normals.size())?;
        check("reference point map", cloud.points.size())?;
        check("reference normal map", cloud.normals.size())?;

        let finest = &mut self.view_levels[0];
        finest.depth.clone_from(&view.depth);
        finest.depth_uncertainty.clone_from(&view.depth_uncertainty);
        finest.depth_normals.clone_from(&view.depth_normals);
        finest.intrinsics = view.intrinsics;

        let scene = &mut self.scene_levels[0];
        scene.points.clone_from(&cloud.points);
        scene.normals.clone_from(&cloud.normals);
        scene.intrinsics = view.intrinsics;

        self.scene_pose = *scene_pose;
        Ok(())
    }

    /// Rebuild the coarser view levels from level 0 and rescale both sets
    /// of intrinsics.
    pub fn prepare_for_evaluation(&mut self, engine: &dyn ImageEngine) {
        for level in 1..self.view_levels.len() {
            let (finer, coarser) = self.view_levels.split_at_mut(level);
            let input = &finer[level - 1];
            let output = &mut coarser[0];

            engine.filter_subsample_with_holes(&mut output.depth, &input.depth);
            engine.filter_subsample_with_holes(
                &mut output.depth_uncertainty,
                &input.depth_uncertainty,
            );
            engine.filter_subsample_vectors_with_holes(
                &mut output.depth_normals,
                &input.depth_normals,
            );
            output.intrinsics = input.intrinsics.scaled(0.5);

            let scene_intrinsics = self.scene_levels[level - 1].intrinsics;
            self.scene_levels[level].intrinsics = scene_intrinsics.scaled(0.5);
        }
    }
}
