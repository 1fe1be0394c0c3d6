//! Post-hoc reliability grading of a tracked pose.
//!
//! Four features are derived from the final accepted full-DoF statistics:
//! the log-determinant of the Hessian scaled by the valid fraction of all
//! pixels, the same scaled by the valid fraction of measured pixels, an
//! outlier-padded RMS residual, and the inlier ratio. They are
//! standardized, expanded with a χ² homogeneous kernel map and scored by
//! a fixed linear SVM.

mod homker;
mod svm;

pub use homker::HomkerMap;
pub use svm::SvmClassifier;

use nalgebra::{Matrix6, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::optimization::linear::{cholesky_determinant, sanitize_determinant};

/// Discrete grade assigned to a tracked pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseQuality {
    Good,
    Poor,
    Failed,
}

impl PoseQuality {
    /// Grade for an SVM decision value.
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            PoseQuality::Good
        } else if score > -10.0 {
            PoseQuality::Poor
        } else {
            PoseQuality::Failed
        }
    }

    /// Numeric quality stored in the tracking state.
    pub fn value(&self) -> f32 {
        match self {
            PoseQuality::Good => 1.0,
            PoseQuality::Poor => 0.5,
            PoseQuality::Failed => 0.2,
        }
    }
}

/// Trained constants of the quality classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityModel {
    pub weights: [f64; 20],
    pub bias: f64,
    /// Feature means used for standardization.
    pub mean: Vector4<f64>,
    /// Feature standard deviations used for standardization.
    pub scale: Vector4<f64>,
    pub kernel_order: usize,
}

impl Default for QualityModel {
    fn default() -> Self {
        Self {
            weights: [
                -3.15813, -2.38038, 1.93359, 1.56642, 1.76306, -0.747641, 4.41852, 1.72048,
                -0.482545, -5.07793, 1.98676, -0.45688, 2.53969, -3.50527, -1.68725, 2.31608,
                5.14778, 2.31334, -14.128, 6.76423,
            ],
            bias: 0.933426,
            mean: Vector4::new(
                -34.9470512137603,
                -33.1379108518478,
                0.195948598235857,
                0.611027292662361,
            ),
            scale: Vector4::new(
                68.1654461020426,
                60.6607826748643,
                0.00343068557187040,
                0.0402595570918749,
            ),
            kernel_order: 2,
        }
    }
}

/// Statistics the classifier grades.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityInputs {
    /// Valid-count-normalized Hessian of the last accepted full-DoF
    /// iteration.
    pub hessian: Matrix6<f64>,
    pub valid_points: usize,
    /// Residual of that iteration.
    pub residual: f64,
    /// Pixel count of the finest level.
    pub total_pixels: usize,
    /// Valid depth samples in the full-resolution frame.
    pub max_valid: usize,
    /// Space threshold of the finest level.
    pub finest_threshold: f64,
}

/// Features and verdict of one grading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub d0: f64,
    pub d1: f64,
    pub d2: f64,
    pub residual: f64,
    pub inlier_ratio: f64,
    /// SVM decision value, `None` when the gates rejected the inputs.
    pub score: Option<f64>,
    pub quality: Option<PoseQuality>,
}

/// Kernel-mapped linear SVM over the four pose-quality features.
#[derive(Debug, Clone)]
pub struct QualityClassifier {
    model: QualityModel,
    map: HomkerMap,
    svm: SvmClassifier,
}

impl Default for QualityClassifier {
    fn default() -> Self {
        Self::new(QualityModel::default(), 5.0)
    }
}

impl QualityClassifier {
    /// Build the classifier. `failure_detector_offset` is added to the
    /// model bias; larger values grade more poses as good.
    pub fn new(model: QualityModel, failure_detector_offset: f64) -> Self {
        let map = HomkerMap::new(model.kernel_order);
        let svm = SvmClassifier::new(model.weights.to_vec(), model.bias + failure_detector_offset);
        Self { model, map, svm }
    }

    pub fn model(&self) -> &QualityModel {
        &self.model
    }

    pub fn svm(&self) -> &SvmClassifier {
        &self.svm
    }

    /// Compute the quality features and, if they are usable, the grade.
    pub fn assess(&self, inputs: &QualityInputs) -> QualityAssessment {
        let valid = inputs.valid_points as f64;
        let max_valid = inputs.max_valid as f64;
        let total = inputs.total_pixels as f64;

        let d0 = sanitize_determinant(cholesky_determinant(&inputs.hessian));
        let d1 = if total > 0.0 {
            sanitize_determinant(cholesky_determinant(&(inputs.hessian * (valid / total))))
        } else {
            0.0
        };
        let d2 = if max_valid > 0.0 {
            sanitize_determinant(cholesky_determinant(&(inputs.hessian * (valid / max_valid))))
        } else {
            0.0
        };

        let (residual, inlier_ratio) = if max_valid > 0.0 {
            let padded = valid * inputs.residual + (max_valid - valid) * inputs.finest_threshold;
            ((padded / max_valid).sqrt(), valid / max_valid)
        } else {
            (f64::NAN, f64::NAN)
        };

        let mut assessment = QualityAssessment {
            d0,
            d1,
            d2,
            residual,
            inlier_ratio,
            score: None,
            quality: None,
        };

        if inputs.max_valid == 0 || inputs.total_pixels == 0 || d1 <= 0.0 || d2 <= 0.0 {
            debug!(
                max_valid = inputs.max_valid,
                d1, d2, "pose quality features unusable, grade unchanged"
            );
            return assessment;
        }

        let features = Vector4::new(d1.ln(), d2.ln(), residual, inlier_ratio);
        let standardized = (features - self.model.mean).component_div(&self.model.scale);
        let descriptor = self.map.map(standardized.as_slice());
        let score = self.svm.classify(&descriptor);
        let quality = PoseQuality::from_score(score);

        debug!(
            d1,
            d2,
            residual,
            inlier_ratio,
            score,
            quality = ?quality,
            "pose quality graded"
        );

        assessment.score = Some(score);
        assessment.quality = Some(quality);
        assessment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs(hessian: Matrix6<f64>) -> QualityInputs {
        QualityInputs {
            hessian,
            valid_points: 3000,
            residual: 1e-4,
            total_pixels: 4800,
            max_valid: 4000,
            finest_threshold: 0.002,
        }
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(PoseQuality::from_score(1.0), PoseQuality::Good);
        assert_eq!(PoseQuality::from_score(-5.0), PoseQuality::Poor);
        assert_eq!(PoseQuality::from_score(-11.0), PoseQuality::Failed);
        assert_eq!(PoseQuality::from_score(0.0), PoseQuality::Poor);
        assert_eq!(PoseQuality::from_score(-10.0), PoseQuality::Failed);
        assert_relative_eq!(PoseQuality::Poor.value(), 0.5);
    }

    #[test]
    fn test_features() {
        let classifier = QualityClassifier::default();
        let assessment = classifier.assess(&inputs(Matrix6::identity() * 2.0));

        assert_relative_eq!(assessment.d0, 64.0, max_relative = 1e-12);
        assert_relative_eq!(
            assessment.d1,
            (2.0 * 3000.0 / 4800.0f64).powi(6),
            max_relative = 1e-12
        );
        assert_relative_eq!(
            assessment.d2,
            (2.0 * 3000.0 / 4000.0f64).powi(6),
            max_relative = 1e-12
        );
        let expected_residual = ((3000.0 * 1e-4 + 1000.0 * 0.002) / 4000.0f64).sqrt();
        assert_relative_eq!(assessment.residual, expected_residual, epsilon = 1e-12);
        assert_relative_eq!(assessment.inlier_ratio, 0.75);
        assert!(assessment.score.is_some());
    }

    #[test]
    fn test_determinants_of_scaled_identity_with_all_pixels_valid() {
        let classifier = QualityClassifier::default();
        for k in [2.0, 0.5] {
            let assessment = classifier.assess(&QualityInputs {
                hessian: Matrix6::identity() * k,
                valid_points: 4800,
                residual: 1e-4,
                total_pixels: 4800,
                max_valid: 4800,
                finest_threshold: 0.002,
            });
            let expected = f64::powi(k, 6);
            assert_relative_eq!(assessment.d1, expected, max_relative = 1e-12);
            assert_relative_eq!(assessment.d2, expected, max_relative = 1e-12);
            assert_relative_eq!(assessment.inlier_ratio, 1.0);
        }
    }

    #[test]
    fn test_score_matches_manual_pipeline() {
        let model = QualityModel::default();
        let classifier = QualityClassifier::new(model.clone(), 0.0);
        let assessment = classifier.assess(&inputs(Matrix6::identity() * 1e-3));

        let features = Vector4::new(
            assessment.d1.ln(),
            assessment.d2.ln(),
            assessment.residual,
            assessment.inlier_ratio,
        );
        let standardized = (features - model.mean).component_div(&model.scale);
        let descriptor = HomkerMap::new(2).map(standardized.as_slice());
        let expected = model
            .weights
            .iter()
            .zip(&descriptor)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + model.bias;

        assert_relative_eq!(assessment.score.unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_offset_shifts_score() {
        let base = QualityClassifier::new(QualityModel::default(), 0.0);
        let shifted = QualityClassifier::new(QualityModel::default(), 5.0);
        let stats = inputs(Matrix6::identity() * 0.5);

        let a = base.assess(&stats).score.unwrap();
        let b = shifted.assess(&stats).score.unwrap();
        assert_relative_eq!(b - a, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_are_not_graded() {
        let classifier = QualityClassifier::default();

        let mut no_valid = inputs(Matrix6::identity());
        no_valid.max_valid = 0;
        assert!(classifier.assess(&no_valid).quality.is_none());

        let singular = inputs(Matrix6::zeros());
        let assessment = classifier.assess(&singular);
        assert_eq!(assessment.d1, 0.0);
        assert!(assessment.quality.is_none());
    }
}
