//! Debug types for per-iteration tracking traces.
//!
//! A [`TrackingDebug`] captures the state of every optimizer iteration of one
//! frame so runs can be inspected offline or diffed against each other.

use nalgebra::{Matrix4, Vector6};
use serde::Serialize;

use super::types::IterationType;

fn matrix_row_major(m: &Matrix4<f64>) -> Vec<f64> {
    (0..4)
        .flat_map(|i| (0..4).map(move |j| m[(i, j)]))
        .collect()
}

/// Debug information captured at each optimization iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationDebug {
    /// Pyramid level (0 is the finest).
    pub level_id: usize,

    /// Iteration number within the level (0-indexed).
    pub iteration: usize,

    pub iteration_type: IterationType,

    /// Residual reported by the evaluator.
    pub residual: f64,

    pub valid_points: usize,

    /// Whether the evaluation was accepted (otherwise the pose was rolled back).
    pub accepted: bool,

    /// Damping factor after the accept/reject update.
    pub damping: f64,

    /// Camera-to-world pose the cost was evaluated at, 4x4 row-major.
    pub pose_before_step: Vec<f64>,

    /// Twist applied after the solve (zeros if the solve failed).
    pub step: Vec<f64>,

    pub step_norm: f64,

    /// Whether the step met the convergence criterion.
    pub converged: bool,

    /// Whether the damped system could not be factorized.
    pub solve_failed: bool,
}

impl IterationDebug {
    /// Create a new iteration debug with default values.
    pub fn new(level_id: usize, iteration: usize, iteration_type: IterationType) -> Self {
        Self {
            level_id,
            iteration,
            iteration_type,
            residual: 0.0,
            valid_points: 0,
            accepted: false,
            damping: 0.0,
            pose_before_step: vec![0.0; 16],
            step: vec![0.0; 6],
            step_norm: 0.0,
            converged: false,
            solve_failed: false,
        }
    }

    pub fn set_pose_before_step(&mut self, inv_pose: &Matrix4<f64>) {
        self.pose_before_step = matrix_row_major(inv_pose);
    }

    pub fn set_step(&mut self, step: &Vector6<f64>) {
        self.step = step.iter().copied().collect();
        self.step_norm = step.norm();
    }

    /// Format as a compact log line for comparison.
    pub fn to_log_line(&self) -> String {
        format!(
            "level={} iter={} type={:?} residual={:.6e} valid={} accepted={} lambda={:.3e} step_norm={:.6e} converged={}",
            self.level_id,
            self.iteration,
            self.iteration_type,
            self.residual,
            self.valid_points,
            self.accepted,
            self.damping,
            self.step_norm,
            self.converged,
        )
    }
}

/// Complete debug history for one tracked frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingDebug {
    /// Frame counter at the time of tracking (1-based).
    pub frame: u64,

    /// World-to-camera pose before tracking, 4x4 row-major.
    pub initial_pose: Vec<f64>,

    /// World-to-camera pose after tracking, 4x4 row-major.
    pub final_pose: Vec<f64>,

    /// Iteration history, coarsest level first.
    pub iterations: Vec<IterationDebug>,

    pub total_evaluations: usize,

    /// Quality stored in the tracking state after grading.
    pub pose_quality: f32,

    /// SVM decision value, if the frame was graded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl TrackingDebug {
    /// Create a new frame debug record.
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            initial_pose: vec![0.0; 16],
            final_pose: vec![0.0; 16],
            ..Default::default()
        }
    }

    pub fn set_initial_pose(&mut self, m: &Matrix4<f64>) {
        self.initial_pose = matrix_row_major(m);
    }

    pub fn set_final_pose(&mut self, m: &Matrix4<f64>) {
        self.final_pose = matrix_row_major(m);
    }

    /// Iterations recorded for one level.
    pub fn level_iterations(&self, level_id: usize) -> impl Iterator<Item = &IterationDebug> {
        self.iterations
            .iter()
            .filter(move |it| it.level_id == level_id)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Convert to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
