//! Per-level iteration counts and correspondence gating thresholds.

use serde::{Deserialize, Serialize};

/// Coarsest and finest value of a per-level parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelRange<T> {
    pub coarse: T,
    pub fine: T,
}

impl<T> LevelRange<T> {
    pub const fn new(coarse: T, fine: T) -> Self {
        Self { coarse, fine }
    }
}

/// Iteration count and space threshold for every pyramid level.
///
/// Indexed by level id, 0 is the finest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSchedule {
    iterations: Vec<usize>,
    space_thresholds: Vec<f32>,
}

impl IterationSchedule {
    /// Schedule for `num_levels` levels with the default ramps:
    /// `2·num_levels → 2` iterations and `0.01 → 0.002` thresholds.
    pub fn new(num_levels: usize) -> Self {
        let mut schedule = Self {
            iterations: vec![0; num_levels],
            space_thresholds: vec![0.0; num_levels],
        };
        schedule.setup_levels(
            Some(LevelRange::new(num_levels * 2, 2)),
            Some(LevelRange::new(0.01, 0.002)),
        );
        schedule
    }

    pub fn num_levels(&self) -> usize {
        self.iterations.len()
    }

    pub fn iterations(&self, level: usize) -> usize {
        self.iterations[level]
    }

    pub fn space_threshold(&self, level: usize) -> f32 {
        self.space_thresholds[level]
    }

    pub fn iterations_per_level(&self) -> &[usize] {
        &self.iterations
    }

    pub fn space_thresholds(&self) -> &[f32] {
        &self.space_thresholds
    }

    /// Linearly interpolate both parameters from the coarsest level to the
    /// finest.
    ///
    /// `None` leaves that parameter untouched, as does a threshold range with
    /// a negative extreme. Iteration counts are rounded to the nearest
    /// integer. A single level receives the coarse value.
    pub fn setup_levels(
        &mut self,
        iterations: Option<LevelRange<usize>>,
        space_thresholds: Option<LevelRange<f32>>,
    ) {
        let n = self.num_levels();
        if n == 0 {
            return;
        }

        if let Some(range) = iterations {
            let coarse = range.coarse as f64;
            let fine = range.fine as f64;
            for (level, slot) in self.iterations.iter_mut().enumerate() {
                let value = interpolate(coarse, fine, n - 1 - level, n);
                *slot = value.round().max(0.0) as usize;
            }
        }

        if let Some(range) = space_thresholds.filter(|r| r.coarse >= 0.0 && r.fine >= 0.0) {
            let coarse = range.coarse as f64;
            let fine = range.fine as f64;
            for (level, slot) in self.space_thresholds.iter_mut().enumerate() {
                *slot = interpolate(coarse, fine, n - 1 - level, n) as f32;
            }
        }
    }
}

/// Value at `steps_from_coarse` steps of an `n`-point ramp.
fn interpolate(coarse: f64, fine: f64, steps_from_coarse: usize, n: usize) -> f64 {
    if n <= 1 {
        return coarse;
    }
    let step = (coarse - fine) / (n - 1) as f64;
    coarse - step * steps_from_coarse as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_schedule() {
        let schedule = IterationSchedule::new(5);
        assert_eq!(schedule.iterations_per_level(), &[2, 4, 6, 8, 10]);
        assert_relative_eq!(schedule.space_threshold(4), 0.01);
        assert_relative_eq!(schedule.space_threshold(0), 0.002);
        assert_relative_eq!(schedule.space_threshold(2), 0.006, epsilon = 1e-7);
    }

    #[test]
    fn test_endpoints_and_monotonicity() {
        let mut schedule = IterationSchedule::new(4);
        schedule.setup_levels(
            Some(LevelRange::new(20, 3)),
            Some(LevelRange::new(0.5, 0.1)),
        );

        assert_eq!(schedule.iterations(3), 20);
        assert_eq!(schedule.iterations(0), 3);
        assert_relative_eq!(schedule.space_threshold(3), 0.5);
        assert_relative_eq!(schedule.space_threshold(0), 0.1);
        for level in 0..3 {
            assert!(schedule.iterations(level) <= schedule.iterations(level + 1));
            assert!(schedule.space_threshold(level) <= schedule.space_threshold(level + 1));
        }
    }

    #[test]
    fn test_rounding_to_nearest() {
        let mut schedule = IterationSchedule::new(3);
        // Ramp 10, 6.5, 3.
        schedule.setup_levels(Some(LevelRange::new(10, 3)), None);
        assert_eq!(schedule.iterations_per_level(), &[3, 7, 10]);
    }

    #[test]
    fn test_disabled_ranges_keep_values() {
        let mut schedule = IterationSchedule::new(3);
        let before = schedule.clone();

        schedule.setup_levels(None, Some(LevelRange::new(-1.0, 0.1)));
        assert_eq!(schedule, before);

        schedule.setup_levels(None, Some(LevelRange::new(0.3, 0.3)));
        assert_eq!(schedule.iterations_per_level(), before.iterations_per_level());
        assert_relative_eq!(schedule.space_threshold(1), 0.3);
    }

    #[test]
    fn test_single_level_takes_coarse_value() {
        let mut schedule = IterationSchedule::new(1);
        schedule.setup_levels(
            Some(LevelRange::new(12, 4)),
            Some(LevelRange::new(0.02, 0.001)),
        );
        assert_eq!(schedule.iterations(0), 12);
        assert_relative_eq!(schedule.space_threshold(0), 0.02);
    }
}
