//! Homogeneous kernel map for the χ² kernel.
//!
//! Approximates the additive χ² kernel `k(x, y) = 2xy / (x + y)` by an
//! explicit finite feature map, so a linear classifier on the mapped
//! features behaves like a χ²-kernel classifier on the raw ones. The
//! spectrum of the χ² kernel, `κ(λ) = sech(πλ)`, is sampled at `2·order + 1`
//! frequencies with a uniform window whose period is
//! `5.86·√order + 3.65`.

use std::f64::consts::PI;

/// Closed-form χ² homogeneous kernel map of a given order.
#[derive(Debug, Clone, PartialEq)]
pub struct HomkerMap {
    order: usize,
    /// Sampling step in the frequency domain.
    step: f64,
    /// `√(L·κ(0))` followed by `√(2L·κ(jL))` for `j = 1..=order`.
    coefficients: Vec<f64>,
}

fn chi2_spectrum(lambda: f64) -> f64 {
    1.0 / (PI * lambda).cosh()
}

impl HomkerMap {
    pub fn new(order: usize) -> Self {
        let period = 5.86 * (order as f64).sqrt() + 3.65;
        let step = 2.0 * PI / period;

        let coefficients = (0..=order)
            .map(|j| {
                let weight = if j == 0 { 1.0 } else { 2.0 };
                (weight * step * chi2_spectrum(j as f64 * step)).sqrt()
            })
            .collect();

        Self {
            order,
            step,
            coefficients,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Mapped components produced per input feature.
    pub fn components_per_feature(&self) -> usize {
        2 * self.order + 1
    }

    /// Length of the descriptor for `feature_count` input features.
    pub fn descriptor_size(&self, feature_count: usize) -> usize {
        feature_count * self.components_per_feature()
    }

    /// Map one value into `out` (`components_per_feature()` entries).
    ///
    /// The layout is `[c0, cos1, sin1, cos2, sin2, ...]`. Negative inputs
    /// map to the negated components of their magnitude; zero maps to zeros.
    pub fn evaluate_into(&self, x: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.components_per_feature());

        if x == 0.0 || !x.is_finite() {
            out.fill(0.0);
            return;
        }

        let sign = x.signum();
        let magnitude = x.abs();
        let amplitude = sign * magnitude.sqrt();
        let log_x = magnitude.ln();

        out[0] = amplitude * self.coefficients[0];
        for j in 1..=self.order {
            let phase = j as f64 * self.step * log_x;
            let scale = amplitude * self.coefficients[j];
            out[2 * j - 1] = scale * phase.cos();
            out[2 * j] = scale * phase.sin();
        }
    }

    /// Map every feature and concatenate the results.
    pub fn map(&self, features: &[f64]) -> Vec<f64> {
        let width = self.components_per_feature();
        let mut descriptor = vec![0.0; self.descriptor_size(features.len())];
        for (x, out) in features.iter().zip(descriptor.chunks_exact_mut(width)) {
            self.evaluate_into(*x, out);
        }
        descriptor
    }
}
