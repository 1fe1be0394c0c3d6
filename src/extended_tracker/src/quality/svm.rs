//! Fixed-weight linear SVM.

/// Linear decision function `w · x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct SvmClassifier {
    weights: Vec<f64>,
    bias: f64,
}

impl SvmClassifier {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    /// Signed decision value of a descriptor. Positive means the positive
    /// class.
    pub fn classify(&self, descriptor: &[f64]) -> f64 {
        debug_assert_eq!(descriptor.len(), self.weights.len());
        self.weights
            .iter()
            .zip(descriptor)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
}
