use ndarray::Array2;

/// Multi-hot targets with every column outside `active` forced to zero.
pub fn restrict_targets(targets: &Array2<f64>, active: &[usize]) -> Array2<f64> {
    let mut restricted = Array2::zeros(targets.dim());
    for cls in active.iter().filter(|c| **c < targets.ncols()) {
        restricted.column_mut(*cls).assign(&targets.column(*cls));
    }
    restricted
}

/// Mean binary cross-entropy over sigmoid outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    pub fn loss(&self, probs: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        if probs.is_empty() {
            return 0.;
        }

        let total = probs
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| {
                let log_p = f64::max(p.ln(), -100.);
                let log_not_p = f64::max((1. - p).ln(), -100.);
                -(t * log_p + (1. - t) * log_not_p)
            })
            .sum::<f64>();

        total / probs.len() as f64
    }

    /// Gradient w.r.t. the output logits.
    pub fn grad_logits(&self, probs: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
        let n = probs.len().max(1) as f64;
        (probs - targets) / n
    }
}
