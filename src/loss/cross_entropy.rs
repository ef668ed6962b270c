/// Categorical cross-entropy loss for use with a Softmax output layer.
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// Computes the scalar cross-entropy loss:
    ///   L = -sum(expected[i] * log(predicted[i] + eps))
    ///
    /// `predicted` : softmax probabilities, shape [n_classes]
    /// `expected`  : one-hot (or soft) target distribution, shape [n_classes]
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| -e * (p + EPS).ln())
            .sum()
    }

    /// Gradient of the combined Softmax + cross-entropy w.r.t. the pre-softmax
    /// logits:
    ///   ∂L/∂z_i = predicted[i] - expected[i]
    ///
    /// `Classifier::backward` feeds this straight into the output convolution
    /// as a pre-activation gradient, so the softmax Jacobian is not applied twice.
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| p - e)
            .collect()
    }
}

/// One-hot encoding of `label` over `n_classes`.
pub fn one_hot(label: usize, n_classes: usize) -> Vec<f64> {
    let mut v = vec![0.0; n_classes];
    if label < n_classes {
        v[label] = 1.0;
    }
    v
}

/// Index of the maximum element in a slice.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction_has_near_zero_loss() {
        assert!(CrossEntropyLoss::loss(&[0.0, 1.0, 0.0], &one_hot(1, 3)) < 1e-9);
        assert!(CrossEntropyLoss::loss(&[0.5, 0.25, 0.25], &one_hot(1, 3)) > 1.3);
    }

    #[test]
    fn derivative_is_prediction_minus_target() {
        let d = CrossEntropyLoss::derivative(&[0.2, 0.8], &one_hot(1, 2));
        assert!((d[0] - 0.2).abs() < 1e-12);
        assert!((d[1] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn argmax_picks_largest() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(one_hot(4, 5), vec![0.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
