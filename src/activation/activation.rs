use serde::{Serialize, Deserialize};

use crate::math::tensor::Tensor3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    ReLU,
    Identity,
    /// Softmax over the channel axis, independently at every pixel.  It is
    /// vector-valued, so `apply()` handles it instead of `function()`.
    Softmax,
}

impl ActivationFunction {
    /// Element-wise activation.  Not meaningful for `Softmax`.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Identity => x,
            ActivationFunction::Softmax => {
                panic!("ActivationFunction::Softmax::function() must not be called directly; \
                        use ActivationFunction::apply() which normalizes across channels.")
            }
        }
    }

    /// Element-wise derivative evaluated at the pre-activation `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Softmax => {
                panic!("ActivationFunction::Softmax has no element-wise derivative; \
                        use ActivationFunction::backward().")
            }
        }
    }

    /// Activates a whole pre-activation map.
    pub fn apply(&self, z: &Tensor3) -> Tensor3 {
        match self {
            ActivationFunction::Softmax => softmax_channels(z),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Maps ∂L/∂a back to ∂L/∂z given the cached pre-activation `z` and
    /// activation `a`.
    ///
    /// For `Softmax` the per-pixel Jacobian is applied:
    ///   ∂L/∂z_i = a_i · (g_i − Σ_j g_j · a_j)
    pub fn backward(&self, grad: &Tensor3, z: &Tensor3, a: &Tensor3) -> Tensor3 {
        match self {
            ActivationFunction::Softmax => {
                let mut out = Tensor3::zeros(grad.channels, grad.height, grad.width);
                let plane = grad.height * grad.width;
                for p in 0..plane {
                    let dot: f64 = (0..grad.channels)
                        .map(|c| grad.data[c * plane + p] * a.data[c * plane + p])
                        .sum();
                    for c in 0..grad.channels {
                        let i = c * plane + p;
                        out.data[i] = a.data[i] * (grad.data[i] - dot);
                    }
                }
                out
            }
            _ => {
                let mut out = grad.clone();
                for (g, &x) in out.data.iter_mut().zip(z.data.iter()) {
                    *g *= self.derivative(x);
                }
                out
            }
        }
    }
}

/// Numerically stable softmax across channels at every pixel.
fn softmax_channels(z: &Tensor3) -> Tensor3 {
    let plane = z.height * z.width;
    let mut out = Tensor3::zeros(z.channels, z.height, z.width);
    for p in 0..plane {
        let max = (0..z.channels)
            .map(|c| z.data[c * plane + p])
            .fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for c in 0..z.channels {
            let e = (z.data[c * plane + p] - max).exp();
            out.data[c * plane + p] = e;
            sum += e;
        }
        for c in 0..z.channels {
            out.data[c * plane + p] /= sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one_per_pixel() {
        let z = Tensor3::from_data(3, 1, 2, vec![1.0, -4.0, 2.0, 0.0, 3.0, 1000.0]).unwrap();
        let a = ActivationFunction::Softmax.apply(&z);
        for p in 0..2 {
            let s: f64 = (0..3).map(|c| a.data[c * 2 + p]).sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
        assert!(a.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn relu_backward_masks_negative_inputs() {
        let z = Tensor3::from_data(1, 1, 3, vec![-1.0, 0.0, 2.0]).unwrap();
        let a = ActivationFunction::ReLU.apply(&z);
        let g = Tensor3::from_data(1, 1, 3, vec![5.0, 5.0, 5.0]).unwrap();
        let dz = ActivationFunction::ReLU.backward(&g, &z, &a);
        assert_eq!(dz.data, vec![0.0, 0.0, 5.0]);
    }

    #[test]
    fn softmax_backward_of_cross_entropy_is_p_minus_y() {
        let z = Tensor3::from_data(3, 1, 1, vec![0.3, -0.2, 1.1]).unwrap();
        let a = ActivationFunction::Softmax.apply(&z);
        let y = [0.0, 1.0, 0.0];
        let g = Tensor3::from_data(3, 1, 1, (0..3).map(|c| -y[c] / a.data[c]).collect()).unwrap();
        let dz = ActivationFunction::Softmax.backward(&g, &z, &a);
        for c in 0..3 {
            assert!((dz.data[c] - (a.data[c] - y[c])).abs() < 1e-9);
        }
    }
}
