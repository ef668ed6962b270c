use rand::Rng;

use crate::math::tensor::Tensor3;

/// Inverted dropout: while training each unit is zeroed with probability
/// `rate` and survivors are scaled by `1 / (1 - rate)`; at inference it is
/// the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    pub rate: f64,
    mask: Option<Vec<f64>>,
}

impl Dropout {
    pub fn new(rate: f64) -> Dropout {
        Dropout { rate, mask: None }
    }

    /// `rng` is `Some` in training mode.
    pub fn feed_from<R: Rng + ?Sized>(&mut self, input: Tensor3, rng: Option<&mut R>) -> Tensor3 {
        match rng {
            Some(rng) if self.rate > 0.0 => {
                let keep = 1.0 - self.rate;
                let mask: Vec<f64> = (0..input.data.len())
                    .map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
                    .collect();
                let mut out = input;
                for (v, m) in out.data.iter_mut().zip(mask.iter()) {
                    *v *= m;
                }
                self.mask = Some(mask);
                out
            }
            _ => {
                self.mask = None;
                input
            }
        }
    }

    pub fn backward(&self, grad: Tensor3) -> Tensor3 {
        match &self.mask {
            Some(mask) => {
                let mut out = grad;
                for (g, m) in out.data.iter_mut().zip(mask.iter()) {
                    *g *= m;
                }
                out
            }
            None => grad,
        }
    }
}
