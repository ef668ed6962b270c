use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{shape, Result};
use crate::math::tensor::{lecun_uniform, Tensor3};

/// Combined L1 + L2 kernel penalty: `l1 · Σ|w| + l2 · Σw²`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L1L2 {
    pub l1: f64,
    pub l2: f64,
}

/// Parameter gradients of one convolution, same layout as the layer's buffers.
#[derive(Debug, Clone)]
pub struct ConvGrads {
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

impl ConvGrads {
    pub fn zeros_like(layer: &Conv2d) -> ConvGrads {
        ConvGrads {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    pub fn accumulate(&mut self, other: &ConvGrads) {
        for (a, b) in self.weights.iter_mut().zip(other.weights.iter()) {
            *a += b;
        }
        for (a, b) in self.biases.iter_mut().zip(other.biases.iter()) {
            *a += b;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.weights.iter_mut().for_each(|g| *g *= factor);
        self.biases.iter_mut().for_each(|g| *g *= factor);
    }
}

/// How the upstream gradient handed to `Conv2d::backward` is expressed.
#[derive(Debug, Clone)]
pub enum Upstream {
    /// ∂L/∂a, with respect to this layer's activated output.
    Activation(Tensor3),
    /// ∂L/∂z, already with respect to the pre-activation (e.g. the fused
    /// softmax + cross-entropy delta `p − y`).
    PreActivation(Tensor3),
}

/// Square-kernel 2-D convolution, stride 1, valid padding, channel-first.
///
/// Weights are laid out `[filter][in_channel][ky][kx]`.  The layer caches its
/// last input, pre-activation and activation so `backward` can run after `forward`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub name: String,
    pub filters: usize,
    pub in_channels: usize,
    pub kernel: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
    pub activator: ActivationFunction,
    pub regularizer: Option<L1L2>,
    /// Max-norm cap applied to every filter's kernel and to the bias vector.
    pub max_norm: Option<f64>,
    /// Read by the optimizer only when it is built; see `optim::freeze`.
    pub trainable: bool,
    input: Tensor3,
    pre_neurons: Tensor3,
    neurons: Tensor3,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        filters: usize,
        in_channels: usize,
        kernel: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = in_channels * kernel * kernel;
        Conv2d {
            name: name.into(),
            filters,
            in_channels,
            kernel,
            weights: lecun_uniform(filters * fan_in, fan_in, rng),
            biases: vec![0.0; filters],
            activator: activation,
            regularizer: None,
            max_norm: None,
            trainable: true,
            input: Tensor3::default(),
            pre_neurons: Tensor3::default(),
            neurons: Tensor3::default(),
        }
    }

    pub fn with_regularizer(mut self, regularizer: L1L2) -> Conv2d {
        self.regularizer = Some(regularizer);
        self
    }

    pub fn with_max_norm(mut self, max_norm: f64) -> Conv2d {
        self.max_norm = Some(max_norm);
        self
    }

    /// Spatial reduction along each axis: `kernel - 1`.
    pub fn shrinkage(&self) -> usize {
        self.kernel - 1
    }

    /// Shape of the activation cached by the last `feed_from`.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        self.neurons.shape()
    }

    #[inline]
    fn w_index(&self, f: usize, c: usize, ky: usize, kx: usize) -> usize {
        ((f * self.in_channels + c) * self.kernel + ky) * self.kernel + kx
    }

    pub fn feed_from(&mut self, input: &Tensor3) -> Result<Tensor3> {
        if input.channels != self.in_channels {
            return Err(shape(format!(
                "layer '{}' expects {} input channels, got {}",
                self.name, self.in_channels, input.channels
            )));
        }
        if input.height < self.kernel || input.width < self.kernel {
            return Err(shape(format!(
                "layer '{}' with {}x{} kernel cannot convolve a {}x{} input",
                self.name, self.kernel, self.kernel, input.height, input.width
            )));
        }
        let oh = input.height - self.kernel + 1;
        let ow = input.width - self.kernel + 1;
        let mut z = Tensor3::zeros(self.filters, oh, ow);
        for f in 0..self.filters {
            let out_base = f * oh * ow;
            z.data[out_base..out_base + oh * ow].fill(self.biases[f]);
            for c in 0..self.in_channels {
                for ky in 0..self.kernel {
                    for kx in 0..self.kernel {
                        let w = self.weights[self.w_index(f, c, ky, kx)];
                        for oy in 0..oh {
                            let src = input.index(c, oy + ky, kx);
                            let dst = out_base + oy * ow;
                            let out_row = &mut z.data[dst..dst + ow];
                            let in_row = &input.data[src..src + ow];
                            for (o, i) in out_row.iter_mut().zip(in_row.iter()) {
                                *o += w * i;
                            }
                        }
                    }
                }
            }
        }
        let a = self.activator.apply(&z);
        self.input = input.clone();
        self.pre_neurons = z;
        self.neurons = a.clone();
        Ok(a)
    }

    /// Backpropagates through the cached forward pass.
    ///
    /// Returns `(parameter gradients, ∂L/∂input)`; each half is only computed
    /// when requested.  Parameter gradients exclude the regularization term,
    /// which the optimizer adds via `penalty_gradient`.
    pub fn compute_gradients(
        &self,
        upstream: Upstream,
        want_params: bool,
        want_input: bool,
    ) -> (Option<ConvGrads>, Option<Tensor3>) {
        let dz = match upstream {
            Upstream::PreActivation(dz) => dz,
            Upstream::Activation(da) => self.activator.backward(&da, &self.pre_neurons, &self.neurons),
        };
        let (oh, ow) = (dz.height, dz.width);
        let mut grads = want_params.then(|| ConvGrads::zeros_like(self));
        let mut d_input = want_input.then(|| {
            Tensor3::zeros(self.input.channels, self.input.height, self.input.width)
        });

        for f in 0..self.filters {
            let out_base = f * oh * ow;
            let dz_f = &dz.data[out_base..out_base + oh * ow];
            if let Some(g) = grads.as_mut() {
                g.biases[f] = dz_f.iter().sum();
            }
            for c in 0..self.in_channels {
                for ky in 0..self.kernel {
                    for kx in 0..self.kernel {
                        let wi = self.w_index(f, c, ky, kx);
                        let w = self.weights[wi];
                        let mut acc = 0.0;
                        for oy in 0..oh {
                            let src = self.input.index(c, oy + ky, kx);
                            let dz_row = &dz_f[oy * ow..(oy + 1) * ow];
                            if grads.is_some() {
                                let in_row = &self.input.data[src..src + ow];
                                acc += dz_row.iter().zip(in_row.iter()).map(|(d, i)| d * i).sum::<f64>();
                            }
                            if let Some(di) = d_input.as_mut() {
                                let din_row = &mut di.data[src..src + ow];
                                for (o, d) in din_row.iter_mut().zip(dz_row.iter()) {
                                    *o += w * d;
                                }
                            }
                        }
                        if let Some(g) = grads.as_mut() {
                            g.weights[wi] = acc;
                        }
                    }
                }
            }
        }
        (grads, d_input)
    }

    /// Regularization contribution to the loss.
    pub fn penalty(&self) -> f64 {
        match self.regularizer {
            Some(L1L2 { l1, l2 }) => self.weights.iter().map(|w| l1 * w.abs() + l2 * w * w).sum(),
            None => 0.0,
        }
    }

    /// Adds ∂penalty/∂w to an existing weight gradient.
    pub fn penalty_gradient(&self, grads: &mut ConvGrads) {
        if let Some(L1L2 { l1, l2 }) = self.regularizer {
            for (g, w) in grads.weights.iter_mut().zip(self.weights.iter()) {
                let sign = if *w > 0.0 { 1.0 } else if *w < 0.0 { -1.0 } else { 0.0 };
                *g += l1 * sign + 2.0 * l2 * w;
            }
        }
    }

    /// Rescales any filter kernel (and the bias vector) whose L2 norm exceeds
    /// `max_norm` back onto the norm ball.
    pub fn apply_constraints(&mut self) {
        let Some(cap) = self.max_norm else { return };
        let fan_in = self.in_channels * self.kernel * self.kernel;
        for filter in self.weights.chunks_mut(fan_in) {
            clip_norm(filter, cap);
        }
        clip_norm(&mut self.biases, cap);
    }

    /// Applies an already-scaled update `delta` (new = old + delta).
    pub fn apply_update(&mut self, delta: &ConvGrads) {
        for (w, d) in self.weights.iter_mut().zip(delta.weights.iter()) {
            *w += d;
        }
        for (b, d) in self.biases.iter_mut().zip(delta.biases.iter()) {
            *b += d;
        }
    }
}

fn clip_norm(values: &mut [f64], cap: f64) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > cap {
        let scale = cap / norm;
        values.iter_mut().for_each(|v| *v *= scale);
    }
}
