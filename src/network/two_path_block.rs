use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{shape, Result};
use crate::layers::{Conv2d, ConvGrads, Dropout, L1L2, MaxPool2d, Upstream};
use crate::math::tensor::Tensor3;
use crate::network::spec::BlockSpec;

/// Number of parameterized layers in one block.
pub const BLOCK_LAYERS: usize = 4;

/// Regularization shared by every block of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockRegularization {
    pub dropout_rate: f64,
    pub l1: f64,
    pub l2: f64,
}

/// Gradients produced by one backward pass through a block.
#[derive(Debug)]
pub struct BlockGrads {
    /// Indexed like `TwoPathBlock::layers()`; `None` where not requested.
    pub params: [Option<ConvGrads>; BLOCK_LAYERS],
    pub input: Option<Tensor3>,
}

/// Local + global convolutional pathways joined into a per-pixel classifier.
///
/// Fully convolutional: an input of `H × W` yields a `(n_classes, H − s, W − s)`
/// probability map where `s = spec.shrinkage()`.
#[derive(Debug, Clone)]
pub struct TwoPathBlock {
    pub spec: BlockSpec,
    pub in_channels: usize,
    pub regularization: BlockRegularization,
    pub local_first: Conv2d,
    local_first_pool: MaxPool2d,
    local_first_drop: Dropout,
    pub local_second: Conv2d,
    local_second_pool: MaxPool2d,
    local_second_drop: Dropout,
    pub global: Conv2d,
    global_drop: Dropout,
    pub output: Conv2d,
}

impl TwoPathBlock {
    pub fn new(
        prefix: &str,
        spec: &BlockSpec,
        in_channels: usize,
        reg: BlockRegularization,
        rng: &mut StdRng,
    ) -> Result<TwoPathBlock> {
        spec.validate()?;
        let l1l2 = L1L2 { l1: reg.l1, l2: reg.l2 };
        let path_conv = |name: &str, filters: usize, inputs: usize, kernel: usize, rng: &mut StdRng| {
            Conv2d::new(format!("{prefix}.{name}"), filters, inputs, kernel, ActivationFunction::ReLU, rng)
                .with_regularizer(l1l2)
                .with_max_norm(spec.max_norm)
        };

        let local_first = path_conv("local_first", spec.local_first.filters, in_channels, spec.local_first.kernel, rng);
        let local_second = path_conv(
            "local_second",
            spec.local_second.filters,
            spec.local_first.filters,
            spec.local_second.kernel,
            rng,
        );
        let global = path_conv("global", spec.global.filters, in_channels, spec.global.kernel, rng);
        let output = Conv2d::new(
            format!("{prefix}.output"),
            spec.n_classes,
            spec.concat_channels(),
            spec.output_kernel,
            ActivationFunction::Softmax,
            rng,
        );

        Ok(TwoPathBlock {
            spec: spec.clone(),
            in_channels,
            regularization: reg,
            local_first,
            local_first_pool: MaxPool2d::new(spec.local_first_pool),
            local_first_drop: Dropout::new(reg.dropout_rate),
            local_second,
            local_second_pool: MaxPool2d::new(spec.local_second_pool),
            local_second_drop: Dropout::new(reg.dropout_rate),
            global,
            global_drop: Dropout::new(reg.dropout_rate),
            output,
        })
    }

    /// Parameterized layers in graph order; the output convolution is last.
    pub fn layers(&self) -> [&Conv2d; BLOCK_LAYERS] {
        [&self.local_first, &self.local_second, &self.global, &self.output]
    }

    pub fn layers_mut(&mut self) -> [&mut Conv2d; BLOCK_LAYERS] {
        [&mut self.local_first, &mut self.local_second, &mut self.global, &mut self.output]
    }

    /// Spatial size of the class map produced for an `extent × extent` input.
    pub fn output_extent(&self, extent: usize) -> Option<usize> {
        extent.checked_sub(self.spec.shrinkage())
    }

    /// Forward pass.  `rng` is `Some` while training, enabling dropout.
    pub fn forward(&mut self, input: &Tensor3, mut rng: Option<&mut StdRng>) -> Result<Tensor3> {
        if input.height < self.spec.receptive_field() || input.width < self.spec.receptive_field() {
            return Err(shape(format!(
                "block needs at least {0}x{0} input, got {1}x{2}",
                self.spec.receptive_field(),
                input.height,
                input.width
            )));
        }
        let local = self.local_first.feed_from(input)?;
        let local = self.local_first_pool.feed_from(&local)?;
        let local = self.local_first_drop.feed_from(local, rng.as_deref_mut());
        let local = self.local_second.feed_from(&local)?;
        let local = self.local_second_pool.feed_from(&local)?;
        let local = self.local_second_drop.feed_from(local, rng.as_deref_mut());

        let global = self.global.feed_from(input)?;
        let global = self.global_drop.feed_from(global, rng.as_deref_mut());

        let path = Tensor3::concat_channels(&[&local, &global])?;
        self.output.feed_from(&path)
    }

    /// Backward pass through the cached forward.
    ///
    /// `mask[i]` requests parameter gradients for `layers()[i]`; branches that
    /// contribute to neither a requested gradient nor `want_input` are skipped.
    pub fn backward(&self, upstream: Upstream, mask: [bool; BLOCK_LAYERS], want_input: bool) -> BlockGrads {
        let want_local = mask[0] || mask[1] || want_input;
        let want_global = mask[2] || want_input;
        let (output_grads, d_path) = self.output.compute_gradients(upstream, mask[3], want_local || want_global);

        let mut params = [None, None, None, output_grads];
        let mut d_input: Option<Tensor3> = None;

        if let Some(d_path) = d_path {
            let (d_local, d_global) = d_path.split_channels(self.spec.local_second.filters);

            if want_global {
                let d = self.global_drop.backward(d_global);
                let (grads, d_in) = self.global.compute_gradients(Upstream::Activation(d), mask[2], want_input);
                params[2] = grads;
                d_input = d_in;
            }

            if want_local {
                let d = self.local_second_drop.backward(d_local);
                let d = self.local_second_pool.backward(&d);
                let (grads, d) =
                    self.local_second
                        .compute_gradients(Upstream::Activation(d), mask[1], mask[0] || want_input);
                params[1] = grads;
                if let Some(d) = d {
                    let d = self.local_first_drop.backward(d);
                    let d = self.local_first_pool.backward(&d);
                    let (grads, d_in) =
                        self.local_first.compute_gradients(Upstream::Activation(d), mask[0], want_input);
                    params[0] = grads;
                    if let Some(d_in) = d_in {
                        d_input = Some(match d_input {
                            Some(acc) => acc + d_in,
                            None => d_in,
                        });
                    }
                }
            }
        }

        BlockGrads { params, input: d_input }
    }

    /// Sum of the L1/L2 penalties of the path kernels.
    pub fn penalty(&self) -> f64 {
        self.layers().iter().map(|l| l.penalty()).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::spec::ConvSpec;
    use rand::SeedableRng;

    /// A reduced block (receptive field 8) that keeps tests fast.
    pub(crate) fn small_spec() -> BlockSpec {
        BlockSpec {
            local_first: ConvSpec { filters: 6, kernel: 3 },
            local_first_pool: 2,
            local_second: ConvSpec { filters: 6, kernel: 2 },
            local_second_pool: 2,
            global: ConvSpec { filters: 8, kernel: 6 },
            output_kernel: 3,
            n_classes: 5,
            max_norm: 2.0,
        }
    }

    pub(crate) fn no_reg() -> BlockRegularization {
        BlockRegularization { dropout_rate: 0.0, l1: 0.0, l2: 0.0 }
    }

    #[test]
    fn default_block_collapses_33_patch_to_one_pixel() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut block = TwoPathBlock::new("b", &BlockSpec::default(), 4, no_reg(), &mut rng).unwrap();
        let out = block.forward(&Tensor3::zeros(4, 33, 33), None).unwrap();
        assert_eq!(out.shape(), (5, 1, 1));
        let sum: f64 = out.data.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn output_extent_is_input_minus_shrinkage() {
        let spec = small_spec();
        assert_eq!(spec.shrinkage(), 7);
        let mut rng = StdRng::seed_from_u64(1);
        let mut block = TwoPathBlock::new("b", &spec, 4, no_reg(), &mut rng).unwrap();
        let out = block.forward(&Tensor3::zeros(4, 20, 15), None).unwrap();
        assert_eq!(out.shape(), (5, 13, 8));
        assert_eq!(block.output_extent(20), Some(13));
    }

    #[test]
    fn undersized_input_is_a_shape_error() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut block = TwoPathBlock::new("b", &small_spec(), 4, no_reg(), &mut rng).unwrap();
        assert!(matches!(
            block.forward(&Tensor3::zeros(4, 7, 7), None),
            Err(crate::SegError::Shape(_))
        ));
    }

    #[test]
    fn backward_honours_the_mask() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut block = TwoPathBlock::new("b", &small_spec(), 4, no_reg(), &mut rng).unwrap();
        let input = Tensor3::from_data(4, 8, 8, crate::math::tensor::lecun_uniform(256, 1, &mut rng)).unwrap();
        let probs = block.forward(&input, None).unwrap();
        let grads = block.backward(Upstream::PreActivation(probs), [false, false, false, true], false);
        assert!(grads.params[..3].iter().all(|g| g.is_none()));
        assert!(grads.params[3].is_some());
        assert!(grads.input.is_none());

        let probs = block.forward(&input, None).unwrap();
        let grads = block.backward(Upstream::PreActivation(probs), [true; BLOCK_LAYERS], true);
        assert!(grads.params.iter().all(|g| g.is_some()));
        assert_eq!(grads.input.map(|t| t.shape()), Some((4, 8, 8)));
    }
}
