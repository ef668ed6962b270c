use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{configuration, shape, Result};
use crate::layers::{Conv2d, ConvGrads, Upstream};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::tensor::Tensor3;
use crate::network::spec::BlockSpec;
use crate::network::two_path_block::{BlockRegularization, TwoPathBlock, BLOCK_LAYERS};

/// Raw MRI modalities per patch.
pub const MODALITIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Single,
    Cascade,
}

/// The patch(es) a classifier consumes for one center pixel.
#[derive(Debug, Clone, Copy)]
pub struct PatchInput<'a> {
    /// `receptive_field × receptive_field` patch.
    pub narrow: &'a Tensor3,
    /// Larger patch around the same center; required by the cascade only.
    pub wide: Option<&'a Tensor3>,
}

/// A single two-pathway block, or two blocks chained so the second sees the
/// first's class scores as extra channels next to the raw narrow patch.
#[derive(Debug, Clone)]
pub enum Classifier {
    Single(TwoPathBlock),
    Cascade { first: TwoPathBlock, second: TwoPathBlock },
}

impl Classifier {
    pub fn new(kind: ClassifierKind, spec: &BlockSpec, reg: BlockRegularization, rng: &mut StdRng) -> Result<Classifier> {
        let first = TwoPathBlock::new("cnn1", spec, MODALITIES, reg, rng)?;
        Ok(match kind {
            ClassifierKind::Single => Classifier::Single(first),
            ClassifierKind::Cascade => {
                let second = TwoPathBlock::new("cnn2", spec, MODALITIES + spec.n_classes, reg, rng)?;
                Classifier::Cascade { first, second }
            }
        })
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Classifier::Single(_) => ClassifierKind::Single,
            Classifier::Cascade { .. } => ClassifierKind::Cascade,
        }
    }

    pub fn blocks(&self) -> Vec<&TwoPathBlock> {
        match self {
            Classifier::Single(block) => vec![block],
            Classifier::Cascade { first, second } => vec![first, second],
        }
    }

    fn last_block(&self) -> &TwoPathBlock {
        match self {
            Classifier::Single(block) => block,
            Classifier::Cascade { second, .. } => second,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.last_block().spec.n_classes
    }

    /// Side of the narrow input patch (33 for the default block).
    pub fn narrow_size(&self) -> usize {
        self.last_block().spec.receptive_field()
    }

    /// Side of the wide input patch (65 for the default cascade).
    pub fn wide_size(&self) -> Option<usize> {
        match self {
            Classifier::Single(_) => None,
            Classifier::Cascade { first, second } => Some(second.spec.receptive_field() + first.spec.shrinkage()),
        }
    }

    /// Side of the window that must be cut from a slice for one prediction.
    pub fn window_size(&self) -> usize {
        self.wide_size().unwrap_or_else(|| self.narrow_size())
    }

    /// Parameterized layers in graph order; the classifier's output layer is last.
    pub fn layers(&self) -> Vec<&Conv2d> {
        self.blocks().into_iter().flat_map(|b| b.layers()).collect()
    }

    pub fn layers_mut(&mut self) -> Vec<&mut Conv2d> {
        match self {
            Classifier::Single(block) => block.layers_mut().into_iter().collect(),
            Classifier::Cascade { first, second } => {
                first.layers_mut().into_iter().chain(second.layers_mut()).collect()
            }
        }
    }

    fn check_patch(patch: &Tensor3, size: usize, what: &str) -> Result<()> {
        patch.check_buffer()?;
        if patch.shape() != (MODALITIES, size, size) {
            return Err(shape(format!(
                "{} patch must be ({}, {}, {}), got {:?}",
                what, MODALITIES, size, size, patch.shape()
            )));
        }
        Ok(())
    }

    /// Class probabilities for the center pixel of `input`.
    ///
    /// `rng` is `Some` while training (dropout active).
    pub fn forward(&mut self, input: PatchInput<'_>, mut rng: Option<&mut StdRng>) -> Result<Vec<f64>> {
        let narrow_size = self.narrow_size();
        let wide_size = self.wide_size();
        Self::check_patch(input.narrow, narrow_size, "narrow")?;
        let out = match self {
            Classifier::Single(block) => block.forward(input.narrow, rng)?,
            Classifier::Cascade { first, second } => {
                let wide = input
                    .wide
                    .ok_or_else(|| configuration("cascade classifier needs a wide patch for every sample"))?;
                Self::check_patch(wide, wide_size.unwrap_or(0), "wide")?;
                let scores = first.forward(wide, rng.as_deref_mut())?;
                let scores = scores.center_crop(narrow_size, narrow_size)?;
                let joined = Tensor3::concat_channels(&[input.narrow, &scores])?;
                second.forward(&joined, rng)?
            }
        };
        if out.height != 1 || out.width != 1 {
            return Err(shape(format!(
                "expected a single output pixel, got {}x{}",
                out.height, out.width
            )));
        }
        Ok(out.data)
    }

    pub fn predict(&mut self, input: PatchInput<'_>) -> Result<Vec<f64>> {
        self.forward(input, None)
    }

    /// Parameter gradients of the softmax + cross-entropy loss for the most
    /// recent `forward`, one entry per `layers()` element.
    ///
    /// Only layers flagged in `update_mask` get gradients; backpropagation
    /// stops at the earliest block that still has a flagged layer.
    pub fn backward(&self, predicted: &[f64], expected: &[f64], update_mask: &[bool]) -> Vec<Option<ConvGrads>> {
        let n_classes = predicted.len();
        let delta = CrossEntropyLoss::derivative(predicted, expected);
        let delta = Tensor3 { channels: n_classes, height: 1, width: 1, data: delta };
        let block_mask = |offset: usize| -> [bool; BLOCK_LAYERS] {
            let mut m = [false; BLOCK_LAYERS];
            for (i, slot) in m.iter_mut().enumerate() {
                *slot = update_mask.get(offset + i).copied().unwrap_or(false);
            }
            m
        };

        match self {
            Classifier::Single(block) => {
                let grads = block.backward(Upstream::PreActivation(delta), block_mask(0), false);
                grads.params.into_iter().collect()
            }
            Classifier::Cascade { first, second } => {
                let first_mask = block_mask(0);
                let reach_first = first_mask.iter().any(|&m| m);
                let second_grads = second.backward(Upstream::PreActivation(delta), block_mask(BLOCK_LAYERS), reach_first);

                let mut first_params: Vec<Option<ConvGrads>> = (0..BLOCK_LAYERS).map(|_| None).collect();
                if let Some(d_joined) = second_grads.input {
                    let (_, d_scores) = d_joined.split_channels(MODALITIES);
                    let d_scores = uncrop(&d_scores, &first.output);
                    first_params = first
                        .backward(Upstream::Activation(d_scores), first_mask, false)
                        .params
                        .into_iter()
                        .collect();
                }
                first_params.into_iter().chain(second_grads.params).collect()
            }
        }
    }

    /// Sum of all path-kernel penalties.
    pub fn penalty(&self) -> f64 {
        self.blocks().iter().map(|b| b.penalty()).sum()
    }
}

/// Places the gradient of a center crop back into the full extent of the
/// layer output it was cropped from.
fn uncrop(grad: &Tensor3, source: &Conv2d) -> Tensor3 {
    let full = source.output_shape();
    if grad.shape() == full {
        return grad.clone();
    }
    let (c, h, w) = full;
    let top = h / 2 - grad.height / 2;
    let left = w / 2 - grad.width / 2;
    let mut out = Tensor3::zeros(c, h, w);
    for ch in 0..c {
        for y in 0..grad.height {
            for x in 0..grad.width {
                out.set(ch, top + y, left + x, grad.get(ch, y, x));
            }
        }
    }
    out
}
