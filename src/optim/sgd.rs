use serde::{Deserialize, Serialize};

use crate::layers::ConvGrads;
use crate::network::classifier::Classifier;

/// Hyperparameters every SGD instance of a run shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    /// Learning-rate decay per update: `lr / (1 + decay · iterations)`.
    pub decay: f64,
}

/// Stochastic gradient descent with classical (non-Nesterov) momentum.
///
/// The set of layers it updates is fixed when it is built: toggling
/// `Conv2d::trainable` afterwards has no effect until a new `Sgd` is compiled
/// for the classifier (see `optim::freeze`).
#[derive(Debug, Clone)]
pub struct Sgd {
    pub config: SgdConfig,
    iterations: u64,
    /// Indices into `Classifier::layers()`.
    update_set: Vec<usize>,
    velocities: Vec<Option<ConvGrads>>,
}

impl Sgd {
    /// Builds an optimizer over the layers of `classifier` that are currently
    /// flagged trainable.
    pub fn compile(config: SgdConfig, classifier: &Classifier) -> Sgd {
        let update_set: Vec<usize> = classifier
            .layers()
            .iter()
            .enumerate()
            .filter(|(_, l)| l.trainable)
            .map(|(i, _)| i)
            .collect();
        let velocities = update_set.iter().map(|_| None).collect();
        Sgd { config, iterations: 0, update_set, velocities }
    }

    pub fn update_set(&self) -> &[usize] {
        &self.update_set
    }

    /// `mask[i]` is true when layer `i` is in the update set.
    pub fn update_mask(&self, n_layers: usize) -> Vec<bool> {
        let mut mask = vec![false; n_layers];
        for &i in &self.update_set {
            if i < n_layers {
                mask[i] = true;
            }
        }
        mask
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Decayed learning rate for the next update.
    pub fn current_learning_rate(&self) -> f64 {
        self.config.learning_rate / (1.0 + self.config.decay * self.iterations as f64)
    }

    /// Applies one update to every layer in the update set:
    ///   g ← g + ∂penalty/∂w
    ///   v ← momentum · v − lr · g
    ///   w ← w + v, then max-norm constraints.
    ///
    /// `grads` is indexed like `Classifier::layers()`; entries outside the
    /// update set are ignored.
    pub fn step(&mut self, classifier: &mut Classifier, grads: Vec<Option<ConvGrads>>) {
        let lr = self.current_learning_rate();
        let momentum = self.config.momentum;
        let mut grads = grads;
        let mut layers = classifier.layers_mut();

        for (slot, &idx) in self.update_set.iter().enumerate() {
            let (Some(layer), Some(grad)) = (layers.get_mut(idx), grads.get_mut(idx).and_then(Option::take)) else {
                continue;
            };
            let mut grad = grad;
            layer.penalty_gradient(&mut grad);

            let velocity = match self.velocities[slot].take() {
                Some(mut v) => {
                    v.scale(momentum);
                    grad.scale(-lr);
                    v.accumulate(&grad);
                    v
                }
                None => {
                    grad.scale(-lr);
                    grad
                }
            };
            layer.apply_update(&velocity);
            layer.apply_constraints();
            self.velocities[slot] = Some(velocity);
        }
        self.iterations += 1;
    }
}
