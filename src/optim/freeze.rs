use tracing::info;

use crate::network::classifier::Classifier;
use crate::optim::sgd::{Sgd, SgdConfig};

/// Which prefix of a classifier's layers `freeze` marks non-trainable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeScope {
    /// Every parameterized layer.
    All,
    /// Everything except the final output layer.
    AllButOutput,
}

/// A classifier bound to the optimizer that trains it.
///
/// The optimizer's update set is captured at construction; changing which
/// layers train means building a new `CompiledModel`.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub classifier: Classifier,
    pub optimizer: Sgd,
}

impl CompiledModel {
    pub fn compile(classifier: Classifier, config: SgdConfig) -> CompiledModel {
        let optimizer = Sgd::compile(config, &classifier);
        info!(
            kind = ?classifier.kind(),
            trainable_layers = optimizer.update_set().len(),
            "model compiled"
        );
        CompiledModel { classifier, optimizer }
    }

    /// Marks the first N layers (all, or all but the output layer) as
    /// non-trainable and recompiles with a fresh optimizer of the same
    /// hyperparameters.  Consumes `self`: the previous optimizer, its momentum
    /// buffers and decay schedule are discarded.
    pub fn freeze(self, scope: FreezeScope) -> CompiledModel {
        let CompiledModel { mut classifier, optimizer } = self;
        let mut layers = classifier.layers_mut();
        let n = match scope {
            FreezeScope::All => layers.len(),
            FreezeScope::AllButOutput => layers.len().saturating_sub(1),
        };
        for layer in layers.iter_mut().take(n) {
            layer.trainable = false;
        }
        info!(?scope, frozen_layers = n, "model frozen");
        CompiledModel::compile(classifier, optimizer.config)
    }

    pub fn into_classifier(self) -> Classifier {
        self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ConvGrads;
    use crate::math::tensor::Tensor3;
    use crate::network::classifier::{ClassifierKind, PatchInput};
    use crate::network::two_path_block::tests::{no_reg, small_spec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn compiled(kind: ClassifierKind) -> CompiledModel {
        let mut rng = StdRng::seed_from_u64(9);
        let classifier = Classifier::new(kind, &small_spec(), no_reg(), &mut rng).unwrap();
        CompiledModel::compile(classifier, SgdConfig { learning_rate: 0.5, momentum: 0.5, decay: 0.0 })
    }

    #[test]
    fn all_but_output_leaves_only_the_last_layer_trainable() {
        let model = compiled(ClassifierKind::Cascade).freeze(FreezeScope::AllButOutput);
        let flags: Vec<bool> = model.classifier.layers().iter().map(|l| l.trainable).collect();
        assert_eq!(flags, vec![false, false, false, false, false, false, false, true]);
        assert_eq!(model.optimizer.update_set(), &[7]);
        assert_eq!(model.optimizer.iterations(), 0);
    }

    #[test]
    fn freezing_everything_empties_the_update_set() {
        let model = compiled(ClassifierKind::Single).freeze(FreezeScope::All);
        assert!(model.classifier.layers().iter().all(|l| !l.trainable));
        assert!(model.optimizer.update_set().is_empty());
    }

    #[test]
    fn gradient_steps_after_freeze_touch_only_the_output_layer() {
        let mut model = compiled(ClassifierKind::Single).freeze(FreezeScope::AllButOutput);
        let before: Vec<(Vec<f64>, Vec<f64>)> =
            model.classifier.layers().iter().map(|l| (l.weights.clone(), l.biases.clone())).collect();

        let patch = Tensor3::from_data(4, 8, 8, (0..256).map(|i| ((i * 7) % 13) as f64 / 13.0).collect()).unwrap();
        let target = [0.0, 0.0, 1.0, 0.0, 0.0];
        for _ in 0..3 {
            let p = model.classifier.forward(PatchInput { narrow: &patch, wide: None }, None).unwrap();
            let mask = model.optimizer.update_mask(4);
            let grads: Vec<Option<ConvGrads>> = model.classifier.backward(&p, &target, &mask);
            model.optimizer.step(&mut model.classifier, grads);
        }

        let after: Vec<(Vec<f64>, Vec<f64>)> =
            model.classifier.layers().iter().map(|l| (l.weights.clone(), l.biases.clone())).collect();
        for i in 0..3 {
            assert_eq!(before[i], after[i], "frozen layer {i} changed");
        }
        assert_ne!(before[3], after[3]);
    }
}
