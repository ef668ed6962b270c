use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::data::dataset::PatchSet;
use crate::error::{configuration, Result};
use crate::layers::ConvGrads;
use crate::loss::cross_entropy::{argmax, one_hot, CrossEntropyLoss};
use crate::network::classifier::Classifier;
use crate::optim::freeze::CompiledModel;
use crate::train::callbacks::{CallbackAction, EarlyStopping, ModelCheckpoint, TrainerCallback};
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::TrainConfig;

/// What one `train_loop` run did.
#[derive(Debug, Clone, Default)]
pub struct FitHistory {
    pub epochs: Vec<EpochStats>,
    pub stopped_early: bool,
}

impl FitHistory {
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Fits `model` on `data` with the callbacks derived from `config`: early
/// stopping with `config.patience`, and a per-epoch checkpoint when
/// `config.checkpoint_dir` is set.
pub fn train_loop(
    model: &mut CompiledModel,
    data: &PatchSet,
    config: &TrainConfig,
    rng: &mut StdRng,
) -> Result<FitHistory> {
    let mut callbacks: Vec<Box<dyn TrainerCallback>> = vec![Box::new(EarlyStopping::new(config.patience))];
    if let Some(dir) = &config.checkpoint_dir {
        callbacks.push(Box::new(ModelCheckpoint::new(dir.clone())));
    }
    train_loop_with_callbacks(model, data, config, rng, &mut callbacks)
}

/// Runs up to `config.epochs` epochs of mini-batch SGD.
///
/// The trailing `config.validation_split` of `data` is held out; the rest is
/// reshuffled with `rng` every epoch.  After each epoch the stats are logged,
/// sent on `config.progress_tx` (a dropped receiver is ignored) and handed to
/// every callback; any callback returning `Stop` ends the run.
pub fn train_loop_with_callbacks(
    model: &mut CompiledModel,
    data: &PatchSet,
    config: &TrainConfig,
    rng: &mut StdRng,
    callbacks: &mut [Box<dyn TrainerCallback>],
) -> Result<FitHistory> {
    if config.batch_size == 0 {
        return Err(configuration("batch_size must be at least 1"));
    }
    data.validate(model.classifier.n_classes())?;
    let (train, val) = data.split_validation(config.validation_split);
    if train.is_empty() {
        return Err(configuration(format!(
            "no training samples left out of {} after a {} validation split",
            data.len(),
            config.validation_split
        )));
    }

    let mut history = FitHistory::default();
    for epoch in 1..=config.epochs {
        let t_start = Instant::now();

        // ── One full pass over the training data ───────────────────────────
        let (train_ce, train_accuracy) = run_one_epoch(model, &train, config.batch_size, rng)?;
        let penalty = model.classifier.penalty();

        // ── Validation ────────────────────────────────────────────────────
        let (val_loss, val_accuracy) = match &val {
            Some(v) => {
                let (ce, acc) = evaluate(&mut model.classifier, v)?;
                (Some(ce + penalty), Some(acc))
            }
            None => (None, None),
        };

        let stats = EpochStats {
            epoch,
            total_epochs: config.epochs,
            train_loss: train_ce + penalty,
            val_loss,
            train_accuracy,
            val_accuracy,
            learning_rate: model.optimizer.current_learning_rate(),
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };
        info!(
            epoch,
            total = config.epochs,
            train_loss = stats.train_loss,
            val_loss = ?stats.val_loss,
            train_accuracy = stats.train_accuracy,
            "epoch finished"
        );

        // ── Emit progress ─────────────────────────────────────────────────
        if let Some(tx) = &config.progress_tx {
            let _ = tx.send(stats.clone());
        }

        let mut stop = false;
        for callback in callbacks.iter_mut() {
            if callback.on_epoch_end(&stats, &model.classifier)? == CallbackAction::Stop {
                debug!(callback = callback.name(), "callback requested stop");
                stop = true;
            }
        }
        history.epochs.push(stats);
        if stop {
            history.stopped_early = true;
            break;
        }
    }
    Ok(history)
}

/// Mean cross-entropy and accuracy of `classifier` on `data`, dropout off.
pub fn evaluate(classifier: &mut Classifier, data: &PatchSet) -> Result<(f64, f64)> {
    if data.is_empty() {
        return Ok((0.0, 0.0));
    }
    let n_classes = classifier.n_classes();
    let mut loss = 0.0;
    let mut correct = 0usize;
    for i in 0..data.len() {
        let probs = classifier.predict(data.input(i))?;
        let label = data.labels[i];
        loss += CrossEntropyLoss::loss(&probs, &one_hot(label, n_classes));
        if argmax(&probs) == label {
            correct += 1;
        }
    }
    let n = data.len() as f64;
    Ok((loss / n, correct as f64 / n))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// One shuffled pass of mini-batch SGD.  Returns the mean training
/// cross-entropy and accuracy, measured on the dropout forward passes.
fn run_one_epoch(
    model: &mut CompiledModel,
    data: &PatchSet,
    batch_size: usize,
    rng: &mut StdRng,
) -> Result<(f64, f64)> {
    let n = data.len();
    let n_classes = model.classifier.n_classes();
    let n_layers = model.classifier.layers().len();
    let mask = model.optimizer.update_mask(n_layers);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);

    let mut total_loss = 0.0;
    let mut correct = 0usize;

    for batch in indices.chunks(batch_size) {
        let mut acc_grads: Vec<Option<ConvGrads>> = (0..n_layers).map(|_| None).collect();

        for &idx in batch {
            let probs = model.classifier.forward(data.input(idx), Some(&mut *rng))?;
            let expected = one_hot(data.labels[idx], n_classes);
            total_loss += CrossEntropyLoss::loss(&probs, &expected);
            if argmax(&probs) == data.labels[idx] {
                correct += 1;
            }

            let grads = model.classifier.backward(&probs, &expected, &mask);
            for (acc, grad) in acc_grads.iter_mut().zip(grads) {
                if let Some(grad) = grad {
                    match acc {
                        Some(a) => a.accumulate(&grad),
                        None => *acc = Some(grad),
                    }
                }
            }
        }

        let inv_batch = 1.0 / batch.len() as f64;
        for grad in acc_grads.iter_mut().flatten() {
            grad.scale(inv_batch);
        }
        model.optimizer.step(&mut model.classifier, acc_grads);
    }

    Ok((total_loss / n as f64, correct as f64 / n as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tensor::Tensor3;
    use crate::network::classifier::ClassifierKind;
    use crate::network::two_path_block::tests::{no_reg, small_spec};
    use crate::optim::sgd::SgdConfig;
    use rand::{Rng, SeedableRng};
    use std::sync::mpsc;

    fn sgd() -> SgdConfig {
        SgdConfig { learning_rate: 0.05, momentum: 0.5, decay: 0.0 }
    }

    fn config(epochs: usize) -> TrainConfig {
        TrainConfig {
            epochs,
            batch_size: 4,
            validation_split: 0.25,
            patience: epochs,
            checkpoint_dir: None,
            progress_tx: None,
        }
    }

    /// Patches whose first channel is bright for class 1 and dark for class 0.
    fn two_class_set(n: usize, size: usize, rng: &mut StdRng) -> PatchSet {
        let mut narrow = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let label = i % 2;
            let mut t = Tensor3::zeros(4, size, size);
            for v in t.channel_mut(0) {
                *v = if label == 1 { 0.8 + 0.2 * rng.gen::<f64>() } else { 0.2 * rng.gen::<f64>() };
            }
            narrow.push(t);
            labels.push(label);
        }
        PatchSet::new(narrow, None, labels).unwrap()
    }

    fn model(rng: &mut StdRng) -> CompiledModel {
        let classifier = Classifier::new(ClassifierKind::Single, &small_spec(), no_reg(), rng).unwrap();
        CompiledModel::compile(classifier, sgd())
    }

    #[test]
    fn loss_decreases_on_a_separable_problem() {
        let mut rng = StdRng::seed_from_u64(11);
        let size = small_spec().receptive_field();
        let data = two_class_set(32, size, &mut rng);
        let mut model = model(&mut rng);
        let history = train_loop(&mut model, &data, &config(15), &mut rng).unwrap();
        let first = history.epochs.first().unwrap().train_loss;
        let last = history.last().unwrap().train_loss;
        assert!(last < first, "loss went from {first} to {last}");
        assert!(history.epochs.iter().all(|s| s.val_loss.is_some()));
    }

    #[test]
    fn progress_is_sent_and_a_dropped_receiver_is_ignored() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = two_class_set(8, small_spec().receptive_field(), &mut rng);
        let mut model = model(&mut rng);

        let (tx, rx) = mpsc::channel();
        let cfg = TrainConfig { progress_tx: Some(tx), ..config(3) };
        train_loop(&mut model, &data, &cfg, &mut rng).unwrap();
        assert_eq!(rx.try_iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![1, 2, 3]);

        let (tx, rx) = mpsc::channel();
        drop(rx);
        let cfg = TrainConfig { progress_tx: Some(tx), ..config(2) };
        assert_eq!(train_loop(&mut model, &data, &cfg, &mut rng).unwrap().epochs.len(), 2);
    }

    struct StopAt(usize);

    impl TrainerCallback for StopAt {
        fn on_epoch_end(&mut self, stats: &EpochStats, _: &Classifier) -> Result<CallbackAction> {
            Ok(if stats.epoch >= self.0 { CallbackAction::Stop } else { CallbackAction::Continue })
        }

        fn name(&self) -> &str {
            "StopAt"
        }
    }

    #[test]
    fn a_stopping_callback_ends_the_run() {
        let mut rng = StdRng::seed_from_u64(5);
        let data = two_class_set(8, small_spec().receptive_field(), &mut rng);
        let mut model = model(&mut rng);
        let mut callbacks: Vec<Box<dyn TrainerCallback>> = vec![Box::new(StopAt(2))];
        let history = train_loop_with_callbacks(&mut model, &data, &config(10), &mut rng, &mut callbacks).unwrap();
        assert_eq!(history.epochs.len(), 2);
        assert!(history.stopped_early);
    }

    #[test]
    fn empty_data_is_a_configuration_error() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = model(&mut rng);
        let err = train_loop(&mut model, &PatchSet::default(), &config(1), &mut rng);
        assert!(matches!(err, Err(crate::SegError::Configuration(_))));
    }

    #[test]
    fn learning_rate_decays_with_updates() {
        let mut rng = StdRng::seed_from_u64(8);
        let data = two_class_set(8, small_spec().receptive_field(), &mut rng);
        let classifier = Classifier::new(ClassifierKind::Single, &small_spec(), no_reg(), &mut rng).unwrap();
        let mut model = CompiledModel::compile(classifier, SgdConfig { decay: 0.1, ..sgd() });
        let history = train_loop(&mut model, &data, &config(2), &mut rng).unwrap();
        // 6 training samples in batches of 4: two updates per epoch.
        assert_eq!(model.optimizer.iterations(), 4);
        assert!((history.epochs[0].learning_rate - 0.05 / 1.2).abs() < 1e-12);
        assert!((history.epochs[1].learning_rate - 0.05 / 1.4).abs() < 1e-12);
    }
}
