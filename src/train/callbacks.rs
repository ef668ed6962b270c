use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::Result;
use crate::network::classifier::Classifier;
use crate::network::persist::save_snapshot;
use crate::train::epoch_stats::EpochStats;

/// What the training loop should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hook invoked by `train_loop` after every completed epoch.
pub trait TrainerCallback {
    fn on_epoch_end(&mut self, stats: &EpochStats, classifier: &Classifier) -> Result<CallbackAction>;

    fn name(&self) -> &str;
}

/// Stops a run once the monitored loss (validation, else training) has not
/// improved for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    epochs_without_improvement: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            min_delta: 0.0,
            best_loss: f64::INFINITY,
            epochs_without_improvement: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_epoch_end(&mut self, stats: &EpochStats, _classifier: &Classifier) -> Result<CallbackAction> {
        let loss = stats.monitored_loss();
        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.epochs_without_improvement = 0;
            return Ok(CallbackAction::Continue);
        }
        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement >= self.patience {
            info!(
                epoch = stats.epoch,
                best_loss = self.best_loss,
                patience = self.patience,
                "early stopping"
            );
            return Ok(CallbackAction::Stop);
        }
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "EarlyStopping"
    }
}

/// Writes one weight snapshot per epoch as `bm_{epoch:02}-{loss:.2}.ckpt`
/// under `dir`, creating the directory on first use.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl ModelCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ModelCheckpoint { dir: dir.into(), written: Vec::new() }
    }

    pub fn file_name(epoch: usize, loss: f64) -> String {
        format!("bm_{:02}-{:.2}.ckpt", epoch, loss)
    }

    /// Paths written so far, oldest first.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl TrainerCallback for ModelCheckpoint {
    fn on_epoch_end(&mut self, stats: &EpochStats, classifier: &Classifier) -> Result<CallbackAction> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(stats.epoch, stats.monitored_loss()));
        save_snapshot(classifier, &path)?;
        debug!(path = %path.display(), "checkpoint written");
        self.written.push(path);
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "ModelCheckpoint"
    }
}
