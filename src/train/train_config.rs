use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::error::{configuration, Result};
use crate::network::spec::BlockSpec;
use crate::network::two_path_block::BlockRegularization;
use crate::optim::sgd::SgdConfig;
use crate::train::epoch_stats::EpochStats;

/// Hyperparameters fixed at construction and shared by every training phase.
///
/// Missing keys in a JSON config fall back to the defaults below, which are
/// the values the architecture was published with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub dropout_rate: f64,
    pub learning_rate: f64,
    pub momentum_rate: f64,
    /// Learning-rate decay per update.
    pub decay_rate: f64,
    pub l1_rate: f64,
    pub l2_rate: f64,
    pub batch_size: usize,
    pub nb_epoch: usize,
    /// Sample-count target handed to the patch source.
    pub nb_sample: usize,
    /// Trailing fraction of each (shuffled) set held out for validation.
    pub validation_split: f64,
    /// Epochs without validation improvement before a phase stops.
    pub patience: usize,
    /// Where per-epoch checkpoints go; `None` disables them.
    pub checkpoint_dir: Option<PathBuf>,
    /// Seed for weight init, shuffling and dropout.
    pub seed: u64,
    pub architecture: BlockSpec,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            dropout_rate: 0.2,
            learning_rate: 0.01,
            momentum_rate: 0.5,
            decay_rate: 0.1,
            l1_rate: 0.001,
            l2_rate: 0.001,
            batch_size: 10,
            nb_epoch: 10,
            nb_sample: 50,
            validation_split: 0.3,
            patience: 2,
            checkpoint_dir: Some(PathBuf::from("./check")),
            seed: 0,
            architecture: BlockSpec::default(),
        }
    }
}

impl NetworkConfig {
    /// Defaults for the two-block cascade, which trains with larger batches.
    pub fn cascade_default() -> Self {
        NetworkConfig { batch_size: 20, ..NetworkConfig::default() }
    }

    pub fn sgd(&self) -> SgdConfig {
        SgdConfig {
            learning_rate: self.learning_rate,
            momentum: self.momentum_rate,
            decay: self.decay_rate,
        }
    }

    pub fn regularization(&self) -> BlockRegularization {
        BlockRegularization {
            dropout_rate: self.dropout_rate,
            l1: self.l1_rate,
            l2: self.l2_rate,
        }
    }

    /// Settings for one `train_loop` run.
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.nb_epoch,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            patience: self.patience,
            checkpoint_dir: self.checkpoint_dir.clone(),
            progress_tx: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(configuration("batch_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(configuration(format!(
                "validation_split must lie in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(configuration(format!("dropout_rate must lie in [0, 1), got {}", self.dropout_rate)));
        }
        if self.learning_rate <= 0.0 {
            return Err(configuration("learning_rate must be positive"));
        }
        if self.decay_rate < 0.0 {
            return Err(configuration(format!("decay_rate must not be negative, got {}", self.decay_rate)));
        }
        if self.momentum_rate < 0.0 {
            return Err(configuration(format!("momentum_rate must not be negative, got {}", self.momentum_rate)));
        }
        self.architecture.validate()
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a config from a JSON file; absent keys take defaults.
    pub fn load_json(path: &Path) -> Result<NetworkConfig> {
        let reader = BufReader::new(File::open(path)?);
        let config: NetworkConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `epochs`           : upper bound on full passes over the training data
/// - `batch_size`       : samples per mini-batch
/// - `validation_split` : trailing fraction held out for validation loss
/// - `patience`         : early-stopping patience in epochs
/// - `checkpoint_dir`   : directory for one snapshot per epoch, if any
/// - `progress_tx`      : optional channel; one `EpochStats` per completed
///                        epoch.  A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub patience: usize,
    pub checkpoint_dir: Option<PathBuf>,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
}
