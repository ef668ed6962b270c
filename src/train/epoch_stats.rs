use serde::{Serialize, Deserialize};

/// Per-epoch training statistics emitted by `train_loop`.
///
/// Every completed epoch produces one value; it is logged, handed to the
/// callbacks, and sent on `TrainConfig::progress_tx` when one is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Mean cross-entropy over the training samples plus the weight penalty.
    pub train_loss: f64,
    /// Same measure on the held-out samples, if any were held out.
    pub val_loss: Option<f64>,
    /// Training accuracy as a fraction in [0, 1].
    pub train_accuracy: f64,
    pub val_accuracy: Option<f64>,
    /// Learning rate in effect at the end of the epoch.
    pub learning_rate: f64,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}

impl EpochStats {
    /// The loss monitored by early stopping and checkpoint naming:
    /// validation loss, falling back to training loss.
    pub fn monitored_loss(&self) -> f64 {
        self.val_loss.unwrap_or(self.train_loss)
    }
}
