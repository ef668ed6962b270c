pub mod callbacks;
pub mod epoch_stats;
pub mod loop_fn;
pub mod phased;
pub mod train_config;

pub use callbacks::{CallbackAction, EarlyStopping, ModelCheckpoint, TrainerCallback};
pub use epoch_stats::EpochStats;
pub use loop_fn::{evaluate, train_loop, train_loop_with_callbacks, FitHistory};
pub use phased::{train_phased, Phase, PhaseRecord, PhasedTraining};
pub use train_config::{NetworkConfig, TrainConfig};
