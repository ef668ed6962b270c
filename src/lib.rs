pub mod activation;
pub mod data;
pub mod error;
pub mod inference;
pub mod layers;
pub mod logging;
pub mod loss;
pub mod math;
pub mod network;
pub mod optim;
pub mod segmenter;
pub mod train;

// Convenience re-exports
pub use activation::activation::ActivationFunction;
pub use data::{ClassDistribution, JsonPatchSource, PatchRequest, PatchSet, PatchSource, TrainingSet};
pub use error::{Result, SegError};
pub use inference::{predict_slice, ClassMap, Modality, Prediction, PredictionKind, Slice};
pub use layers::Conv2d;
pub use math::tensor::Tensor3;
pub use network::persist::{load_model, save_model};
pub use network::{BlockSpec, Classifier, ClassifierKind, PatchInput};
pub use optim::{CompiledModel, FreezeScope, Sgd, SgdConfig};
pub use segmenter::Segmenter;
pub use train::{train_loop, train_phased, EpochStats, NetworkConfig, TrainConfig};
