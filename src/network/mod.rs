pub mod classifier;
pub mod metadata;
pub mod persist;
pub mod spec;
pub mod two_path_block;

pub use classifier::{Classifier, ClassifierKind, PatchInput, MODALITIES};
pub use spec::{BlockSpec, ConvSpec};
pub use two_path_block::{BlockRegularization, TwoPathBlock};
