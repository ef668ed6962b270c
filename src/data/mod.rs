pub mod dataset;
pub mod patch_source;

pub use dataset::{PatchSet, TrainingSet};
pub use patch_source::{
    collect_training_set, ClassDistribution, InMemoryPatchSource, JsonPatchSource, PatchRequest, PatchSource,
};
