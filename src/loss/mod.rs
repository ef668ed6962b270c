pub mod cross_entropy;

pub use cross_entropy::{argmax, one_hot, CrossEntropyLoss};
