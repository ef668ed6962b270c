pub mod freeze;
pub mod sgd;

pub use freeze::{CompiledModel, FreezeScope};
pub use sgd::{Sgd, SgdConfig};
