pub mod conv2d;
pub mod dropout;
pub mod pooling;

pub use conv2d::{Conv2d, ConvGrads, L1L2, Upstream};
pub use dropout::Dropout;
pub use pooling::MaxPool2d;
