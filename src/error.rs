use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SegError>;

/// Every failure surfaced by the crate.  Nothing is retried internally: an
/// error aborts the current operation and is handed back to the caller.
#[derive(Debug, Error)]
pub enum SegError {
    /// The requested operation cannot run with the supplied configuration or
    /// data (e.g. cascade training without wide patches).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tensor's dimensions do not match what the architecture expects.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A persisted architecture or weights file is absent.
    #[error("missing model artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub fn configuration(msg: impl Into<String>) -> SegError {
    SegError::Configuration(msg.into())
}

pub fn shape(msg: impl Into<String>) -> SegError {
    SegError::Shape(msg.into())
}
