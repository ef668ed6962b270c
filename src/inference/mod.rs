pub mod overlay;
pub mod reconstruct;
pub mod slice;

pub use overlay::{render_overlay, save_overlay};
pub use reconstruct::{output_grid, predict_slice, ClassMap, PatchGrid, Prediction, PredictionKind};
pub use slice::{normalize_modalities, Modality, Slice};
