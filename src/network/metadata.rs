use serde::{Deserialize, Serialize};

/// Optional annotations attached to a saved classifier.
/// All fields are Option<> so architectures written without metadata deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    pub description: Option<String>,
    /// Human-readable names of the output classes, index-aligned with the softmax.
    pub class_labels: Option<Vec<String>>,
}

impl ModelMetadata {
    /// Labels for the five tumor-region classes.
    pub fn tumor_regions() -> Self {
        ModelMetadata {
            description: Some("two-pathway brain tumor segmentation".to_owned()),
            class_labels: Some(
                ["healthy", "necrosis", "edema", "non-enhancing", "enhancing"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        }
    }
}
