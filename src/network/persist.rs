use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{shape, Result, SegError};
use crate::network::classifier::{Classifier, ClassifierKind};
use crate::network::metadata::ModelMetadata;
use crate::network::spec::BlockSpec;
use crate::network::two_path_block::BlockRegularization;

/// Extension of the textual architecture artifact.
pub const ARCHITECTURE_EXT: &str = "json";
/// Extension of the binary weights artifact.
pub const WEIGHTS_EXT: &str = "hdf5";

/// Everything needed to rebuild an untrained classifier of the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub kind: ClassifierKind,
    pub block: BlockSpec,
    pub regularization: BlockRegularization,
    /// Parameterized layer names in graph order.
    pub layers: Vec<String>,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl Architecture {
    pub fn of(classifier: &Classifier) -> Architecture {
        let block = classifier.blocks()[0];
        Architecture {
            kind: classifier.kind(),
            block: block.spec.clone(),
            regularization: block.regularization,
            layers: classifier.layers().iter().map(|l| l.name.clone()).collect(),
            metadata: ModelMetadata::tumor_regions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub name: String,
    pub filters: usize,
    pub in_channels: usize,
    pub kernel: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

/// Architecture and weights in one value; the unit written per checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub architecture: Architecture,
    pub weights: Vec<LayerWeights>,
}

impl Snapshot {
    pub fn of(classifier: &Classifier) -> Snapshot {
        Snapshot {
            architecture: Architecture::of(classifier),
            weights: weights_of(classifier),
        }
    }

    /// Rebuilds a classifier.  Every layer comes back trainable; no optimizer
    /// state is stored.
    pub fn restore(&self) -> Result<Classifier> {
        // Initial values are overwritten below, so any seed will do.
        let mut rng = StdRng::seed_from_u64(0);
        let mut classifier = Classifier::new(
            self.architecture.kind,
            &self.architecture.block,
            self.architecture.regularization,
            &mut rng,
        )?;
        let layers = classifier.layers_mut();
        if layers.len() != self.weights.len() {
            return Err(shape(format!(
                "architecture has {} layers but {} weight sets were stored",
                layers.len(),
                self.weights.len()
            )));
        }
        for (layer, stored) in layers.into_iter().zip(self.weights.iter()) {
            if layer.name != stored.name
                || layer.weights.len() != stored.weights.len()
                || layer.biases.len() != stored.biases.len()
            {
                return Err(shape(format!(
                    "stored weights for '{}' ({} + {}) do not fit layer '{}' ({} + {})",
                    stored.name,
                    stored.weights.len(),
                    stored.biases.len(),
                    layer.name,
                    layer.weights.len(),
                    layer.biases.len()
                )));
            }
            layer.weights.clone_from(&stored.weights);
            layer.biases.clone_from(&stored.biases);
        }
        Ok(classifier)
    }
}

pub fn weights_of(classifier: &Classifier) -> Vec<LayerWeights> {
    classifier
        .layers()
        .into_iter()
        .map(|l| LayerWeights {
            name: l.name.clone(),
            filters: l.filters,
            in_channels: l.in_channels,
            kernel: l.kernel,
            weights: l.weights.clone(),
            biases: l.biases.clone(),
        })
        .collect()
}

/// `({name}.json, {name}.hdf5)`; `name` may include directories.
pub fn artifact_paths(name: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{name}.{ARCHITECTURE_EXT}")),
        PathBuf::from(format!("{name}.{WEIGHTS_EXT}")),
    )
}

/// Writes the architecture as pretty-printed JSON and the weights as a binary blob.
pub fn save_model(classifier: &Classifier, name: &str) -> Result<()> {
    let (arch_path, weights_path) = artifact_paths(name);
    let writer = BufWriter::new(File::create(&arch_path)?);
    serde_json::to_writer_pretty(writer, &Architecture::of(classifier))?;
    let writer = BufWriter::new(File::create(&weights_path)?);
    bincode::serialize_into(writer, &weights_of(classifier))?;
    info!(architecture = %arch_path.display(), weights = %weights_path.display(), "model saved");
    Ok(())
}

/// Reads the pair written by `save_model`.
pub fn load_model(name: &str) -> Result<Classifier> {
    let (arch_path, weights_path) = artifact_paths(name);
    info!(name, "loading model");
    let architecture: Architecture = serde_json::from_reader(BufReader::new(open_artifact(&arch_path)?))?;
    let weights: Vec<LayerWeights> = bincode::deserialize_from(BufReader::new(open_artifact(&weights_path)?))?;
    let classifier = Snapshot { architecture, weights }.restore()?;
    info!(name, "model loaded");
    Ok(classifier)
}

pub fn save_snapshot(classifier: &Classifier, path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &Snapshot::of(classifier))?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Classifier> {
    let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(open_artifact(path)?))?;
    snapshot.restore()
}

fn open_artifact(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SegError::MissingArtifact(path.to_path_buf()),
        _ => SegError::Io(e),
    })
}
