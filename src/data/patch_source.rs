use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use tracing::info;

use crate::data::dataset::{PatchSet, TrainingSet};
use crate::error::{shape, Result};
use crate::math::tensor::Tensor3;

/// Which class distribution a patch source should sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDistribution {
    /// Class frequencies as they occur in the slices.
    Natural,
    /// Equal number of samples per class.
    Uniform,
}

/// What to sample: source slices, where their labels live, how many
/// patches, and at which sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub train_samples: Vec<PathBuf>,
    pub label_folder: PathBuf,
    pub num_samples: usize,
    pub narrow_size: usize,
    /// Set when the cascade also needs wide patches.
    pub wide_size: Option<usize>,
}

/// Supplier of labeled training patches.  Sampling and class balancing live
/// behind this trait; implementations must return patches already sized as
/// requested.
pub trait PatchSource {
    fn make_training_patches(&mut self, request: &PatchRequest, distribution: ClassDistribution) -> Result<PatchSet>;
}

/// Pulls both distributions from `source` and checks every patch size.
pub fn collect_training_set(source: &mut dyn PatchSource, request: &PatchRequest) -> Result<TrainingSet> {
    let natural = source.make_training_patches(request, ClassDistribution::Natural)?;
    let uniform = source.make_training_patches(request, ClassDistribution::Uniform)?;
    for set in [&natural, &uniform] {
        check_sizes(&set.narrow, request.narrow_size, "narrow")?;
        if let (Some(wide), Some(size)) = (&set.wide, request.wide_size) {
            check_sizes(wide, size, "wide")?;
        }
    }
    info!(
        natural = natural.len(),
        uniform = uniform.len(),
        with_wide = natural.has_wide() && uniform.has_wide(),
        "training patches collected"
    );
    Ok(TrainingSet { natural, uniform })
}

fn check_sizes(patches: &[Tensor3], size: usize, what: &str) -> Result<()> {
    if let Some(p) = patches.iter().find(|p| p.height != size || p.width != size) {
        return Err(shape(format!(
            "{} patches must be {}x{}, got {}x{}",
            what, size, size, p.height, p.width
        )));
    }
    Ok(())
}

/// Patch source backed by two JSON files holding pre-sampled `PatchSet`s.
#[derive(Debug, Clone)]
pub struct JsonPatchSource {
    pub natural_path: PathBuf,
    pub uniform_path: PathBuf,
}

impl PatchSource for JsonPatchSource {
    fn make_training_patches(&mut self, _request: &PatchRequest, distribution: ClassDistribution) -> Result<PatchSet> {
        let path = match distribution {
            ClassDistribution::Natural => &self.natural_path,
            ClassDistribution::Uniform => &self.uniform_path,
        };
        let set: PatchSet = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok(set)
    }
}

/// Patch source over sets already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPatchSource {
    pub natural: PatchSet,
    pub uniform: PatchSet,
}

impl PatchSource for InMemoryPatchSource {
    fn make_training_patches(&mut self, _request: &PatchRequest, distribution: ClassDistribution) -> Result<PatchSet> {
        Ok(match distribution {
            ClassDistribution::Natural => self.natural.clone(),
            ClassDistribution::Uniform => self.uniform.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(narrow: usize) -> PatchRequest {
        PatchRequest {
            train_samples: vec![],
            label_folder: PathBuf::from("labels"),
            num_samples: 2,
            narrow_size: narrow,
            wide_size: None,
        }
    }

    #[test]
    fn json_source_reads_both_distributions() {
        let dir = tempdir().unwrap();
        let natural = PatchSet::new(vec![Tensor3::zeros(4, 3, 3)], None, vec![0]).unwrap();
        let uniform = PatchSet::new(vec![Tensor3::zeros(4, 3, 3); 2], None, vec![1, 2]).unwrap();
        let natural_path = dir.path().join("natural.json");
        let uniform_path = dir.path().join("uniform.json");
        std::fs::write(&natural_path, serde_json::to_string(&natural).unwrap()).unwrap();
        std::fs::write(&uniform_path, serde_json::to_string(&uniform).unwrap()).unwrap();

        let mut source = JsonPatchSource { natural_path, uniform_path };
        let set = collect_training_set(&mut source, &request(3)).unwrap();
        assert_eq!(set.natural, natural);
        assert_eq!(set.uniform.labels, vec![1, 2]);
    }

    #[test]
    fn wrongly_sized_patches_are_rejected() {
        let mut source = InMemoryPatchSource {
            natural: PatchSet::new(vec![Tensor3::zeros(4, 5, 5)], None, vec![0]).unwrap(),
            uniform: PatchSet::default(),
        };
        assert!(matches!(
            collect_training_set(&mut source, &request(3)),
            Err(crate::SegError::Shape(_))
        ));
    }

    #[test]
    fn json_patch_with_a_short_buffer_is_an_error() {
        let dir = tempdir().unwrap();
        let natural_path = dir.path().join("natural.json");
        let uniform_path = dir.path().join("uniform.json");
        let body = r#"{"narrow":[{"channels":4,"height":3,"width":3,"data":[0,0,0,0,0,0,0,0,0,0]}],"labels":[0]}"#;
        std::fs::write(&natural_path, body).unwrap();
        std::fs::write(&uniform_path, body).unwrap();

        let mut source = JsonPatchSource { natural_path, uniform_path };
        assert!(matches!(
            collect_training_set(&mut source, &request(3)),
            Err(crate::SegError::Json(_))
        ));
    }
}
