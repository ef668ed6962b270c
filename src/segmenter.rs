use std::path::PathBuf;

use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::data::dataset::TrainingSet;
use crate::data::patch_source::{collect_training_set, PatchRequest, PatchSource};
use crate::error::Result;
use crate::inference::overlay::render_overlay;
use crate::inference::reconstruct::{predict_slice, ClassMap, Prediction, PredictionKind};
use crate::inference::slice::{Modality, Slice};
use crate::network::classifier::{Classifier, ClassifierKind};
use crate::network::persist::{load_model, save_model};
use crate::optim::freeze::CompiledModel;
use crate::train::phased::{train_phased, PhaseRecord};
use crate::train::train_config::NetworkConfig;

/// A classifier together with the configuration and RNG that train it.
///
/// ```no_run
/// use std::path::Path;
/// use ferrite_brainseg::{NetworkConfig, Segmenter, Slice};
///
/// let mut seg = Segmenter::load("bm_cascade", NetworkConfig::cascade_default())?;
/// let slice = Slice::load(Path::new("slice_042.png"))?;
/// let map = seg.segment(&slice)?;
/// println!("{} x {} labels", map.rows, map.cols);
/// # Ok::<(), ferrite_brainseg::SegError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: NetworkConfig,
    model: CompiledModel,
    rng: StdRng,
}

impl Segmenter {
    /// Builds a freshly initialized classifier of `kind`.
    pub fn new(kind: ClassifierKind, config: NetworkConfig) -> Result<Segmenter> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let classifier = Classifier::new(kind, &config.architecture, config.regularization(), &mut rng)?;
        Ok(Segmenter::with_rng(classifier, config, rng))
    }

    /// Wraps an existing classifier; used after loading.
    pub fn from_classifier(classifier: Classifier, config: NetworkConfig) -> Result<Segmenter> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Segmenter::with_rng(classifier, config, rng))
    }

    fn with_rng(classifier: Classifier, config: NetworkConfig, rng: StdRng) -> Segmenter {
        let model = CompiledModel::compile(classifier, config.sgd());
        Segmenter { config, model, rng }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.model.classifier
    }

    pub fn kind(&self) -> ClassifierKind {
        self.model.classifier.kind()
    }

    /// Runs the phased protocol on a copy of the classifier; the segmenter
    /// only takes the result when every phase succeeds.
    pub fn fit(&mut self, data: TrainingSet) -> Result<Vec<PhaseRecord>> {
        let trained = train_phased(self.model.classifier.clone(), data, &self.config, &mut self.rng)?;
        self.model = trained.model;
        Ok(trained.phases)
    }

    /// Patch request matching this classifier's input sizes.
    pub fn patch_request(&self, train_samples: Vec<PathBuf>, label_folder: PathBuf) -> PatchRequest {
        PatchRequest {
            train_samples,
            label_folder,
            num_samples: self.config.nb_sample,
            narrow_size: self.model.classifier.narrow_size(),
            wide_size: self.model.classifier.wide_size(),
        }
    }

    /// Pulls both distributions from `source`, then fits.
    pub fn fit_from_source(&mut self, source: &mut dyn PatchSource, request: &PatchRequest) -> Result<Vec<PhaseRecord>> {
        let data = collect_training_set(source, request)?;
        self.fit(data)
    }

    /// Writes `{name}.json` and `{name}.hdf5`.
    pub fn save(&self, name: &str) -> Result<()> {
        save_model(&self.model.classifier, name)
    }

    /// Rebuilds a segmenter from `{name}.json` and `{name}.hdf5`.  The
    /// architecture stored with the weights overrides `config.architecture`.
    pub fn load(name: &str, config: NetworkConfig) -> Result<Segmenter> {
        let classifier = load_model(name)?;
        let architecture = classifier.blocks()[0].spec.clone();
        Segmenter::from_classifier(classifier, NetworkConfig { architecture, ..config })
    }

    pub fn predict_slice(&mut self, slice: &Slice, kind: PredictionKind) -> Result<Prediction> {
        let modalities = slice.modalities();
        predict_slice(&mut self.model.classifier, &modalities, self.config.batch_size, kind)
    }

    /// Per-pixel arg-max classes of `slice`.
    pub fn segment(&mut self, slice: &Slice) -> Result<ClassMap> {
        Ok(self.predict_slice(slice, PredictionKind::ClassMap)?.into_class_map())
    }

    /// Class map painted over the chosen modality, at full slice size.
    pub fn segment_overlay(&mut self, slice: &Slice, modality: Modality) -> Result<RgbImage> {
        let map = self.segment(slice)?;
        info!(counts = ?map.class_counts(self.model.classifier.n_classes()), "slice segmented");
        render_overlay(&map, &slice.background(modality), slice.height(), slice.width())
    }
}
