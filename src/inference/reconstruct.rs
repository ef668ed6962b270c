use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{configuration, shape, Result};
use crate::loss::cross_entropy::argmax;
use crate::math::tensor::Tensor3;
use crate::network::classifier::{Classifier, PatchInput, MODALITIES};

/// Whether `predict_slice` returns the full probability volume or only the
/// per-pixel arg-max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictionKind {
    Probabilities,
    #[default]
    ClassMap,
}

/// Per-pixel class labels over the prediction grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMap {
    pub rows: usize,
    pub cols: usize,
    pub labels: Vec<u8>,
}

impl ClassMap {
    /// Arg-max over the channel axis of a `(classes, rows, cols)` volume.
    pub fn from_probabilities(volume: &Tensor3) -> ClassMap {
        let (classes, rows, cols) = volume.shape();
        let labels = (0..rows * cols)
            .map(|p| {
                let scores: Vec<f64> = (0..classes).map(|c| volume.data[c * rows * cols + p]).collect();
                argmax(&scores) as u8
            })
            .collect();
        ClassMap { rows, cols, labels }
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.labels[row * self.cols + col]
    }

    pub fn class_counts(&self, n_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; n_classes];
        for &l in &self.labels {
            if let Some(c) = counts.get_mut(l as usize) {
                *c += 1;
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// `(classes, rows, cols)`; every pixel's channel vector sums to 1.
    Probabilities(Tensor3),
    ClassMap(ClassMap),
}

impl Prediction {
    pub fn into_class_map(self) -> ClassMap {
        match self {
            Prediction::Probabilities(volume) => ClassMap::from_probabilities(&volume),
            Prediction::ClassMap(map) => map,
        }
    }
}

/// Every `window × window` patch position of an image, row-major.
/// Positions are computed on demand; no patch is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    pub rows: usize,
    pub cols: usize,
    pub window: usize,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize, window: usize) -> Result<PatchGrid> {
        let (rows, cols) = output_grid(height, width, window)?;
        Ok(PatchGrid { rows, cols, window })
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-left corner of the `i`-th patch.
    pub fn position(&self, i: usize) -> (usize, usize) {
        (i / self.cols, i % self.cols)
    }

    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len()).map(move |i| self.position(i))
    }
}

/// Size of the grid produced by sliding a `window` over a `height × width` image.
pub fn output_grid(height: usize, width: usize, window: usize) -> Result<(usize, usize)> {
    if window == 0 || height < window || width < window {
        return Err(shape(format!(
            "a {}x{} image holds no {}x{} patch",
            height, width, window, window
        )));
    }
    Ok((height - window + 1, width - window + 1))
}

/// Classifies every pixel of `modalities` (already normalized, 4 channels)
/// that has a full window around it.
///
/// A single-stage classifier slides its narrow window; a cascade slides the
/// wide window and takes each wide patch's center crop as the narrow input.
/// Patches are cut `batch_size` at a time so at most one batch of windows
/// is held in memory; each patch in the batch is still predicted on its own.
pub fn predict_slice(
    classifier: &mut Classifier,
    modalities: &Tensor3,
    batch_size: usize,
    kind: PredictionKind,
) -> Result<Prediction> {
    if batch_size == 0 {
        return Err(configuration("batch_size must be at least 1"));
    }
    if modalities.channels != MODALITIES {
        return Err(shape(format!(
            "expected {} modality channels, got {}",
            MODALITIES, modalities.channels
        )));
    }
    let narrow = classifier.narrow_size();
    let wide = classifier.wide_size();
    let grid = PatchGrid::new(modalities.height, modalities.width, classifier.window_size())?;
    let n_classes = classifier.n_classes();
    let plane = grid.len();
    info!(rows = grid.rows, cols = grid.cols, window = grid.window, "predicting slice");

    let mut volume = Tensor3::zeros(n_classes, grid.rows, grid.cols);
    let mut batch: Vec<(Tensor3, Option<Tensor3>)> = Vec::with_capacity(batch_size);
    for start in (0..plane).step_by(batch_size) {
        let end = (start + batch_size).min(plane);
        batch.clear();
        for i in start..end {
            let (top, left) = grid.position(i);
            let window = modalities.window(top, left, grid.window, grid.window)?;
            batch.push(match wide {
                Some(_) => (window.center_crop(narrow, narrow)?, Some(window)),
                None => (window, None),
            });
        }
        for (offset, (narrow_patch, wide_patch)) in batch.iter().enumerate() {
            let probs = classifier.predict(PatchInput { narrow: narrow_patch, wide: wide_patch.as_ref() })?;
            for (c, p) in probs.iter().enumerate() {
                volume.data[c * plane + start + offset] = *p;
            }
        }
        debug!(done = end, total = plane, "batch predicted");
    }

    Ok(match kind {
        PredictionKind::Probabilities => Prediction::Probabilities(volume),
        PredictionKind::ClassMap => Prediction::ClassMap(ClassMap::from_probabilities(&volume)),
    })
}
