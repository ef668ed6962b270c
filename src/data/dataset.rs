use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{configuration, shape, Result};
use crate::math::tensor::Tensor3;
use crate::network::classifier::PatchInput;

/// Labeled training patches.  `narrow[i]`, `wide[i]` (when present) and
/// `labels[i]` describe the same center pixel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub narrow: Vec<Tensor3>,
    #[serde(default)]
    pub wide: Option<Vec<Tensor3>>,
    pub labels: Vec<usize>,
}

impl PatchSet {
    pub fn new(narrow: Vec<Tensor3>, wide: Option<Vec<Tensor3>>, labels: Vec<usize>) -> Result<PatchSet> {
        let set = PatchSet { narrow, wide, labels };
        set.check_lengths()?;
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn has_wide(&self) -> bool {
        self.wide.is_some()
    }

    pub fn input(&self, i: usize) -> PatchInput<'_> {
        PatchInput {
            narrow: &self.narrow[i],
            wide: self.wide.as_ref().map(|w| &w[i]),
        }
    }

    fn check_lengths(&self) -> Result<()> {
        let n = self.labels.len();
        if self.narrow.len() != n || self.wide.as_ref().is_some_and(|w| w.len() != n) {
            return Err(shape(format!(
                "patch set has {} labels, {} narrow patches and {} wide patches",
                n,
                self.narrow.len(),
                self.wide.as_ref().map_or(0, |w| w.len())
            )));
        }
        Ok(())
    }

    /// Checks lengths, tensor buffers and that every label is a valid class.
    pub fn validate(&self, n_classes: usize) -> Result<()> {
        self.check_lengths()?;
        for patch in self.narrow.iter().chain(self.wide.iter().flatten()) {
            patch.check_buffer()?;
        }
        if let Some(bad) = self.labels.iter().find(|&&l| l >= n_classes) {
            return Err(configuration(format!("label {bad} outside 0..{n_classes}")));
        }
        Ok(())
    }

    /// Shuffles patches and labels together with one permutation.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.narrow = permute(std::mem::take(&mut self.narrow), &order);
        self.wide = self.wide.take().map(|w| permute(w, &order));
        self.labels = permute(std::mem::take(&mut self.labels), &order);
    }

    /// Splits off the trailing `fraction` of samples as a validation set.
    /// Returns `(train, validation)`; validation is `None` when it would be empty.
    pub fn split_validation(&self, fraction: f64) -> (PatchSet, Option<PatchSet>) {
        let n = self.len();
        let split_at = ((n as f64) * (1.0 - fraction)).floor() as usize;
        let split_at = split_at.min(n);
        let take = |range: std::ops::Range<usize>| PatchSet {
            narrow: self.narrow[range.clone()].to_vec(),
            wide: self.wide.as_ref().map(|w| w[range.clone()].to_vec()),
            labels: self.labels[range].to_vec(),
        };
        let train = take(0..split_at);
        let val = (split_at < n).then(|| take(split_at..n));
        (train, val)
    }

    /// Number of samples per class.
    pub fn class_counts(&self, n_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; n_classes];
        for &l in &self.labels {
            if l < n_classes {
                counts[l] += 1;
            }
        }
        counts
    }
}

fn permute<T: Default>(mut items: Vec<T>, order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| std::mem::take(&mut items[i])).collect()
}

/// The two training distributions consumed by the phased trainer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    /// Class frequencies as sampled from real slices (mostly healthy tissue).
    pub natural: PatchSet,
    /// Resampled so every class is equally represented.
    pub uniform: PatchSet,
}

impl TrainingSet {
    pub fn has_wide(&self) -> bool {
        self.natural.has_wide() && self.uniform.has_wide()
    }

    pub fn validate(&self, n_classes: usize) -> Result<()> {
        self.natural.validate(n_classes)?;
        self.uniform.validate(n_classes)
    }

    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.natural.shuffle(rng);
        self.uniform.shuffle(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tagged(n: usize) -> PatchSet {
        let narrow = (0..n).map(|i| Tensor3::from_data(1, 1, 1, vec![i as f64]).unwrap()).collect();
        let wide = (0..n).map(|i| Tensor3::from_data(1, 1, 1, vec![-(i as f64)]).unwrap()).collect();
        PatchSet::new(narrow, Some(wide), (0..n).map(|i| i % 5).collect()).unwrap()
    }

    #[test]
    fn shuffle_keeps_patches_and_labels_paired() {
        let mut set = tagged(20);
        let mut rng = StdRng::seed_from_u64(42);
        set.shuffle(&mut rng);
        let order: Vec<usize> = set.narrow.iter().map(|t| t.data[0] as usize).collect();
        assert_ne!(order, (0..20).collect::<Vec<_>>());
        for i in 0..20 {
            let id = set.narrow[i].data[0];
            assert_eq!(set.wide.as_ref().unwrap()[i].data[0], -id);
            assert_eq!(set.labels[i], id as usize % 5);
        }
    }

    #[test]
    fn shuffle_is_reproducible_for_a_seed() {
        let mut a = tagged(30);
        let mut b = tagged(30);
        a.shuffle(&mut StdRng::seed_from_u64(3));
        b.shuffle(&mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn validation_split_takes_the_tail() {
        let set = tagged(10);
        let (train, val) = set.split_validation(0.3);
        assert_eq!(train.len(), 7);
        let val = val.unwrap();
        assert_eq!(val.len(), 3);
        assert_eq!(val.narrow[0].data[0], 7.0);
        assert!(set.split_validation(0.0).1.is_none());
    }

    #[test]
    fn mismatched_lengths_and_bad_labels_are_rejected() {
        assert!(PatchSet::new(vec![Tensor3::zeros(1, 1, 1)], None, vec![]).is_err());
        let set = PatchSet::new(vec![Tensor3::zeros(1, 1, 1)], None, vec![7]).unwrap();
        assert!(set.validate(5).is_err());
    }

    #[test]
    fn validate_rejects_patches_whose_buffer_is_short() {
        let short = Tensor3 { channels: 4, height: 8, width: 8, data: vec![0.0; 10] };
        let set = PatchSet::new(vec![short], None, vec![0]).unwrap();
        assert!(matches!(set.validate(5), Err(crate::SegError::Shape(_))));
    }
}
