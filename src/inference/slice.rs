use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{configuration, shape, Result};
use crate::math::tensor::Tensor3;
use crate::network::classifier::MODALITIES;

/// Planes stacked in one slice image: the four modalities and one auxiliary plane.
pub const SLICE_PLANES: usize = 5;
pub const SLICE_HEIGHT: usize = 216;
pub const SLICE_WIDTH: usize = 160;

/// MRI sequence stored in a slice plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Flair,
    T1,
    #[default]
    T1c,
    T2,
}

impl Modality {
    pub fn plane(self) -> usize {
        match self {
            Modality::Flair => 0,
            Modality::T1 => 1,
            Modality::T1c => 2,
            Modality::T2 => 3,
        }
    }
}

impl FromStr for Modality {
    type Err = crate::SegError;

    fn from_str(s: &str) -> Result<Modality> {
        match s.to_ascii_lowercase().as_str() {
            "flair" => Ok(Modality::Flair),
            "t1" => Ok(Modality::T1),
            "t1c" => Ok(Modality::T1c),
            "t2" => Ok(Modality::T2),
            other => Err(configuration(format!("unknown modality '{other}' (expected flair, t1, t1c or t2)"))),
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modality::Flair => "flair",
            Modality::T1 => "t1",
            Modality::T1c => "t1c",
            Modality::T2 => "t2",
        };
        f.write_str(name)
    }
}

/// One MRI slice: `SLICE_PLANES` raw planes of equal size.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    planes: Tensor3,
}

impl Slice {
    pub fn from_planes(planes: Tensor3) -> Result<Slice> {
        if planes.channels != SLICE_PLANES {
            return Err(shape(format!(
                "a slice holds {} planes, got {}",
                SLICE_PLANES, planes.channels
            )));
        }
        Ok(Slice { planes })
    }

    /// Loads a grayscale image whose rows hold the planes stacked vertically,
    /// e.g. a 160×1080 image for five 216×160 planes.
    pub fn load(path: &Path) -> Result<Slice> {
        let image = image::open(path)?.to_luma16();
        let (width, height) = (image.width() as usize, image.height() as usize);
        if height % SLICE_PLANES != 0 {
            return Err(shape(format!(
                "{}: image height {} is not a multiple of {} planes",
                path.display(),
                height,
                SLICE_PLANES
            )));
        }
        let data = image.pixels().map(|p| p.0[0] as f64).collect();
        let planes = Tensor3::from_data(SLICE_PLANES, height / SLICE_PLANES, width, data)?;
        debug!(path = %path.display(), height = planes.height, width = planes.width, "slice loaded");
        Slice::from_planes(planes)
    }

    pub fn height(&self) -> usize {
        self.planes.height
    }

    pub fn width(&self) -> usize {
        self.planes.width
    }

    pub fn planes(&self) -> &Tensor3 {
        &self.planes
    }

    /// The four modality planes without the auxiliary one, each divided by
    /// its own maximum.
    pub fn modalities(&self) -> Tensor3 {
        let (_, h, w) = self.planes.shape();
        let plane = h * w;
        let raw = Tensor3 {
            channels: MODALITIES,
            height: h,
            width: w,
            data: self.planes.data[..MODALITIES * plane].to_vec(),
        };
        normalize_modalities(&raw)
    }

    /// One raw plane scaled into [0, 1] by its maximum.
    pub fn background(&self, modality: Modality) -> Vec<f64> {
        normalize_plane(self.planes.channel(modality.plane()))
    }
}

/// Divides every channel by its own maximum; channels whose maximum is not
/// positive are returned unchanged.
pub fn normalize_modalities(planes: &Tensor3) -> Tensor3 {
    let mut out = planes.clone();
    for c in 0..out.channels {
        let normalized = normalize_plane(out.channel(c));
        out.channel_mut(c).copy_from_slice(&normalized);
    }
    out
}

fn normalize_plane(plane: &[f64]) -> Vec<f64> {
    let max = plane.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 {
        plane.iter().map(|v| v / max).collect()
    } else {
        plane.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use tempfile::tempdir;

    #[test]
    fn zero_channel_is_left_unscaled() {
        let mut t = Tensor3::zeros(2, 2, 2);
        t.channel_mut(1).copy_from_slice(&[1.0, 2.0, 4.0, 0.0]);
        let n = normalize_modalities(&t);
        assert_eq!(n.channel(0), &[0.0; 4]);
        assert_eq!(n.channel(1), &[0.25, 0.5, 1.0, 0.0]);
        assert!(n.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn modalities_drop_the_auxiliary_plane() {
        let mut planes = Tensor3::zeros(SLICE_PLANES, 3, 2);
        for c in 0..SLICE_PLANES {
            planes.channel_mut(c).iter_mut().for_each(|v| *v = (c + 1) as f64);
        }
        let slice = Slice::from_planes(planes).unwrap();
        let m = slice.modalities();
        assert_eq!(m.shape(), (MODALITIES, 3, 2));
        assert!(m.data.iter().all(|&v| v == 1.0));
        assert!(Slice::from_planes(Tensor3::zeros(4, 3, 2)).is_err());
    }

    #[test]
    fn stacked_image_is_split_into_planes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slice.png");
        let (w, h) = (4u32, 3u32);
        let img = ImageBuffer::from_fn(w, h * SLICE_PLANES as u32, |_, y| Luma([(y / h) as u16 * 1000]));
        img.save(&path).unwrap();

        let slice = Slice::load(&path).unwrap();
        assert_eq!((slice.height(), slice.width()), (3, 4));
        assert_eq!(slice.planes().get(2, 1, 1), 2000.0);
        assert_eq!(slice.planes().get(4, 2, 3), 4000.0);
    }

    #[test]
    fn modality_names_parse() {
        assert_eq!("T1C".parse::<Modality>().unwrap(), Modality::T1c);
        assert_eq!(Modality::Flair.plane(), 0);
        assert!("pd".parse::<Modality>().is_err());
    }
}
