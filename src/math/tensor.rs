use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crate::error::{shape, Result};

/// Channel-first 3-D tensor `(channels, height, width)` stored as one flat
/// row-major buffer: `data[c * height * width + y * width + x]`.
///
/// Deserialization goes through `from_data`, so a buffer that does not match
/// the declared shape is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor3")]
pub struct Tensor3 {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawTensor3 {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f64>,
}

impl TryFrom<RawTensor3> for Tensor3 {
    type Error = crate::error::SegError;

    fn try_from(raw: RawTensor3) -> Result<Tensor3> {
        Tensor3::from_data(raw.channels, raw.height, raw.width, raw.data)
    }
}

impl Tensor3 {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Tensor3 {
        Tensor3 {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn from_data(channels: usize, height: usize, width: usize, data: Vec<f64>) -> Result<Tensor3> {
        if data.len() != channels * height * width {
            return Err(shape(format!(
                "buffer of {} values cannot hold a ({}, {}, {}) tensor",
                data.len(), channels, height, width
            )));
        }
        Ok(Tensor3 { channels, height, width, data })
    }

    /// Fails when `data` does not hold exactly `channels * height * width` values.
    pub fn check_buffer(&self) -> Result<()> {
        let expected = self.channels * self.height * self.width;
        if self.data.len() != expected {
            return Err(shape(format!(
                "{:?} tensor holds {} values, expected {}",
                self.shape(), self.data.len(), expected
            )));
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    #[inline]
    pub fn index(&self, c: usize, y: usize, x: usize) -> usize {
        (c * self.height + y) * self.width + x
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f64 {
        self.data[self.index(c, y, x)]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, value: f64) {
        let i = self.index(c, y, x);
        self.data[i] = value;
    }

    /// One channel plane as a slice of `height * width` values.
    pub fn channel(&self, c: usize) -> &[f64] {
        let plane = self.height * self.width;
        &self.data[c * plane..(c + 1) * plane]
    }

    pub fn channel_mut(&mut self, c: usize) -> &mut [f64] {
        let plane = self.height * self.width;
        &mut self.data[c * plane..(c + 1) * plane]
    }

    pub fn map<F>(&self, functor: F) -> Tensor3
    where
        F: Fn(f64) -> f64,
    {
        Tensor3 {
            channels: self.channels,
            height: self.height,
            width: self.width,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Copies the `height × width` window whose top-left corner is `(top, left)`
    /// across every channel.
    pub fn window(&self, top: usize, left: usize, height: usize, width: usize) -> Result<Tensor3> {
        if top + height > self.height || left + width > self.width {
            return Err(shape(format!(
                "window {}x{} at ({}, {}) exceeds {}x{} tensor",
                height, width, top, left, self.height, self.width
            )));
        }
        let mut out = Tensor3::zeros(self.channels, height, width);
        for c in 0..self.channels {
            for y in 0..height {
                let src = self.index(c, top + y, left);
                let dst = out.index(c, y, 0);
                out.data[dst..dst + width].copy_from_slice(&self.data[src..src + width]);
            }
        }
        Ok(out)
    }

    /// Central `height × width` region; for odd excess the extra row/column is
    /// dropped from the bottom/right.
    pub fn center_crop(&self, height: usize, width: usize) -> Result<Tensor3> {
        if height > self.height || width > self.width {
            return Err(shape(format!(
                "cannot center-crop {}x{} out of {}x{}",
                height, width, self.height, self.width
            )));
        }
        let top = self.height / 2 - height / 2;
        let left = self.width / 2 - width / 2;
        self.window(top, left, height, width)
    }

    /// Stacks tensors along the channel axis, in order.
    pub fn concat_channels(parts: &[&Tensor3]) -> Result<Tensor3> {
        let first = parts.first().ok_or_else(|| shape("nothing to concatenate"))?;
        let (h, w) = (first.height, first.width);
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.data.len()).sum());
        let mut channels = 0;
        for part in parts {
            if part.height != h || part.width != w {
                return Err(shape(format!(
                    "cannot concatenate {}x{} with {}x{} along channels",
                    h, w, part.height, part.width
                )));
            }
            channels += part.channels;
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor3 { channels, height: h, width: w, data })
    }

    /// Inverse of `concat_channels` for two parts: the first `at` channels and the rest.
    pub fn split_channels(&self, at: usize) -> (Tensor3, Tensor3) {
        let cut = at * self.height * self.width;
        (
            Tensor3 {
                channels: at,
                height: self.height,
                width: self.width,
                data: self.data[..cut].to_vec(),
            },
            Tensor3 {
                channels: self.channels - at,
                height: self.height,
                width: self.width,
                data: self.data[cut..].to_vec(),
            },
        )
    }
}

impl Default for Tensor3 {
    fn default() -> Self {
        Tensor3 { channels: 0, height: 0, width: 0, data: vec![] }
    }
}

impl AddAssign<&Tensor3> for Tensor3 {
    fn add_assign(&mut self, rhs: &Tensor3) {
        if self.shape() != rhs.shape() {
            panic!("Tensors are of incorrect sizes")
        }
        for (a, b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a += b;
        }
    }
}

impl Add for Tensor3 {
    type Output = Tensor3;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += &rhs;
        self
    }
}

/// LeCun uniform initialization: samples from U(-limit, limit) with
/// `limit = sqrt(3 / fan_in)`.
///
/// Keeps activation variance near 1 for saturating nonlinearities; it is what
/// every convolution in the two-pathway block starts from.
pub fn lecun_uniform<R: Rng + ?Sized>(len: usize, fan_in: usize, rng: &mut R) -> Vec<f64> {
    let limit = (3.0 / fan_in as f64).sqrt();
    (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp(c: usize, h: usize, w: usize) -> Tensor3 {
        Tensor3::from_data(c, h, w, (0..c * h * w).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn center_crop_takes_the_middle() {
        let t = ramp(1, 5, 5);
        let c = t.center_crop(3, 3).unwrap();
        assert_eq!(c.shape(), (1, 3, 3));
        assert_eq!(c.get(0, 0, 0), t.get(0, 1, 1));
        assert_eq!(c.get(0, 2, 2), t.get(0, 3, 3));
    }

    #[test]
    fn center_crop_of_65_to_33_starts_at_16() {
        let t = ramp(1, 65, 65);
        let c = t.center_crop(33, 33).unwrap();
        assert_eq!(c.get(0, 0, 0), t.get(0, 16, 16));
        assert_eq!(c.get(0, 32, 32), t.get(0, 48, 48));
    }

    #[test]
    fn concat_then_split_restores_parts() {
        let a = ramp(2, 3, 4);
        let b = ramp(3, 3, 4).map(|v| -v);
        let joined = Tensor3::concat_channels(&[&a, &b]).unwrap();
        assert_eq!(joined.shape(), (5, 3, 4));
        assert_eq!(joined.get(2, 0, 1), b.get(0, 0, 1));
        let (left, right) = joined.split_channels(2);
        assert_eq!(left, a);
        assert_eq!(right, b);
    }

    #[test]
    fn concat_rejects_mismatched_extent() {
        let a = ramp(1, 3, 3);
        let b = ramp(1, 4, 3);
        assert!(Tensor3::concat_channels(&[&a, &b]).is_err());
    }

    #[test]
    fn window_out_of_bounds_is_a_shape_error() {
        let t = ramp(1, 4, 4);
        assert!(t.window(2, 2, 3, 3).is_err());
        assert!(Tensor3::from_data(1, 2, 2, vec![0.0; 3]).is_err());
        let short = Tensor3 { channels: 1, height: 2, width: 2, data: vec![0.0; 3] };
        assert!(short.check_buffer().is_err());
        assert!(ramp(1, 2, 2).check_buffer().is_ok());
    }

    #[test]
    fn lecun_uniform_respects_limit() {
        let mut rng = StdRng::seed_from_u64(7);
        let limit = (3.0_f64 / 49.0).sqrt();
        let w = lecun_uniform(1000, 49, &mut rng);
        assert!(w.iter().all(|v| v.abs() <= limit));
        assert!(w.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn deserializing_a_short_buffer_fails() {
        let json = r#"{"channels":4,"height":8,"width":8,"data":[0,0,0,0,0,0,0,0,0,0]}"#;
        assert!(serde_json::from_str::<Tensor3>(json).is_err());
        let ok = serde_json::to_string(&ramp(2, 1, 3)).unwrap();
        assert_eq!(serde_json::from_str::<Tensor3>(&ok).unwrap(), ramp(2, 1, 3));
    }
}
