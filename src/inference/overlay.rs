use std::path::Path;

use image::{Rgb, RgbImage};
use tracing::info;

use crate::error::{shape, Result};
use crate::inference::reconstruct::ClassMap;

/// Gamma applied to the grayscale background before painting.
pub const OVERLAY_GAMMA: f64 = 0.65;

/// RGB color painted over pixels of classes 1 to 4; class 0 keeps the background.
pub const CLASS_COLORS: [[f64; 3]; 4] = [
    [1.0, 0.2, 0.2],
    [0.35, 0.75, 0.25],
    [0.0, 0.25, 0.9],
    [1.0, 1.0, 0.25],
];

/// Grows `map` back to `height × width` by replicating its edge labels.  The
/// map is assumed centered; odd excess goes to the bottom/right.
pub fn pad_edges(map: &ClassMap, height: usize, width: usize) -> Result<ClassMap> {
    if map.rows == 0 || map.cols == 0 || map.rows > height || map.cols > width {
        return Err(shape(format!(
            "cannot pad a {}x{} class map to {}x{}",
            map.rows, map.cols, height, width
        )));
    }
    let top = (height - map.rows) / 2;
    let left = (width - map.cols) / 2;
    let mut labels = Vec::with_capacity(height * width);
    for y in 0..height {
        let row = y.saturating_sub(top).min(map.rows - 1);
        for x in 0..width {
            let col = x.saturating_sub(left).min(map.cols - 1);
            labels.push(map.get(row, col));
        }
    }
    Ok(ClassMap { rows: height, cols: width, labels })
}

/// Paints `map` over a gamma-adjusted grayscale `background` (values in
/// [0, 1], row-major, `height × width`).
pub fn render_overlay(map: &ClassMap, background: &[f64], height: usize, width: usize) -> Result<RgbImage> {
    if background.len() != height * width {
        return Err(shape(format!(
            "background has {} pixels, expected {}x{}",
            background.len(),
            height,
            width
        )));
    }
    let padded = pad_edges(map, height, width)?;
    let to_u8 = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;

    let mut image = RgbImage::new(width as u32, height as u32);
    for (i, pixel) in image.pixels_mut().enumerate() {
        let color = match padded.labels[i] {
            0 => {
                let g = background[i].clamp(0.0, 1.0).powf(OVERLAY_GAMMA);
                [g, g, g]
            }
            label => CLASS_COLORS[(label as usize - 1).min(CLASS_COLORS.len() - 1)],
        };
        *pixel = Rgb([to_u8(color[0]), to_u8(color[1]), to_u8(color[2])]);
    }
    Ok(image)
}

pub fn save_overlay(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path)?;
    info!(path = %path.display(), "overlay written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(rows: usize, cols: usize, labels: Vec<u8>) -> ClassMap {
        ClassMap { rows, cols, labels }
    }

    #[test]
    fn padding_replicates_edges() {
        let padded = pad_edges(&map(2, 2, vec![1, 2, 3, 4]), 4, 5).unwrap();
        assert_eq!((padded.rows, padded.cols), (4, 5));
        assert_eq!(padded.get(0, 0), 1);
        assert_eq!(padded.get(0, 4), 2);
        assert_eq!(padded.get(3, 0), 3);
        assert_eq!(padded.get(2, 2), 4);
        assert!(pad_edges(&map(2, 2, vec![0; 4]), 1, 5).is_err());
    }

    #[test]
    fn classes_are_painted_and_background_is_gamma_adjusted() {
        let m = map(1, 2, vec![0, 1]);
        let image = render_overlay(&m, &[0.5, 0.5], 1, 2).unwrap();
        let expected = (0.5f64.powf(OVERLAY_GAMMA) * 255.0).round() as u8;
        assert_eq!(image.get_pixel(0, 0).0, [expected; 3]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 51, 51]);
    }

    #[test]
    fn background_size_must_match() {
        assert!(render_overlay(&map(1, 1, vec![0]), &[0.0; 3], 2, 2).is_err());
    }
}
