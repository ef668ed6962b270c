#![allow(dead_code)]

use ferrite_brainseg::inference::slice::SLICE_PLANES;
use ferrite_brainseg::network::ConvSpec;
use ferrite_brainseg::{BlockSpec, NetworkConfig, Slice, Tensor3};

/// Receptive field 8, shrinkage 7.
pub fn small_spec() -> BlockSpec {
    BlockSpec {
        local_first: ConvSpec { filters: 6, kernel: 3 },
        local_first_pool: 2,
        local_second: ConvSpec { filters: 6, kernel: 2 },
        local_second_pool: 2,
        global: ConvSpec { filters: 8, kernel: 6 },
        output_kernel: 3,
        n_classes: 5,
        max_norm: 2.0,
    }
}

pub fn quick_config() -> NetworkConfig {
    NetworkConfig {
        dropout_rate: 0.0,
        decay_rate: 0.0,
        l1_rate: 0.0,
        l2_rate: 0.0,
        nb_epoch: 1,
        checkpoint_dir: None,
        architecture: small_spec(),
        ..NetworkConfig::default()
    }
}

/// A slice whose modality planes are `background` everywhere except a square
/// blob of `1.0` covering rows and columns `blob.0..blob.1`.
pub fn blob_slice(height: usize, width: usize, blob: (usize, usize), background: f64) -> Slice {
    let mut planes = Tensor3::zeros(SLICE_PLANES, height, width);
    for c in 0..SLICE_PLANES {
        for y in 0..height {
            for x in 0..width {
                let inside = (blob.0..blob.1).contains(&y) && (blob.0..blob.1).contains(&x);
                planes.set(c, y, x, if inside { 1.0 } else { background });
            }
        }
    }
    Slice::from_planes(planes).unwrap()
}
