use serde::{Serialize, Deserialize};

use crate::error::{configuration, Result};

/// One convolution in a block description.
///
/// Fields:
/// - `filters` : number of output channels
/// - `kernel`  : side length of the square kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub filters: usize,
    pub kernel: usize,
}

/// A fully serializable description of one two-pathway block.
///
/// The defaults reproduce the published architecture:
///
/// ```text
/// local : conv 64@7x7 → maxpool 4x4 → dropout → conv 64@3x3 → maxpool 2x2 → dropout
/// global: conv 160@13x13 → dropout
/// output: concat(local, global) → conv n_classes@21x21 softmax
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub local_first: ConvSpec,
    pub local_first_pool: usize,
    pub local_second: ConvSpec,
    pub local_second_pool: usize,
    pub global: ConvSpec,
    pub output_kernel: usize,
    pub n_classes: usize,
    /// Norm cap for path kernels and biases.
    pub max_norm: f64,
}

impl Default for BlockSpec {
    fn default() -> Self {
        BlockSpec {
            local_first: ConvSpec { filters: 64, kernel: 7 },
            local_first_pool: 4,
            local_second: ConvSpec { filters: 64, kernel: 3 },
            local_second_pool: 2,
            global: ConvSpec { filters: 160, kernel: 13 },
            output_kernel: 21,
            n_classes: 5,
            max_norm: 2.0,
        }
    }
}

impl BlockSpec {
    /// Spatial reduction of the local path.
    pub fn local_shrinkage(&self) -> usize {
        (self.local_first.kernel - 1)
            + (self.local_first_pool - 1)
            + (self.local_second.kernel - 1)
            + (self.local_second_pool - 1)
    }

    pub fn global_shrinkage(&self) -> usize {
        self.global.kernel - 1
    }

    /// Total spatial reduction of the block: an `H × W` input yields an
    /// `(H − s) × (W − s)` class map.
    pub fn shrinkage(&self) -> usize {
        self.local_shrinkage() + self.output_kernel - 1
    }

    /// Smallest input that produces a single output pixel (33 by default).
    pub fn receptive_field(&self) -> usize {
        self.shrinkage() + 1
    }

    /// Channels entering the output convolution.
    pub fn concat_channels(&self) -> usize {
        self.local_second.filters + self.global.filters
    }

    /// Rejects specs whose two paths would produce differently sized maps.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            self.local_first.kernel,
            self.local_first_pool,
            self.local_second.kernel,
            self.local_second_pool,
            self.global.kernel,
            self.output_kernel,
        ];
        if sizes.iter().any(|&s| s == 0) {
            return Err(configuration("kernel and pool sizes must be at least 1"));
        }
        if self.n_classes < 2 {
            return Err(configuration("a block needs at least two output classes"));
        }
        if self.local_shrinkage() != self.global_shrinkage() {
            return Err(configuration(format!(
                "local path shrinks by {} but global path by {}; the paths cannot be concatenated",
                self.local_shrinkage(),
                self.global_shrinkage()
            )));
        }
        Ok(())
    }
}
