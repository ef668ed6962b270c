use crate::error::{shape, Result};
use crate::math::tensor::Tensor3;

/// Max pooling over `size × size` windows with stride 1 and valid padding.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    pub size: usize,
    /// Flat input index of the winner for every output cell.
    argmax: Vec<usize>,
    input_shape: (usize, usize, usize),
}

impl MaxPool2d {
    pub fn new(size: usize) -> MaxPool2d {
        MaxPool2d { size, argmax: Vec::new(), input_shape: (0, 0, 0) }
    }

    pub fn shrinkage(&self) -> usize {
        self.size - 1
    }

    pub fn feed_from(&mut self, input: &Tensor3) -> Result<Tensor3> {
        if input.height < self.size || input.width < self.size {
            return Err(shape(format!(
                "{}x{} pooling cannot reduce a {}x{} input",
                self.size, self.size, input.height, input.width
            )));
        }
        let oh = input.height - self.size + 1;
        let ow = input.width - self.size + 1;
        let mut out = Tensor3::zeros(input.channels, oh, ow);
        self.argmax = vec![0; out.data.len()];
        self.input_shape = input.shape();
        for c in 0..input.channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = input.index(c, oy, ox);
                    for dy in 0..self.size {
                        for dx in 0..self.size {
                            let i = input.index(c, oy + dy, ox + dx);
                            if input.data[i] > input.data[best] {
                                best = i;
                            }
                        }
                    }
                    let o = out.index(c, oy, ox);
                    out.data[o] = input.data[best];
                    self.argmax[o] = best;
                }
            }
        }
        Ok(out)
    }

    /// Routes each output gradient back to the input cell that won the window.
    pub fn backward(&self, grad: &Tensor3) -> Tensor3 {
        let (c, h, w) = self.input_shape;
        let mut d_input = Tensor3::zeros(c, h, w);
        for (o, &src) in self.argmax.iter().enumerate() {
            d_input.data[src] += grad.data[o];
        }
        d_input
    }
}
