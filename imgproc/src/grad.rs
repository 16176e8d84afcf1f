//! Gradient routing for selection operators.
//!
//! Dilation, erosion and median blur each copy one input sample to every output
//! cell. Their sub-gradient is therefore a scatter: the upstream gradient of an
//! output cell flows back to the sample that was selected for it.

use crate::{ImgprocError, Result};
use lidar_core::{Tensor, TensorShape};

/// Forward result of a selection operator together with its routing table.
#[derive(Debug, Clone)]
pub struct Traced {
    pub output: Tensor<f32>,
    /// Flat input index that produced each output cell. `None` when a constant
    /// border cell won the reduction.
    pub source: Vec<Option<usize>>,
    input_shape: TensorShape,
}

impl Traced {
    pub(crate) fn new(
        output: Tensor<f32>,
        source: Vec<Option<usize>>,
        input_shape: TensorShape,
    ) -> Self {
        Self {
            output,
            source,
            input_shape,
        }
    }

    pub fn input_shape(&self) -> &TensorShape {
        &self.input_shape
    }

    /// Vector-Jacobian product: accumulates `grad_output` onto the selected inputs.
    pub fn backward(&self, grad_output: &Tensor<f32>) -> Result<Tensor<f32>> {
        if grad_output.shape != self.output.shape {
            return Err(ImgprocError::InvalidShape(format!(
                "gradient shape {} does not match output shape {}",
                grad_output.shape, self.output.shape
            )));
        }
        let mut grad_input = vec![0.0f32; self.input_shape.len()];
        for (g, src) in grad_output.as_slice()?.iter().zip(&self.source) {
            if let Some(i) = *src {
                grad_input[i] += g;
            }
        }
        Ok(Tensor::from_vec(grad_input, self.input_shape.clone())?)
    }
}
