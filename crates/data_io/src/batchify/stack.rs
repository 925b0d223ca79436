use super::{column, maybe_cast, sanity_check, BatchifyFunction};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Result};
use tch::{Kind, Tensor};

/// Stacks tensors with identical shapes along a new batch dimension (dim 0).
///
/// It does not implement any padding logic, so if a field has inconsistent
/// shapes across samples an error is returned. Scalar (rank-0) fields become
/// a `[batch_size]` tensor.
///
/// # Parameters
/// - `dtype`: optional element type to cast every output to
#[derive(Debug, Default)]
pub struct StackBatchify {
    dtype: Option<Kind>,
    initialized: bool,
}

impl StackBatchify {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchifyFunction for StackBatchify {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("StackBatchify")
        );
        let mut params = Params::new("StackBatchify", kwargs);
        self.dtype = params.take_kind("dtype")?;
        params.finish()?;
        self.initialized = true;
        Ok(())
    }

    fn batchify(&self, inputs: &[Vec<Tensor>]) -> Result<Vec<Tensor>> {
        ensure!(self.initialized, DataError::not_initialized("StackBatchify"));
        let out_size = sanity_check(inputs)?;

        // Validate every field before producing any output.
        for field in 0..out_size {
            let tensors = column(inputs, field);
            let reference_shape = tensors[0].size();
            for (i, tensor) in tensors.iter().enumerate().skip(1) {
                let shape = tensor.size();
                ensure!(
                    shape == reference_shape,
                    DataError::ShapeMismatch {
                        field,
                        sample: i,
                        expected: reference_shape.clone(),
                        found: shape,
                    }
                );
            }
        }

        Ok((0..out_size)
            .map(|field| maybe_cast(Tensor::stack(&column(inputs, field), 0), self.dtype))
            .collect())
    }
}
