//! Batchify functions merge per-sample field lists into one batch.
//!
//! `inputs` is a list of samples, each a list of tensor fields
//! (outer length = batch size, inner length = field arity). The output is one
//! tensor per field with a new leading batch dimension. How a field is merged
//! is up to the concrete strategy:
//!
//! - [`StackBatchify`]: stacks equal-shaped fields
//! - [`PadBatchify`]: pads variable-length fields to the batch maximum, then stacks
//! - [`GroupBatchify`]: one child strategy per field
//!
//! Empty batches and arity mismatches are caller bugs and always fail; no
//! strategy may skip a sample to recover.

mod group;
mod pad;
mod stack;

pub use group::GroupBatchify;
pub use pad::PadBatchify;
pub use stack::StackBatchify;

use crate::error::DataError;
use crate::params::KwArg;
use anyhow::{ensure, Result};
use tch::{Kind, Tensor};

pub trait BatchifyFunction: Send + Sync {
    /// One-time configuration. Must be called before [`batchify`](Self::batchify).
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()>;

    /// Merges `inputs[sample][field]` into one tensor per field.
    fn batchify(&self, inputs: &[Vec<Tensor>]) -> Result<Vec<Tensor>>;
}

/// Checks that the batch is non-empty and that every sample has the field
/// arity of sample 0. Returns that arity.
pub fn sanity_check(inputs: &[Vec<Tensor>]) -> Result<usize> {
    ensure!(!inputs.is_empty(), DataError::EmptyBatch);
    let out_size = inputs[0].len();
    for (i, sample) in inputs.iter().enumerate().skip(1) {
        ensure!(
            sample.len() == out_size,
            DataError::ArityMismatch {
                sample: i,
                expected: out_size,
                found: sample.len(),
            }
        );
    }
    Ok(out_size)
}

/// Gathers field `field` of every sample.
pub(crate) fn column(inputs: &[Vec<Tensor>], field: usize) -> Vec<&Tensor> {
    inputs.iter().map(|sample| &sample[field]).collect()
}

pub(crate) fn maybe_cast(tensor: Tensor, dtype: Option<Kind>) -> Tensor {
    match dtype {
        Some(kind) if tensor.kind() != kind => tensor.to_kind(kind),
        _ => tensor,
    }
}

#[cfg(test)]
mod sanity_check_tests {
    use super::*;
    use crate::error::data_error;

    fn sample(fields: usize) -> Vec<Tensor> {
        (0..fields).map(|i| Tensor::from(i as i64)).collect()
    }

    #[test]
    fn test_sanity_check_ok() -> Result<()> {
        let inputs = vec![sample(2), sample(2), sample(2)];
        assert_eq!(sanity_check(&inputs)?, 2);
        Ok(())
    }

    #[test]
    fn test_sanity_check_empty() {
        let err = sanity_check(&[]).unwrap_err();
        assert_eq!(data_error(&err), Some(&DataError::EmptyBatch));
    }

    #[test]
    fn test_sanity_check_reports_offending_sample() {
        let inputs = vec![sample(2), sample(2), sample(3)];
        let err = sanity_check(&inputs).unwrap_err();
        assert_eq!(
            data_error(&err),
            Some(&DataError::ArityMismatch {
                sample: 2,
                expected: 2,
                found: 3
            })
        );
    }
}
