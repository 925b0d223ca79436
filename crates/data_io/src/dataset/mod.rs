//! Random-access datasets.
//!
//! A [`Dataset`] exposes `len()` records, each with `output_size()` fields.
//! Records are addressed by `(idx, n)` and returned as a tagged [`Item`] so a
//! caller can tell a scalar from a multi-dimensional array without inspecting
//! tensor ranks.
//!
//! Implementations:
//! - [`NDArrayDataset`]: fields are tensors sharing a leading dimension,
//!   either in memory or loaded from a safetensors file
//! - [`GroupDataset`]: concatenates the fields of equally long datasets
//! - [`IndexedDataset`]: a re-indexed view of another dataset

mod group;
mod indexed;
mod ndarray;

pub use group::GroupDataset;
pub use indexed::IndexedDataset;
pub use ndarray::NDArrayDataset;

use crate::error::DataError;
use crate::params::KwArg;
use anyhow::{ensure, Result};
use tch::Tensor;

/// One field of one record.
#[derive(Debug)]
pub enum Item {
    /// A rank-0 tensor (class label, sequence length, ...).
    Scalar(Tensor),
    /// Any tensor of rank >= 1.
    Array(Tensor),
}

impl Item {
    /// Tags `tensor` by rank.
    pub fn from_tensor(tensor: Tensor) -> Self {
        if tensor.dim() == 0 {
            Self::Scalar(tensor)
        } else {
            Self::Array(tensor)
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    pub fn as_tensor(&self) -> &Tensor {
        match self {
            Self::Scalar(t) | Self::Array(t) => t,
        }
    }

    /// Converts to a tensor for batching; scalars become rank-0 tensors.
    pub fn into_tensor(self) -> Tensor {
        match self {
            Self::Scalar(t) | Self::Array(t) => t,
        }
    }

    /// The value of a scalar item, `None` for arrays.
    pub fn scalar_value(&self) -> Option<f64> {
        match self {
            Self::Scalar(t) => Some(t.double_value(&[])),
            Self::Array(_) => None,
        }
    }
}

/// A random-access collection of records.
///
/// All implementations must be `Send + Sync` so one dataset can be shared by
/// every loader worker; `get_item` must be pure and repeatable.
pub trait Dataset: Send + Sync {
    /// One-time configuration.
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()>;

    /// Number of records; 0 before `init`.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fields per record; 0 before `init`.
    fn output_size(&self) -> usize;

    /// Field `n` of record `idx`.
    fn get_item(&self, idx: u64, n: usize) -> Result<Item>;

    /// Every field of record `idx`, converted to tensors.
    fn get_record(&self, idx: u64) -> Result<Vec<Tensor>> {
        (0..self.output_size())
            .map(|n| self.get_item(idx, n).map(Item::into_tensor))
            .collect()
    }
}

/// Bounds check shared by every dataset's `get_item`.
pub(crate) fn check_item_bounds(dataset: &dyn Dataset, idx: u64, n: usize) -> Result<()> {
    ensure!(
        idx < dataset.len(),
        DataError::out_of_bounds("sample index", idx, dataset.len())
    );
    ensure!(
        n < dataset.output_size(),
        DataError::out_of_bounds("field", n as u64, dataset.output_size() as u64)
    );
    Ok(())
}
