use super::{check_item_bounds, Dataset, Item};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Result};
use std::sync::Arc;

/// A view of `base` through an index list: record `i` is `base[indices[i]]`.
///
/// Indices may repeat or reorder records. They are taken from the
/// constructor or from the `indices` key (comma-separated); every index must
/// be smaller than `base.len()`.
pub struct IndexedDataset {
    base: Arc<dyn Dataset>,
    indices: Option<Vec<u64>>,
    initialized: bool,
}

impl IndexedDataset {
    /// Indices are supplied at `init` with the `indices` key.
    pub fn new(base: Arc<dyn Dataset>) -> Self {
        Self {
            base,
            indices: None,
            initialized: false,
        }
    }

    pub fn with_indices(base: Arc<dyn Dataset>, indices: Vec<u64>) -> Self {
        Self {
            base,
            indices: Some(indices),
            initialized: false,
        }
    }
}

impl Dataset for IndexedDataset {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("IndexedDataset")
        );
        let mut params = Params::new("IndexedDataset", kwargs);
        let from_kwargs = params.take_list::<u64>("indices")?;
        params.finish()?;

        let indices = match (self.indices.take(), from_kwargs) {
            (Some(_), Some(_)) => {
                return Err(DataError::config(
                    "IndexedDataset",
                    "indices given both in the constructor and as 'indices'",
                )
                .into())
            }
            (Some(indices), None) | (None, Some(indices)) => indices,
            (None, None) => {
                return Err(
                    DataError::config("IndexedDataset", "missing required parameter 'indices'").into(),
                )
            }
        };

        let base_len = self.base.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= base_len) {
            return Err(DataError::out_of_bounds("base index", bad, base_len).into());
        }
        self.indices = Some(indices);
        self.initialized = true;
        Ok(())
    }

    fn len(&self) -> u64 {
        match (&self.indices, self.initialized) {
            (Some(indices), true) => indices.len() as u64,
            _ => 0,
        }
    }

    fn output_size(&self) -> usize {
        if self.initialized {
            self.base.output_size()
        } else {
            0
        }
    }

    fn get_item(&self, idx: u64, n: usize) -> Result<Item> {
        ensure!(self.initialized, DataError::not_initialized("IndexedDataset"));
        check_item_bounds(self, idx, n)?;
        let indices = self
            .indices
            .as_ref()
            .ok_or_else(|| DataError::not_initialized("IndexedDataset"))?;
        self.base.get_item(indices[idx as usize], n)
    }
}
