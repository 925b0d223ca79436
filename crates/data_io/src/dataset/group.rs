use super::{check_item_bounds, Dataset, Item};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Result};
use std::sync::Arc;

/// Concatenates the fields of several equally long datasets.
///
/// Record `idx` of a group over `[a, b]` is `a[idx]` followed by `b[idx]`,
/// so `output_size()` is the sum of the children's. Children must already
/// be initialized; `init` takes no keys and only validates lengths.
pub struct GroupDataset {
    children: Vec<Arc<dyn Dataset>>,
    /// `offsets[i]` is the first field of child `i`.
    offsets: Vec<usize>,
    len: u64,
    output_size: usize,
    initialized: bool,
}

impl GroupDataset {
    pub fn new(children: Vec<Arc<dyn Dataset>>) -> Self {
        Self {
            children,
            offsets: Vec::new(),
            len: 0,
            output_size: 0,
            initialized: false,
        }
    }
}

impl Dataset for GroupDataset {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("GroupDataset")
        );
        Params::new("GroupDataset", kwargs).finish()?;
        ensure!(
            !self.children.is_empty(),
            DataError::config("GroupDataset", "at least one child dataset is required")
        );

        let len = self.children[0].len();
        let mut offset = 0;
        for (i, child) in self.children.iter().enumerate() {
            ensure!(
                child.len() == len,
                DataError::config(
                    "GroupDataset",
                    format!("child {} has {} records, expected {}", i, child.len(), len),
                )
            );
            self.offsets.push(offset);
            offset += child.output_size();
        }
        self.len = len;
        self.output_size = offset;
        self.initialized = true;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn get_item(&self, idx: u64, n: usize) -> Result<Item> {
        ensure!(self.initialized, DataError::not_initialized("GroupDataset"));
        check_item_bounds(self, idx, n)?;
        // Last child whose first field is <= n; zero-width children are skipped.
        let child = self.offsets.partition_point(|&start| start <= n) - 1;
        self.children[child].get_item(idx, n - self.offsets[child])
    }
}

#[cfg(test)]
mod group_dataset_tests {
    use super::*;
    use crate::dataset::NDArrayDataset;
    use crate::error::data_error;
    use tch::{Device, Kind, Tensor};

    fn ndarray(arrays: Vec<Tensor>) -> Result<Arc<dyn Dataset>> {
        let mut dataset = NDArrayDataset::with_arrays(arrays);
        dataset.init(&[])?;
        Ok(Arc::new(dataset))
    }

    #[test]
    fn test_group_concatenates_fields() -> Result<()> {
        let images = ndarray(vec![Tensor::zeros(&[4, 2], (Kind::Float, Device::Cpu))])?;
        let labels = ndarray(vec![
            Tensor::arange(4, (Kind::Int64, Device::Cpu)),
            Tensor::arange(4, (Kind::Int64, Device::Cpu)) * 10,
        ])?;

        let mut group = GroupDataset::new(vec![images, labels]);
        group.init(&[])?;
        assert_eq!(group.len(), 4);
        assert_eq!(group.output_size(), 3);
        assert_eq!(group.get_item(1, 0)?.as_tensor().size(), &[2]);
        assert_eq!(group.get_item(3, 1)?.scalar_value(), Some(3.0));
        assert_eq!(group.get_item(3, 2)?.scalar_value(), Some(30.0));

        let err = group.get_item(0, 3).unwrap_err();
        assert!(matches!(data_error(&err), Some(DataError::OutOfBounds { .. })));
        Ok(())
    }

    #[test]
    fn test_group_length_mismatch() -> Result<()> {
        let a = ndarray(vec![Tensor::zeros(&[4], (Kind::Float, Device::Cpu))])?;
        let b = ndarray(vec![Tensor::zeros(&[5], (Kind::Float, Device::Cpu))])?;
        let mut group = GroupDataset::new(vec![a, b]);
        let err = group.init(&[]).unwrap_err();
        assert!(matches!(data_error(&err), Some(DataError::Config { .. })));
        Ok(())
    }

    #[test]
    fn test_group_get_item_is_repeatable() -> Result<()> {
        let images = ndarray(vec![Tensor::rand(&[3, 2], (Kind::Float, Device::Cpu))])?;
        let labels = ndarray(vec![Tensor::arange(3, (Kind::Int64, Device::Cpu))])?;
        let mut group = GroupDataset::new(vec![images, labels]);
        group.init(&[])?;
        for idx in 0..3 {
            for field in 0..2 {
                let first = group.get_item(idx, field)?;
                let second = group.get_item(idx, field)?;
                assert!(first.as_tensor().equal(second.as_tensor()));
            }
        }
        Ok(())
    }
}
