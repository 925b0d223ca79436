use crate::error::DataError;
use anyhow::{anyhow, ensure, Result};
use tch::{Device, Tensor};

/// The `DataBatch` struct is the unit a training step consumes.
///
/// It holds one tensor per named data stream, each with a leading batch
/// dimension, together with the identity of every sample in the batch.
///
/// - `data`: batched tensors, shape `[batch_size, ...]`
/// - `index`: source sample indices, `index.len() == batch_size`
/// - `extra_data`: free-form side channel
/// - `num_batch_padd`: how many trailing slots are synthetic filler
///
/// # Examples
/// A batch of 4 images with labels, the last one padding at epoch end:
/// - `data[0]` -> shape `[4, 3, 224, 224]`
/// - `data[1]` -> shape `[4]`
/// - `index` -> `[96, 97, 98, 98]`, `num_batch_padd` -> `1`
#[derive(Debug)]
pub struct DataBatch {
    pub data: Vec<Tensor>,
    pub index: Vec<u64>,
    pub extra_data: String,
    pub num_batch_padd: usize,
}

/// Creates a shallow clone of the `DataBatch`
impl Clone for DataBatch {
    fn clone(&self) -> Self {
        Self {
            data: self.data.iter().map(Tensor::shallow_clone).collect(),
            index: self.index.clone(),
            extra_data: self.extra_data.clone(),
            num_batch_padd: self.num_batch_padd,
        }
    }
}

impl DataBatch {
    /// Builds a batch without padding and checks its invariants.
    pub fn new(data: Vec<Tensor>, index: Vec<u64>) -> Result<Self> {
        let batch = Self {
            data,
            index,
            extra_data: String::new(),
            num_batch_padd: 0,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Sets the padding count, rejecting counts larger than the batch.
    pub fn with_padding(mut self, num_batch_padd: usize) -> Result<Self> {
        ensure!(
            num_batch_padd <= self.batch_size(),
            DataError::InvalidPadding {
                num_batch_padd,
                batch_size: self.batch_size(),
            }
        );
        self.num_batch_padd = num_batch_padd;
        Ok(self)
    }

    pub fn with_extra_data(mut self, extra: impl Into<String>) -> Self {
        self.extra_data = extra.into();
        self
    }

    /// Number of samples, real and padded.
    pub fn batch_size(&self) -> usize {
        self.index.len()
    }

    /// Number of real (non-filler) samples.
    pub fn num_real(&self) -> usize {
        self.batch_size() - self.num_batch_padd.min(self.batch_size())
    }

    /// Checks `data[i].size()[0] == index.len()` for every field and
    /// `num_batch_padd <= batch_size`.
    pub fn validate(&self) -> Result<()> {
        let batch_size = self.batch_size();
        for (field, tensor) in self.data.iter().enumerate() {
            let leading = tensor.size().first().copied();
            ensure!(
                leading == Some(batch_size as i64),
                DataError::source(
                    "DataBatch",
                    format!(
                        "field {} has leading dimension {:?}, expected batch size {}",
                        field, leading, batch_size
                    ),
                )
            );
        }
        ensure!(
            self.num_batch_padd <= batch_size,
            DataError::InvalidPadding {
                num_batch_padd: self.num_batch_padd,
                batch_size,
            }
        );
        Ok(())
    }

    /// Returns the `n`-th field.
    pub fn get(&self, field: usize) -> Result<&Tensor> {
        self.data
            .get(field)
            .ok_or_else(|| anyhow!(DataError::out_of_bounds("batch field", field as u64, self.data.len() as u64)))
    }

    /// Pairs each field with its semantic name, in order.
    pub fn named<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = (&'a str, &'a Tensor)> {
        names.iter().map(String::as_str).zip(self.data.iter())
    }

    /// Transfers all fields to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            data: self.data.iter().map(|t| t.to_device(device)).collect(),
            index: self.index.clone(),
            extra_data: self.extra_data.clone(),
            num_batch_padd: self.num_batch_padd,
        }
    }
}
