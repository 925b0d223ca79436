use super::{check_item_bounds, Dataset, Item};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{bail, ensure, Context, Result};
use bytemuck::{pod_collect_to_vec, try_cast_slice, Pod};
use safetensors::{
    tensor::{Dtype, TensorView},
    SafeTensors,
};
use std::{collections::BTreeMap, fs, path::Path};
use tch::{kind::Element, Kind, Tensor};
use tracing::debug;

/// A dataset whose fields are tensors sharing a leading (record) dimension.
///
/// Record `idx` of field `n` is `arrays[n].select(0, idx)`; a 1-D field
/// therefore yields [`Item::Scalar`] records.
///
/// Arrays are either handed over in memory with [`NDArrayDataset::with_arrays`]
/// or loaded at `init` from a safetensors file.
///
/// # Parameters
/// - `path`: safetensors file to load the fields from
/// - `keys`: comma-separated tensor names selecting and ordering the fields
///   (default: every tensor, sorted by name)
///
/// # Example
/// ```ignore
/// let mut dataset = NDArrayDataset::new();
/// dataset.init(&kwargs([("path", "train.safetensors"), ("keys", "image,label")]))?;
/// let label = dataset.get_item(0, 1)?.scalar_value();
/// ```
#[derive(Debug, Default)]
pub struct NDArrayDataset {
    arrays: Vec<Tensor>,
    names: Vec<String>,
    len: u64,
    initialized: bool,
}

impl NDArrayDataset {
    /// An empty dataset, to be filled from a file at `init`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dataset over in-memory tensors, one per field.
    pub fn with_arrays(arrays: Vec<Tensor>) -> Self {
        let names = (0..arrays.len()).map(|i| format!("data{}", i)).collect();
        Self {
            arrays,
            names,
            len: 0,
            initialized: false,
        }
    }

    /// Field names: tensor names for file-backed datasets, `data{i}` otherwise.
    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    fn load(&mut self, path: &Path, keys: Option<Vec<String>>) -> Result<()> {
        let file_bytes = fs::read(path)
            .with_context(|| format!("Failed to read safetensors file: {}", path.display()))?;
        let safetensors = SafeTensors::deserialize(&file_bytes)
            .with_context(|| format!("Failed to parse safetensors file: {}", path.display()))?;

        let views: BTreeMap<String, TensorView<'_>> = safetensors.tensors().into_iter().collect();
        let keys = keys.unwrap_or_else(|| views.keys().cloned().collect());

        for key in keys {
            let Some(view) = views.get(&key) else {
                bail!(DataError::config(
                    "NDArrayDataset",
                    format!(
                        "tensor '{}' not found in {} (available: {})",
                        key,
                        path.display(),
                        views.keys().cloned().collect::<Vec<_>>().join(", ")
                    ),
                ));
            };
            let tensor = tensor_from_view(view)
                .with_context(|| format!("Failed to convert tensor '{}'", key))?;
            self.arrays.push(tensor);
            self.names.push(key);
        }
        Ok(())
    }
}

impl Dataset for NDArrayDataset {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("NDArrayDataset")
        );
        let mut params = Params::new("NDArrayDataset", kwargs);
        let path: Option<String> = params.take("path")?;
        let keys: Option<Vec<String>> = params.take_list("keys")?;
        params.finish()?;

        match path {
            Some(path) => {
                ensure!(
                    self.arrays.is_empty(),
                    DataError::config("NDArrayDataset", "'path' given for an in-memory dataset")
                );
                self.load(Path::new(&path), keys)?;
            }
            None => ensure!(
                keys.is_none(),
                DataError::config("NDArrayDataset", "'keys' requires 'path'")
            ),
        }

        ensure!(
            !self.arrays.is_empty(),
            DataError::config("NDArrayDataset", "no arrays given and no 'path' to load from")
        );

        let mut len = None;
        for (field, array) in self.arrays.iter().enumerate() {
            let Some(&leading) = array.size().first() else {
                bail!(DataError::config(
                    "NDArrayDataset",
                    format!("field {} is a scalar; every field needs a record dimension", field),
                ));
            };
            match len {
                None => len = Some(leading),
                Some(expected) => ensure!(
                    leading == expected,
                    DataError::config(
                        "NDArrayDataset",
                        format!(
                            "field {} has {} records, expected {} like field 0",
                            field, leading, expected
                        ),
                    )
                ),
            }
        }
        self.len = len.unwrap_or(0) as u64;
        self.initialized = true;
        debug!(
            records = self.len,
            fields = self.arrays.len(),
            "NDArrayDataset initialized"
        );
        Ok(())
    }

    fn len(&self) -> u64 {
        if self.initialized {
            self.len
        } else {
            0
        }
    }

    fn output_size(&self) -> usize {
        if self.initialized {
            self.arrays.len()
        } else {
            0
        }
    }

    fn get_item(&self, idx: u64, n: usize) -> Result<Item> {
        ensure!(self.initialized, DataError::not_initialized("NDArrayDataset"));
        check_item_bounds(self, idx, n)?;
        Ok(Item::from_tensor(self.arrays[n].select(0, idx as i64)))
    }
}

/// Converts a safetensors view to a tensor.
/// Supported dtypes: BOOL, U8, I8, I16, I32, I64, F32, F64.
fn tensor_from_view(view: &TensorView<'_>) -> Result<Tensor> {
    let shape: Vec<i64> = view.shape().iter().map(|&d| d as i64).collect();
    let raw = view.data();
    let tensor = match view.dtype() {
        Dtype::BOOL => Tensor::from_slice(raw).to_kind(Kind::Bool),
        Dtype::U8 => Tensor::from_slice(raw),
        Dtype::I8 => from_pod::<i8>(raw),
        Dtype::I16 => from_pod::<i16>(raw),
        Dtype::I32 => from_pod::<i32>(raw),
        Dtype::I64 => from_pod::<i64>(raw),
        Dtype::F32 => from_pod::<f32>(raw),
        Dtype::F64 => from_pod::<f64>(raw),
        other => bail!(
            "Unsupported dtype '{:?}'. Supported dtypes: BOOL, U8, I8, I16, I32, I64, F32, F64. \
             Tensor shape: {:?}",
            other,
            shape
        ),
    };
    Ok(tensor.reshape(&shape))
}

/// Reinterprets little-endian bytes, copying first when `raw` is misaligned for `T`.
fn from_pod<T: Pod + Element>(raw: &[u8]) -> Tensor {
    match try_cast_slice::<u8, T>(raw) {
        Ok(values) => Tensor::from_slice(values),
        Err(_) => Tensor::from_slice(&pod_collect_to_vec::<u8, T>(raw)),
    }
}
