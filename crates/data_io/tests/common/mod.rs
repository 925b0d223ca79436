#![allow(dead_code)]

use anyhow::Result;
use safetensors::tensor::{serialize_to_file, Dtype, TensorView};
use std::path::{Path, PathBuf};
use tch::Tensor;
use tempfile::TempDir;

/// Safetensors file with `n` records: `image` is `[n, 2, 2]` f32 filled with
/// the record index, `label` is `[n]` i64 holding `10 * index`.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub records: usize,
}

impl Fixture {
    pub fn new(records: usize) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("records.safetensors");
        write_records(&path, records)?;
        Ok(Self { dir, path, records })
    }

    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

pub fn write_records(path: &Path, records: usize) -> Result<()> {
    let image: Vec<u8> = (0..records)
        .flat_map(|i| std::iter::repeat(i as f32).take(4))
        .flat_map(f32::to_le_bytes)
        .collect();
    let label: Vec<u8> = (0..records)
        .map(|i| 10 * i as i64)
        .flat_map(i64::to_le_bytes)
        .collect();
    let tensors = vec![
        ("image", TensorView::new(Dtype::F32, vec![records, 2, 2], &image)?),
        ("label", TensorView::new(Dtype::I64, vec![records], &label)?),
    ];
    serialize_to_file(tensors, &None, path)?;
    Ok(())
}

/// The `i64` values of a tensor, flattened.
pub fn to_vec_i64(tensor: &Tensor) -> Result<Vec<i64>> {
    Ok(Vec::<i64>::try_from(&tensor.reshape(&[-1]))?)
}

/// The `f32` values of a tensor, flattened.
pub fn to_vec_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(Vec::<f32>::try_from(&tensor.reshape(&[-1]))?)
}
