use super::{column, maybe_cast, sanity_check, BatchifyFunction};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Context, Result};
use tch::{Kind, Tensor};

/// Pads variable-length fields to a common shape, then stacks them.
///
/// For every field the target shape is the element-wise maximum over the
/// batch. Each sample is copied into the top-left corner of a tensor filled
/// with `pad_val`. All samples of a field must share the same rank; rank-0
/// fields are stacked as-is.
///
/// # Parameters
/// - `pad_val`: fill value (default `0.0`)
/// - `dtype`: optional element type to cast every output to
/// - `round_to`: round the padded size of the first sample axis up to a
///   multiple of this value
///
/// # Example
/// Samples `[1, 2, 3]` and `[4, 5]` with `pad_val=-1` become
/// `[[1, 2, 3], [4, 5, -1]]`; with `round_to=4` they become
/// `[[1, 2, 3, -1], [4, 5, -1, -1]]`.
#[derive(Debug)]
pub struct PadBatchify {
    pad_val: f64,
    dtype: Option<Kind>,
    round_to: Option<i64>,
    initialized: bool,
}

impl Default for PadBatchify {
    fn default() -> Self {
        Self {
            pad_val: 0.0,
            dtype: None,
            round_to: None,
            initialized: false,
        }
    }
}

impl PadBatchify {
    pub fn new() -> Self {
        Self::default()
    }

    fn target_shape(&self, field: usize, tensors: &[&Tensor]) -> Result<Vec<i64>> {
        let mut target = tensors[0].size();
        for (i, tensor) in tensors.iter().enumerate().skip(1) {
            let shape = tensor.size();
            ensure!(
                shape.len() == target.len(),
                DataError::ShapeMismatch {
                    field,
                    sample: i,
                    expected: tensors[0].size(),
                    found: shape,
                }
            );
            for (t, s) in target.iter_mut().zip(&shape) {
                *t = (*t).max(*s);
            }
        }
        if let (Some(multiple), Some(first)) = (self.round_to, target.first_mut()) {
            let len = *first;
            *first = round_up(len, multiple).ok_or_else(|| {
                DataError::config(
                    "PadBatchify",
                    format!("round_to={} overflows padded length {}", multiple, len),
                )
            })?;
        }
        Ok(target)
    }

    fn pad_field(&self, field: usize, tensors: &[&Tensor]) -> Result<Tensor> {
        if tensors[0].dim() == 0 {
            ensure!(
                tensors.iter().all(|t| t.dim() == 0),
                DataError::ShapeMismatch {
                    field,
                    sample: tensors.iter().position(|t| t.dim() != 0).unwrap_or(0),
                    expected: Vec::new(),
                    found: tensors
                        .iter()
                        .map(|t| t.size())
                        .find(|s| !s.is_empty())
                        .unwrap_or_default(),
                }
            );
            return Ok(Tensor::stack(tensors, 0));
        }

        let target = self.target_shape(field, tensors)?;
        let mut out_shape = Vec::with_capacity(target.len() + 1);
        out_shape.push(tensors.len() as i64);
        out_shape.extend_from_slice(&target);
        ensure!(
            out_shape
                .iter()
                .try_fold(1i64, |acc, &dim| acc.checked_mul(dim))
                .is_some(),
            DataError::config(
                "PadBatchify",
                format!("padded batch of shape {:?} is too large", out_shape)
            )
        );

        let first = tensors[0];
        let out = Tensor::f_full(&out_shape, self.pad_val, (first.kind(), first.device()))
            .with_context(|| format!("Failed to allocate padded batch of shape {:?}", out_shape))?;
        for (i, tensor) in tensors.iter().enumerate() {
            // Narrow the destination slot down to the sample's own extent.
            let mut dest = out.select(0, i as i64);
            for (dim, len) in tensor.size().into_iter().enumerate() {
                dest = dest.narrow(dim as i64, 0, len);
            }
            dest.copy_(tensor);
        }
        Ok(out)
    }
}

/// Smallest multiple of `multiple` that is `>= len`, if it fits in `i64`.
fn round_up(len: i64, multiple: i64) -> Option<i64> {
    let blocks = len / multiple + i64::from(len % multiple != 0);
    blocks.checked_mul(multiple)
}

impl BatchifyFunction for PadBatchify {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("PadBatchify")
        );
        let mut params = Params::new("PadBatchify", kwargs);
        if let Some(pad_val) = params.take::<f64>("pad_val")? {
            self.pad_val = pad_val;
        }
        self.dtype = params.take_kind("dtype")?;
        if let Some(round_to) = params.take::<i64>("round_to")? {
            ensure!(
                round_to > 0,
                DataError::config("PadBatchify", "round_to must be positive")
            );
            self.round_to = Some(round_to);
        }
        params.finish()?;
        self.initialized = true;
        Ok(())
    }

    fn batchify(&self, inputs: &[Vec<Tensor>]) -> Result<Vec<Tensor>> {
        ensure!(self.initialized, DataError::not_initialized("PadBatchify"));
        let out_size = sanity_check(inputs)?;

        let mut outputs = Vec::with_capacity(out_size);
        for field in 0..out_size {
            let padded = self.pad_field(field, &column(inputs, field))?;
            outputs.push(maybe_cast(padded, self.dtype));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod pad_batchify_tests {
    use super::*;
    use crate::error::data_error;
    use crate::params::kwargs;

    fn pad_with(pairs: &[(&str, &str)]) -> Result<PadBatchify> {
        let mut f = PadBatchify::new();
        f.init(&kwargs(pairs.iter().copied()))?;
        Ok(f)
    }

    fn rows(t: &Tensor) -> Result<Vec<Vec<i64>>> {
        Ok(Vec::<Vec<i64>>::try_from(t)?)
    }

    #[test]
    fn test_pad_to_batch_max() -> Result<()> {
        let inputs = vec![
            vec![Tensor::from_slice(&[1i64, 2, 3]), Tensor::from(0i64)],
            vec![Tensor::from_slice(&[4i64, 5]), Tensor::from(1i64)],
        ];
        let out = pad_with(&[("pad_val", "-1")])?.batchify(&inputs)?;

        assert_eq!(out[0].size(), &[2, 3]);
        assert_eq!(rows(&out[0])?, vec![vec![1, 2, 3], vec![4, 5, -1]]);
        assert_eq!(out[1].size(), &[2]);
        Ok(())
    }

    #[test]
    fn test_pad_round_to() -> Result<()> {
        let inputs = vec![
            vec![Tensor::from_slice(&[1i64, 2, 3])],
            vec![Tensor::from_slice(&[4i64, 5])],
        ];
        let out = pad_with(&[("pad_val", "-1"), ("round_to", "4")])?.batchify(&inputs)?;
        assert_eq!(rows(&out[0])?, vec![vec![1, 2, 3, -1], vec![4, 5, -1, -1]]);
        Ok(())
    }

    #[test]
    fn test_pad_two_dims() -> Result<()> {
        let inputs = vec![
            vec![Tensor::ones(&[2, 3], (Kind::Float, tch::Device::Cpu))],
            vec![Tensor::ones(&[4, 1], (Kind::Float, tch::Device::Cpu))],
        ];
        let out = pad_with(&[])?.batchify(&inputs)?;
        assert_eq!(out[0].size(), &[2, 4, 3]);
        // 6 ones from the first sample, 4 from the second.
        assert_eq!(out[0].sum(Kind::Double).double_value(&[]), 10.0);
        Ok(())
    }

    #[test]
    fn test_pad_rank_mismatch() -> Result<()> {
        let inputs = vec![
            vec![Tensor::from_slice(&[1i64, 2])],
            vec![Tensor::from_slice(&[1i64, 2]).reshape(&[1, 2])],
        ];
        let err = pad_with(&[])?.batchify(&inputs).unwrap_err();
        assert!(matches!(
            data_error(&err),
            Some(DataError::ShapeMismatch { sample: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_pad_rejects_bad_round_to() {
        assert!(pad_with(&[("round_to", "0")]).is_err());
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(5, 4), Some(8));
        assert_eq!(round_up(8, 4), Some(8));
        assert_eq!(round_up(1, i64::MAX), Some(i64::MAX));
        assert_eq!(round_up(i64::MAX, 2), None);
    }

    #[test]
    fn test_pad_huge_round_to_is_an_error() -> Result<()> {
        let inputs = vec![
            vec![Tensor::from_slice(&[1i64, 2, 3])],
            vec![Tensor::from_slice(&[4i64])],
        ];
        let max = i64::MAX.to_string();
        let err = pad_with(&[("round_to", max.as_str())])?
            .batchify(&inputs)
            .unwrap_err();
        assert!(matches!(data_error(&err), Some(DataError::Config { .. })));
        Ok(())
    }

    #[test]
    fn test_pad_empty_batch() -> Result<()> {
        let err = pad_with(&[])?.batchify(&[]).unwrap_err();
        assert_eq!(data_error(&err), Some(&DataError::EmptyBatch));
        Ok(())
    }
}
