use super::{sanity_check, BatchifyFunction};
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Context, Result};
use tch::Tensor;

/// Applies one child batchify function per field.
///
/// Field `i` of every sample is merged by child `i`, which must produce
/// exactly one tensor. Useful when a batch mixes fixed-shape data with
/// variable-length sequences:
///
/// ```ignore
/// let batchify = GroupBatchify::new(vec![
///     Box::new(StackBatchify::new()),
///     Box::new(PadBatchify::new()),
/// ]);
/// ```
///
/// `init` forwards keys scoped by child position to that child, e.g.
/// `1.pad_val=-1` configures the second child. Unscoped keys are rejected.
pub struct GroupBatchify {
    children: Vec<Box<dyn BatchifyFunction>>,
    initialized: bool,
}

impl GroupBatchify {
    pub fn new(children: Vec<Box<dyn BatchifyFunction>>) -> Self {
        Self {
            children,
            initialized: false,
        }
    }
}

impl BatchifyFunction for GroupBatchify {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("GroupBatchify")
        );
        ensure!(
            !self.children.is_empty(),
            DataError::config("GroupBatchify", "at least one child function is required")
        );
        let mut params = Params::new("GroupBatchify", kwargs);
        for (i, child) in self.children.iter_mut().enumerate() {
            let scoped = params.take_scoped(&i.to_string());
            child
                .init(&scoped)
                .with_context(|| format!("Failed to initialize child {}", i))?;
        }
        params.finish()?;
        self.initialized = true;
        Ok(())
    }

    fn batchify(&self, inputs: &[Vec<Tensor>]) -> Result<Vec<Tensor>> {
        ensure!(self.initialized, DataError::not_initialized("GroupBatchify"));
        let out_size = sanity_check(inputs)?;
        ensure!(
            out_size == self.children.len(),
            DataError::ArityMismatch {
                sample: 0,
                expected: self.children.len(),
                found: out_size,
            }
        );

        let mut outputs = Vec::with_capacity(out_size);
        for (field, child) in self.children.iter().enumerate() {
            let single: Vec<Vec<Tensor>> = inputs
                .iter()
                .map(|sample| vec![sample[field].shallow_clone()])
                .collect();
            let mut merged = child
                .batchify(&single)
                .with_context(|| format!("Failed to batchify field {}", field))?;
            ensure!(
                merged.len() == 1,
                DataError::source(
                    "GroupBatchify",
                    format!("child {} produced {} outputs, expected 1", field, merged.len()),
                )
            );
            outputs.push(merged.remove(0));
        }
        Ok(outputs)
    }
}
