use super::DataIter;
use crate::batch::DataBatch;
use crate::batchify::{BatchifyFunction, StackBatchify};
use crate::error::DataError;
use crate::instance::DataInst;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Groups the instances of an instance iterator into fixed-size batches.
///
/// A pass that does not divide evenly ends with a partial batch, completed
/// in one of two ways:
/// - `round_batch=true`: the source is rewound and the batch is topped up
///   from the start of the next pass; `num_batch_padd` counts those wrapped
///   instances. `before_first` calls made before the next pass pulls
///   anything leave the source alone, so the next epoch continues right
///   after the wrapped instances.
/// - `round_batch=false`: trailing slots repeat the last real instance and
///   `num_batch_padd = batch_size - real`.
///
/// # Parameters
/// - `batch_size` (required): instances per batch
/// - `round_batch`: wrap the source to fill the last batch (default `true`)
/// - `batchify.<key>`: forwarded to the default [`StackBatchify`]
///
/// Every other key is forwarded to the wrapped iterator's `init`.
pub struct BatchLoader {
    base: Box<dyn DataIter<DataInst>>,
    batchify: Option<Arc<dyn BatchifyFunction>>,
    batch_size: usize,
    round_batch: bool,
    /// Instances borrowed from the next pass to fill the last batch.
    num_overflow: usize,
    /// The source already sits past the wrapped instances; rewinds leave it
    /// alone until the next pass starts pulling.
    skip_rewind: bool,
    exhausted: bool,
    current: Option<DataBatch>,
    initialized: bool,
}

impl BatchLoader {
    /// Merges with a [`StackBatchify`] configured at `init`.
    pub fn new(base: Box<dyn DataIter<DataInst>>) -> Self {
        Self {
            base,
            batchify: None,
            batch_size: 0,
            round_batch: true,
            num_overflow: 0,
            skip_rewind: false,
            exhausted: false,
            current: None,
            initialized: false,
        }
    }

    /// Merges with an already initialized batchify function.
    pub fn with_batchify(
        base: Box<dyn DataIter<DataInst>>,
        batchify: Arc<dyn BatchifyFunction>,
    ) -> Self {
        Self {
            batchify: Some(batchify),
            ..Self::new(base)
        }
    }

    fn check_init(&self) -> Result<()> {
        ensure!(self.initialized, DataError::not_initialized("BatchLoader"));
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<DataInst>> {
        if self.base.next()? {
            Ok(Some(self.base.value()?.clone()))
        } else {
            Ok(None)
        }
    }

    fn assemble(&self, instances: Vec<DataInst>, num_batch_padd: usize) -> Result<DataBatch> {
        let batchify = self
            .batchify
            .as_ref()
            .ok_or_else(|| DataError::not_initialized("BatchLoader"))?;

        let index = instances.iter().map(|inst| inst.index).collect();
        let extra_data = instances
            .iter()
            .map(|inst| inst.extra_data.as_str())
            .filter(|extra| !extra.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let fields: Vec<_> = instances.into_iter().map(|inst| inst.data).collect();

        let data = batchify
            .batchify(&fields)
            .context("Failed to batchify instances")?;
        Ok(DataBatch::new(data, index)?
            .with_padding(num_batch_padd)?
            .with_extra_data(extra_data))
    }
}

impl DataIter<DataBatch> for BatchLoader {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("BatchLoader")
        );
        let mut params = Params::new("BatchLoader", kwargs);
        self.batch_size = params.require("batch_size")?;
        ensure!(
            self.batch_size > 0,
            DataError::config("BatchLoader", "batch_size must be positive")
        );
        self.round_batch = params.take_flag("round_batch")?.unwrap_or(true);

        let batchify_kwargs = params.take_scoped("batchify");
        if self.batchify.is_none() {
            let mut stack = StackBatchify::new();
            stack.init(&batchify_kwargs)?;
            self.batchify = Some(Arc::new(stack));
        } else {
            ensure!(
                batchify_kwargs.is_empty(),
                DataError::config(
                    "BatchLoader",
                    "'batchify.*' keys only apply to the default StackBatchify"
                )
            );
        }

        self.base.init(&params.rest())?;
        self.initialized = true;
        Ok(())
    }

    fn before_first(&mut self) -> Result<()> {
        self.check_init()?;
        if !self.skip_rewind {
            self.base.before_first()?;
        }
        self.num_overflow = 0;
        self.exhausted = false;
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.check_init()?;
        self.current = None;
        if self.exhausted {
            return Ok(false);
        }
        if self.num_overflow != 0 {
            // The wrapped batch closed this pass.
            self.exhausted = true;
            return Ok(false);
        }

        self.skip_rewind = false;
        let mut instances = Vec::with_capacity(self.batch_size);
        while instances.len() < self.batch_size {
            match self.pull()? {
                Some(inst) => instances.push(inst),
                None => break,
            }
        }
        if instances.is_empty() {
            self.exhausted = true;
            return Ok(false);
        }

        let real = instances.len();
        let mut num_batch_padd = 0;
        if real < self.batch_size {
            if self.round_batch {
                self.base.before_first()?;
                while instances.len() < self.batch_size {
                    let Some(inst) = self.pull()? else {
                        return Err(DataError::source(
                            "BatchLoader",
                            format!(
                                "number of input instances must be at least batch_size={}",
                                self.batch_size
                            ),
                        )
                        .into());
                    };
                    instances.push(inst);
                    self.num_overflow += 1;
                }
                num_batch_padd = self.num_overflow;
                self.skip_rewind = true;
                debug!(num_overflow = self.num_overflow, "BatchLoader wrapped the source");
            } else {
                let last = instances[real - 1].clone();
                instances.resize(self.batch_size, last);
                num_batch_padd = self.batch_size - real;
            }
        }

        self.current = Some(self.assemble(instances, num_batch_padd)?);
        Ok(true)
    }

    fn value(&self) -> Result<&DataBatch> {
        self.check_init()?;
        self.current
            .as_ref()
            .ok_or_else(|| DataError::no_current_value("BatchLoader").into())
    }

    fn len_hint(&self) -> i64 {
        let base = self.base.len_hint();
        if base < 0 || self.batch_size == 0 {
            -1
        } else {
            (base + self.batch_size as i64 - 1) / self.batch_size as i64
        }
    }

    fn data_names(&self) -> &[String] {
        self.base.data_names()
    }

    fn set_data_name(&mut self, name: &str) {
        self.base.set_data_name(name)
    }
}

#[cfg(test)]
mod batch_loader_tests {
    use super::*;
    use crate::batchify::PadBatchify;
    use crate::iter::{DataIterExt, SequentialSampler};
    use crate::params::kwargs;

    fn loader(pairs: &[(&str, &str)]) -> Result<BatchLoader> {
        let mut loader = BatchLoader::new(Box::new(SequentialSampler::new()));
        loader.init(&kwargs(pairs.iter().copied()))?;
        Ok(loader)
    }

    fn summary(iter: &mut BatchLoader) -> Result<Vec<(Vec<u64>, usize)>> {
        iter.values()
            .map(|batch| batch.map(|b| (b.index, b.num_batch_padd)))
            .collect()
    }

    #[test]
    fn test_even_batches() -> Result<()> {
        let mut iter = loader(&[("batch_size", "2"), ("length", "4")])?;
        assert_eq!(iter.len_hint(), 2);
        let batches = summary(&mut iter)?;
        assert_eq!(batches, vec![(vec![0, 1], 0), (vec![2, 3], 0)]);

        iter.before_first()?;
        assert!(iter.next()?);
        assert_eq!(iter.value()?.data[0].size(), &[2]);
        Ok(())
    }

    #[test]
    fn test_round_batch_wraps_source() -> Result<()> {
        let mut iter = loader(&[("batch_size", "3"), ("length", "5")])?;
        assert_eq!(iter.len_hint(), 2);
        let first = summary(&mut iter)?;
        assert_eq!(first, vec![(vec![0, 1, 2], 0), (vec![3, 4, 0], 1)]);
        assert!(!iter.next()?);

        // The next epoch continues after the wrapped instance.
        let second = summary(&mut iter)?;
        assert_eq!(second[0], (vec![1, 2, 3], 0));
        Ok(())
    }

    #[test]
    fn test_repeated_rewind_after_wrap() -> Result<()> {
        let mut iter = loader(&[("batch_size", "3"), ("length", "5")])?;
        summary(&mut iter)?;

        iter.before_first()?;
        iter.before_first()?;
        assert!(iter.next()?);
        assert_eq!(iter.value()?.index, vec![1, 2, 3]);

        // Rewinding before the wrapped batch was even reported still skips.
        let mut early = loader(&[("batch_size", "3"), ("length", "5")])?;
        early.before_first()?;
        assert!(early.next()?);
        assert!(early.next()?);
        assert_eq!(early.value()?.num_batch_padd, 1);
        early.before_first()?;
        early.before_first()?;
        assert!(early.next()?);
        assert_eq!(early.value()?.index, vec![1, 2, 3]);

        // Once the next pass has started, rewinding goes back to the start.
        iter.before_first()?;
        assert!(iter.next()?);
        assert_eq!(iter.value()?.index, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_repeated_rewind_without_wrap() -> Result<()> {
        let mut iter = loader(&[("batch_size", "2"), ("length", "4")])?;
        iter.before_first()?;
        assert!(iter.next()?);
        iter.before_first()?;
        iter.before_first()?;
        assert_eq!(summary(&mut iter)?, vec![(vec![0, 1], 0), (vec![2, 3], 0)]);
        Ok(())
    }

    #[test]
    fn test_pad_with_last_instance() -> Result<()> {
        let mut iter = loader(&[("batch_size", "3"), ("length", "4"), ("round_batch", "false")])?;
        let batches = summary(&mut iter)?;
        assert_eq!(batches, vec![(vec![0, 1, 2], 0), (vec![3, 3, 3], 2)]);

        // Each epoch restarts from the beginning.
        assert_eq!(summary(&mut iter)?, batches);
        Ok(())
    }

    #[test]
    fn test_source_too_short_to_wrap() -> Result<()> {
        let mut iter = loader(&[("batch_size", "3"), ("length", "1")])?;
        iter.before_first()?;
        let err = iter.next().unwrap_err();
        assert!(matches!(
            crate::error::data_error(&err),
            Some(DataError::Source { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_batch_size_required() {
        assert!(loader(&[("length", "4")]).is_err());
        assert!(loader(&[("length", "4"), ("batch_size", "0")]).is_err());
    }

    #[test]
    fn test_unknown_key_reaches_source() {
        // Unconsumed keys end up in the sampler, which rejects them.
        assert!(loader(&[("batch_size", "2"), ("length", "4"), ("shuffle", "1")]).is_err());
    }

    #[test]
    fn test_custom_batchify() -> Result<()> {
        let mut pad = PadBatchify::new();
        pad.init(&[])?;
        let mut iter = BatchLoader::with_batchify(Box::new(SequentialSampler::new()), Arc::new(pad));
        iter.init(&kwargs([("batch_size", "2"), ("length", "2")]))?;
        assert_eq!(summary(&mut iter)?, vec![(vec![0, 1], 0)]);
        Ok(())
    }
}
