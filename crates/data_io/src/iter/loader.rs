//! Threaded data loader: sampler + dataset + batchify.
//!
//! Every value the sampler yields is a batch of record indices. The loader
//! fetches those records from the dataset, either inline or on a persistent
//! [`WorkerPool`], restores sampler order and merges them with the batchify
//! function.
//!
//! # Concurrency
//! Fetch tasks are tagged `(generation, slot, index)`. The main thread
//! alternates between queueing tasks with `try_submit` and draining outputs,
//! so neither bounded queue can fill up while the other side waits on it.
//! Outputs of an abandoned batch (one that failed part-way) carry an old
//! generation and are dropped.

use super::pool::WorkerPool;
use super::DataIter;
use crate::batch::DataBatch;
use crate::batchify::BatchifyFunction;
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::params::{KwArg, Params};
use crate::registry;
use anyhow::{ensure, Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tch::{Kind, Tensor};
use tracing::debug;

type FetchTask = (u64, usize, u64);
type FetchOutput = (u64, usize, Result<Vec<Tensor>>);

/// Outstanding fetches per worker.
const TASKS_PER_WORKER: usize = 2;

/// Loads batches of dataset records in sampler order.
///
/// Components come either from the constructor ([`ThreadedDataLoader::new`])
/// or from the registries at `init` ([`ThreadedDataLoader::from_registry`]).
///
/// # Parameters
/// - `num_workers`: fetch threads; 0 fetches inline (default 0)
/// - `dataset`, `sampler`, `batchify`: registry names (registry mode only;
///   `batchify` defaults to `StackBatchify`)
/// - `dataset.<key>`, `batchify.<key>`: forwarded to the named component
/// - `sampler.<key>`: forwarded to the sampler; `length` defaults to the
///   dataset length
///
/// # Example
/// ```ignore
/// let mut loader = ThreadedDataLoader::from_registry();
/// loader.init(&kwargs([
///     ("dataset", "NDArrayDataset"),
///     ("dataset.path", "train.safetensors"),
///     ("sampler", "RandomSampler"),
///     ("sampler.batch_size", "32"),
///     ("num_workers", "4"),
/// ]))?;
/// ```
pub struct ThreadedDataLoader {
    dataset: Option<Arc<dyn Dataset>>,
    sampler: Option<Box<dyn DataIter<DataBatch>>>,
    batchify: Option<Arc<dyn BatchifyFunction>>,
    num_workers: usize,
    pool: Option<WorkerPool<FetchTask, FetchOutput>>,
    generation: u64,
    current: Option<DataBatch>,
    names: Vec<String>,
    initialized: bool,
}

impl ThreadedDataLoader {
    /// Loader over explicit components. `dataset` and `batchify` must already
    /// be initialized; the sampler is initialized by the loader's `init`.
    pub fn new(
        dataset: Arc<dyn Dataset>,
        sampler: Box<dyn DataIter<DataBatch>>,
        batchify: Arc<dyn BatchifyFunction>,
    ) -> Self {
        Self {
            dataset: Some(dataset),
            sampler: Some(sampler),
            batchify: Some(batchify),
            ..Self::from_registry()
        }
    }

    /// Loader whose components are resolved by name at `init`.
    pub fn from_registry() -> Self {
        Self {
            dataset: None,
            sampler: None,
            batchify: None,
            num_workers: 0,
            pool: None,
            generation: 0,
            current: None,
            names: Vec::new(),
            initialized: false,
        }
    }

    fn resolve_dataset(&self, params: &mut Params<'_>) -> Result<Arc<dyn Dataset>> {
        let name = params.take_raw("dataset");
        let scoped = params.take_scoped("dataset");
        if let Some(dataset) = &self.dataset {
            ensure!(
                name.is_none() && scoped.is_empty(),
                DataError::config("ThreadedDataLoader", "dataset was already provided")
            );
            return Ok(dataset.clone());
        }
        let name = name.ok_or_else(|| {
            DataError::config("ThreadedDataLoader", "missing required parameter 'dataset'")
        })?;
        let mut dataset = registry::create_dataset(name)?;
        dataset
            .init(&scoped)
            .with_context(|| format!("Failed to initialize dataset '{}'", name))?;
        Ok(Arc::from(dataset))
    }

    fn resolve_batchify(&self, params: &mut Params<'_>) -> Result<Arc<dyn BatchifyFunction>> {
        let name = params.take_raw("batchify");
        let scoped = params.take_scoped("batchify");
        if let Some(batchify) = &self.batchify {
            ensure!(
                name.is_none() && scoped.is_empty(),
                DataError::config("ThreadedDataLoader", "batchify was already provided")
            );
            return Ok(batchify.clone());
        }
        let name = name.unwrap_or("StackBatchify");
        let mut batchify = registry::create_batchify(name)?;
        batchify
            .init(&scoped)
            .with_context(|| format!("Failed to initialize batchify function '{}'", name))?;
        Ok(Arc::from(batchify))
    }

    fn resolve_sampler(
        &mut self,
        params: &mut Params<'_>,
        dataset_len: u64,
    ) -> Result<Box<dyn DataIter<DataBatch>>> {
        let name = params.take_raw("sampler");
        let mut scoped = params.take_scoped("sampler");
        if !scoped.iter().any(|(k, _)| k == "length") {
            scoped.push(("length".to_string(), dataset_len.to_string()));
        }

        ensure!(
            self.sampler.is_none() || name.is_none(),
            DataError::config("ThreadedDataLoader", "sampler was already provided")
        );
        let (mut sampler, label) = match (self.sampler.take(), name) {
            (Some(sampler), _) => (sampler, "sampler".to_string()),
            (None, Some(name)) => (registry::create_iterator(name)?, format!("sampler '{}'", name)),
            (None, None) => {
                return Err(DataError::config(
                    "ThreadedDataLoader",
                    "missing required parameter 'sampler'",
                )
                .into())
            }
        };
        sampler
            .init(&scoped)
            .with_context(|| format!("Failed to initialize {}", label))?;
        Ok(sampler)
    }

    fn spawn_pool(&self, dataset: Arc<dyn Dataset>) -> Result<WorkerPool<FetchTask, FetchOutput>> {
        WorkerPool::new(
            self.num_workers,
            self.num_workers * TASKS_PER_WORKER,
            move |worker_id, task_rx, output_tx, shutdown| {
                while !shutdown.load(Ordering::Relaxed) {
                    let Ok((generation, slot, index)) = task_rx.recv() else {
                        break;
                    };
                    let record = dataset
                        .get_record(index)
                        .with_context(|| format!("Worker {} failed to fetch record {}", worker_id, index));
                    if output_tx.send((generation, slot, record)).is_err() {
                        break;
                    }
                }
            },
        )
    }

    fn fetch_inline(dataset: &dyn Dataset, indices: &[u64]) -> Result<Vec<Vec<Tensor>>> {
        indices
            .iter()
            .map(|&index| {
                dataset
                    .get_record(index)
                    .with_context(|| format!("Failed to fetch record {}", index))
            })
            .collect()
    }

    fn fetch_parallel(
        pool: &WorkerPool<FetchTask, FetchOutput>,
        generation: u64,
        indices: &[u64],
    ) -> Result<Vec<Vec<Tensor>>> {
        let mut slots: Vec<Option<Vec<Tensor>>> = (0..indices.len()).map(|_| None).collect();
        let mut tasks = indices
            .iter()
            .enumerate()
            .map(|(slot, &index)| (generation, slot, index));
        let mut next_task = tasks.next();
        let mut received = 0;

        while received < indices.len() {
            while let Some(task) = next_task.take() {
                match pool.try_submit(task)? {
                    None => next_task = tasks.next(),
                    Some(rejected) => {
                        next_task = Some(rejected);
                        break;
                    }
                }
            }

            let (task_generation, slot, record) = pool.recv()?;
            if task_generation != generation {
                continue;
            }
            slots[slot] = Some(record?);
            received += 1;
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(slot, record)| {
                record.ok_or_else(|| {
                    DataError::source("ThreadedDataLoader", format!("slot {} was never filled", slot))
                        .into()
                })
            })
            .collect()
    }
}

/// Reads the record indices out of a sampler batch's first field.
fn sampler_indices(batch: &DataBatch) -> Result<Vec<u64>> {
    let flat = batch.get(0)?.to_kind(Kind::Int64).reshape(&[-1]);
    Vec::<i64>::try_from(&flat)?
        .into_iter()
        .map(|index| {
            u64::try_from(index).map_err(|_| {
                DataError::source("ThreadedDataLoader", format!("negative sample index {}", index))
                    .into()
            })
        })
        .collect()
}

impl DataIter<DataBatch> for ThreadedDataLoader {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.initialized,
            DataError::already_initialized("ThreadedDataLoader")
        );
        let mut params = Params::new("ThreadedDataLoader", kwargs);
        self.num_workers = params.take("num_workers")?.unwrap_or(0);

        let dataset = self.resolve_dataset(&mut params)?;
        let batchify = self.resolve_batchify(&mut params)?;
        let sampler = self.resolve_sampler(&mut params, dataset.len())?;
        params.finish()?;

        if self.num_workers > 0 {
            self.pool = Some(self.spawn_pool(dataset.clone())?);
        }
        debug!(
            num_workers = self.num_workers,
            records = dataset.len(),
            "ThreadedDataLoader initialized"
        );

        self.dataset = Some(dataset);
        self.batchify = Some(batchify);
        self.sampler = Some(sampler);
        self.initialized = true;
        Ok(())
    }

    fn before_first(&mut self) -> Result<()> {
        ensure!(
            self.initialized,
            DataError::not_initialized("ThreadedDataLoader")
        );
        self.current = None;
        match self.sampler.as_mut() {
            Some(sampler) => sampler.before_first(),
            None => Err(DataError::not_initialized("ThreadedDataLoader").into()),
        }
    }

    fn next(&mut self) -> Result<bool> {
        ensure!(
            self.initialized,
            DataError::not_initialized("ThreadedDataLoader")
        );
        self.current = None;
        let (Some(dataset), Some(sampler), Some(batchify)) =
            (&self.dataset, self.sampler.as_mut(), &self.batchify)
        else {
            return Err(DataError::not_initialized("ThreadedDataLoader").into());
        };

        if !sampler.next()? {
            return Ok(false);
        }
        let sampled = sampler.value()?;
        let indices = sampler_indices(sampled)?;

        self.generation += 1;
        let records = match &self.pool {
            Some(pool) => Self::fetch_parallel(pool, self.generation, &indices)?,
            None => Self::fetch_inline(dataset.as_ref(), &indices)?,
        };
        let data = batchify
            .batchify(&records)
            .context("Failed to batchify loaded records")?;

        let batch = DataBatch::new(data, sampled.index.clone())?
            .with_padding(sampled.num_batch_padd)?
            .with_extra_data(sampled.extra_data.clone());
        self.current = Some(batch);
        Ok(true)
    }

    fn value(&self) -> Result<&DataBatch> {
        ensure!(
            self.initialized,
            DataError::not_initialized("ThreadedDataLoader")
        );
        self.current
            .as_ref()
            .ok_or_else(|| DataError::no_current_value("ThreadedDataLoader").into())
    }

    fn len_hint(&self) -> i64 {
        self.sampler.as_ref().map_or(-1, |sampler| sampler.len_hint())
    }

    fn data_names(&self) -> &[String] {
        &self.names
    }

    fn set_data_name(&mut self, name: &str) {
        self.names.push(name.to_string());
    }
}

#[cfg(test)]
mod loader_tests {
    use super::*;
    use crate::batchify::StackBatchify;
    use crate::dataset::NDArrayDataset;
    use crate::iter::{BatchLoader, DataIterExt, SequentialSampler};
    use crate::params::kwargs;
    use tch::Device;

    fn dataset(n: i64) -> Result<Arc<dyn Dataset>> {
        let mut dataset = NDArrayDataset::with_arrays(vec![
            Tensor::arange(n * 2, (Kind::Float, Device::Cpu)).reshape(&[n, 2]),
            Tensor::arange(n, (Kind::Int64, Device::Cpu)),
        ]);
        dataset.init(&[])?;
        Ok(Arc::new(dataset))
    }

    fn loader(n: i64, pairs: &[(&str, &str)]) -> Result<ThreadedDataLoader> {
        let mut batchify = StackBatchify::new();
        batchify.init(&[])?;
        let sampler = BatchLoader::new(Box::new(SequentialSampler::new()));
        let mut loader = ThreadedDataLoader::new(dataset(n)?, Box::new(sampler), Arc::new(batchify));
        loader.init(&kwargs(pairs.iter().copied()))?;
        Ok(loader)
    }

    #[test]
    fn test_inline_loader() -> Result<()> {
        let mut loader = loader(5, &[("sampler.batch_size", "2")])?;
        assert_eq!(loader.len_hint(), 3);

        let batches: Vec<DataBatch> = loader.values().collect::<Result<_>>()?;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].data[0].size(), &[2, 2]);
        assert_eq!(batches[0].index, vec![0, 1]);
        assert_eq!(Vec::<i64>::try_from(&batches[1].data[1])?, vec![2, 3]);
        // The tail wraps around to record 0.
        assert_eq!(batches[2].index, vec![4, 0]);
        assert_eq!(batches[2].num_batch_padd, 1);
        Ok(())
    }

    #[test]
    fn test_workers_match_inline() -> Result<()> {
        let mut inline = loader(11, &[("sampler.batch_size", "3"), ("sampler.round_batch", "0")])?;
        let mut threaded = loader(
            11,
            &[
                ("sampler.batch_size", "3"),
                ("sampler.round_batch", "0"),
                ("num_workers", "3"),
            ],
        )?;

        let expected: Vec<DataBatch> = inline.values().collect::<Result<_>>()?;
        for _ in 0..2 {
            let got: Vec<DataBatch> = threaded.values().collect::<Result<_>>()?;
            assert_eq!(got.len(), expected.len());
            for (a, b) in got.iter().zip(&expected) {
                assert_eq!(a.index, b.index);
                assert_eq!(a.num_batch_padd, b.num_batch_padd);
                assert!(a.data[0].equal(&b.data[0]));
                assert!(a.data[1].equal(&b.data[1]));
            }
        }
        Ok(())
    }

    #[test]
    fn test_sampler_length_override() -> Result<()> {
        let mut loader = loader(10, &[("sampler.batch_size", "2"), ("sampler.length", "4")])?;
        let batches: Vec<DataBatch> = loader.values().collect::<Result<_>>()?;
        assert_eq!(batches.len(), 2);
        Ok(())
    }

    #[test]
    fn test_out_of_range_sampler_fails() -> Result<()> {
        let mut loader = loader(
            3,
            &[("sampler.batch_size", "2"), ("sampler.length", "2"), ("sampler.start", "2")],
        )?;
        loader.before_first()?;
        let err = loader.next().unwrap_err();
        assert!(matches!(
            crate::error::data_error(&err),
            Some(DataError::OutOfBounds { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_component_keys_rejected_when_provided() {
        assert!(loader(4, &[("sampler.batch_size", "2"), ("dataset", "NDArrayDataset")]).is_err());
    }
}
