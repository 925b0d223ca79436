//! Name -> factory registries.
//!
//! A [`Registry`] maps names to factories producing fresh, uninitialized
//! components, together with human-readable documentation of the keys each
//! component accepts. Three process-wide registries are built lazily with
//! the builtin components and can be extended at runtime:
//!
//! | registry   | produces                      | builtins                                                   |
//! |------------|-------------------------------|------------------------------------------------------------|
//! | iterators  | `dyn DataIter<DataBatch>`     | `SequentialSampler`, `RandomSampler`, `ThreadedDataLoader` |
//! | datasets   | `dyn Dataset`                 | `NDArrayDataset`                                           |
//! | batchify   | `dyn BatchifyFunction`        | `StackBatchify`, `PadBatchify`                             |
//!
//! ```ignore
//! let mut iter = data_io::create_iterator("SequentialSampler")?;
//! iter.init(&kwargs([("length", "100"), ("batch_size", "8")]))?;
//! ```

use crate::batch::DataBatch;
use crate::batchify::{BatchifyFunction, PadBatchify, StackBatchify};
use crate::dataset::{Dataset, NDArrayDataset};
use crate::error::DataError;
use crate::iter::{
    BatchLoader, DataIter, PrefetcherIter, RandomSampler, SequentialSampler, ThreadedDataLoader,
};
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Produces a fresh, uninitialized component.
pub type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// Documentation of one `init` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgumentInfo {
    pub name: String,
    pub type_info: String,
    pub description: String,
}

/// Documentation of one registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentInfo>,
}

pub struct RegistryEntry<T: ?Sized> {
    info: EntryInfo,
    factory: Factory<T>,
}

impl<T: ?Sized> RegistryEntry<T> {
    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.info.description = description.into();
        self
    }

    pub fn add_argument(
        &mut self,
        name: impl Into<String>,
        type_info: impl Into<String>,
        description: impl Into<String>,
    ) -> &mut Self {
        self.info.arguments.push(ArgumentInfo {
            name: name.into(),
            type_info: type_info.into(),
            description: description.into(),
        });
        self
    }

    pub fn info(&self) -> &EntryInfo {
        &self.info
    }

    pub fn create(&self) -> Box<T> {
        (self.factory)()
    }
}

/// Names mapped to factories for one kind of component.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: BTreeMap<String, RegistryEntry<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// `kind` names the component family in error messages, e.g. `"iterator"`.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Adds `name`; fails if the name is taken.
    ///
    /// The returned entry can be documented in place:
    /// ```ignore
    /// registry
    ///     .register("Csv", || Box::new(CsvDataset::new()))?
    ///     .describe("Rows of a CSV file")
    ///     .add_argument("path", "string, required", "file to read");
    /// ```
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<&mut RegistryEntry<T>>
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) {
            return Err(DataError::DuplicateRegistration {
                kind: self.kind.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        Ok(self.insert(name, factory))
    }

    fn insert<F>(&mut self, name: &str, factory: F) -> &mut RegistryEntry<T>
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        let factory: Factory<T> = Arc::new(factory);
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| RegistryEntry {
                info: EntryInfo {
                    name: name.to_string(),
                    description: String::new(),
                    arguments: Vec::new(),
                },
                factory,
            })
    }

    pub fn find(&self, name: &str) -> Option<&RegistryEntry<T>> {
        self.entries.get(name)
    }

    /// Creates a fresh component; unknown names list what is available.
    pub fn create(&self, name: &str) -> Result<Box<T>> {
        match self.find(name) {
            Some(entry) => Ok(entry.create()),
            None => Err(DataError::NotFound {
                kind: self.kind.to_string(),
                name: name.to_string(),
                available: self.names().join(", "),
            }
            .into()),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn list_info(&self) -> Vec<EntryInfo> {
        self.entries.values().map(|entry| entry.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn document_sampler(entry: &mut RegistryEntry<dyn DataIter<DataBatch>>) {
    entry
        .add_argument("length", "u64, required", "number of indices per pass")
        .add_argument("batch_size", "usize, required", "indices per batch")
        .add_argument("round_batch", "bool, default true", "wrap the source to fill the last batch")
        .add_argument("prefetch_buffer", "usize, default 4", "batches prepared ahead");
}

fn builtin_iterators() -> Registry<dyn DataIter<DataBatch>> {
    let mut registry: Registry<dyn DataIter<DataBatch>> = Registry::new("iterator");

    let entry = registry.insert(
        "SequentialSampler",
        || {
            let loader = BatchLoader::new(Box::new(SequentialSampler::new()));
            Box::new(PrefetcherIter::new(Box::new(loader)))
        },
    );
    entry.describe("Batches of consecutive indices, prefetched");
    document_sampler(entry);
    entry.add_argument("start", "u64, default 0", "first index");

    let entry = registry.insert(
        "RandomSampler",
        || {
            let loader = BatchLoader::new(Box::new(RandomSampler::new()));
            Box::new(PrefetcherIter::new(Box::new(loader)))
        },
    );
    entry.describe("Batches of a per-epoch random permutation of indices, prefetched");
    document_sampler(entry);
    entry.add_argument("seed", "u64, default 0", "base seed; pass k uses seed + k");

    registry
        .insert(
            "ThreadedDataLoader",
            || Box::new(PrefetcherIter::new(Box::new(ThreadedDataLoader::from_registry()))),
        )
        .describe("Dataset records fetched by a worker pool in sampler order, prefetched")
        .add_argument("dataset", "string, required", "dataset registry name")
        .add_argument("sampler", "string, required", "iterator registry name yielding index batches")
        .add_argument("batchify", "string, default StackBatchify", "batchify registry name")
        .add_argument("num_workers", "usize, default 0", "fetch threads; 0 fetches inline")
        .add_argument("prefetch_buffer", "usize, default 4", "batches prepared ahead");

    registry
}

fn builtin_datasets() -> Registry<dyn Dataset> {
    let mut registry: Registry<dyn Dataset> = Registry::new("dataset");
    registry
        .insert("NDArrayDataset", || Box::new(NDArrayDataset::new()))
        .describe("Tensors sharing a leading record dimension, loaded from safetensors")
        .add_argument("path", "string, required", "safetensors file")
        .add_argument("keys", "comma list, optional", "tensor names selecting the fields");
    registry
}

fn builtin_batchify() -> Registry<dyn BatchifyFunction> {
    let mut registry: Registry<dyn BatchifyFunction> = Registry::new("batchify function");
    registry
        .insert("StackBatchify", || Box::new(StackBatchify::new()))
        .describe("Stacks equal-shaped fields along a new batch dimension")
        .add_argument("dtype", "string, optional", "cast outputs to this element type");
    registry
        .insert("PadBatchify", || Box::new(PadBatchify::new()))
        .describe("Pads fields to the batch maximum shape, then stacks them")
        .add_argument("pad_val", "f64, default 0", "fill value")
        .add_argument("dtype", "string, optional", "cast outputs to this element type")
        .add_argument("round_to", "usize, optional", "round the first padded axis up to a multiple");
    registry
}

lazy_static! {
    static ref ITERATORS: RwLock<Registry<dyn DataIter<DataBatch>>> = {
        debug!("Building iterator registry");
        RwLock::new(builtin_iterators())
    };
    static ref DATASETS: RwLock<Registry<dyn Dataset>> = RwLock::new(builtin_datasets());
    static ref BATCHIFY: RwLock<Registry<dyn BatchifyFunction>> = RwLock::new(builtin_batchify());
}

fn poisoned(kind: &str) -> anyhow::Error {
    anyhow!("{} registry lock poisoned", kind)
}

/// Creates an uninitialized iterator by registry name.
pub fn create_iterator(name: &str) -> Result<Box<dyn DataIter<DataBatch>>> {
    ITERATORS.read().map_err(|_| poisoned("iterator"))?.create(name)
}

/// Creates an uninitialized dataset by registry name.
pub fn create_dataset(name: &str) -> Result<Box<dyn Dataset>> {
    DATASETS.read().map_err(|_| poisoned("dataset"))?.create(name)
}

/// Creates an uninitialized batchify function by registry name.
pub fn create_batchify(name: &str) -> Result<Box<dyn BatchifyFunction>> {
    BATCHIFY.read().map_err(|_| poisoned("batchify"))?.create(name)
}

pub fn register_iterator<F>(name: &str, description: &str, factory: F) -> Result<()>
where
    F: Fn() -> Box<dyn DataIter<DataBatch>> + Send + Sync + 'static,
{
    ITERATORS
        .write()
        .map_err(|_| poisoned("iterator"))?
        .register(name, factory)?
        .describe(description);
    Ok(())
}

pub fn register_dataset<F>(name: &str, description: &str, factory: F) -> Result<()>
where
    F: Fn() -> Box<dyn Dataset> + Send + Sync + 'static,
{
    DATASETS
        .write()
        .map_err(|_| poisoned("dataset"))?
        .register(name, factory)?
        .describe(description);
    Ok(())
}

pub fn register_batchify<F>(name: &str, description: &str, factory: F) -> Result<()>
where
    F: Fn() -> Box<dyn BatchifyFunction> + Send + Sync + 'static,
{
    BATCHIFY
        .write()
        .map_err(|_| poisoned("batchify"))?
        .register(name, factory)?
        .describe(description);
    Ok(())
}

pub fn list_iterators() -> Result<Vec<EntryInfo>> {
    Ok(ITERATORS.read().map_err(|_| poisoned("iterator"))?.list_info())
}

pub fn list_datasets() -> Result<Vec<EntryInfo>> {
    Ok(DATASETS.read().map_err(|_| poisoned("dataset"))?.list_info())
}

pub fn list_batchify() -> Result<Vec<EntryInfo>> {
    Ok(BATCHIFY.read().map_err(|_| poisoned("batchify"))?.list_info())
}
