//! Serializable component descriptions.
//!
//! A [`ComponentConfig`] names a registered component and the key-value list
//! for its `init`, so whole pipelines can be kept in JSON:
//!
//! ```json
//! {
//!   "name": "ThreadedDataLoader",
//!   "kwargs": [
//!     ["dataset", "NDArrayDataset"],
//!     ["dataset.path", "train.safetensors"],
//!     ["sampler", "RandomSampler"],
//!     ["sampler.batch_size", "32"]
//!   ]
//! }
//! ```

use crate::batch::DataBatch;
use crate::batchify::BatchifyFunction;
use crate::dataset::Dataset;
use crate::iter::DataIter;
use crate::params::KwArg;
use crate::registry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(default)]
    pub kwargs: Vec<KwArg>,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kwargs: Vec::new(),
        }
    }

    /// Appends one `init` key; order is preserved.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.kwargs.push((key.into(), value.to_string()));
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse component config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize component config")
    }

    /// Creates the named iterator and initializes it with `kwargs`.
    pub fn build_iterator(&self) -> Result<Box<dyn DataIter<DataBatch>>> {
        let mut iter = registry::create_iterator(&self.name)?;
        iter.init(&self.kwargs)
            .with_context(|| format!("Failed to initialize iterator '{}'", self.name))?;
        Ok(iter)
    }

    /// Creates the named dataset and initializes it with `kwargs`.
    pub fn build_dataset(&self) -> Result<Box<dyn Dataset>> {
        let mut dataset = registry::create_dataset(&self.name)?;
        dataset
            .init(&self.kwargs)
            .with_context(|| format!("Failed to initialize dataset '{}'", self.name))?;
        Ok(dataset)
    }

    /// Creates the named batchify function and initializes it with `kwargs`.
    pub fn build_batchify(&self) -> Result<Box<dyn BatchifyFunction>> {
        let mut batchify = registry::create_batchify(&self.name)?;
        batchify
            .init(&self.kwargs)
            .with_context(|| format!("Failed to initialize batchify function '{}'", self.name))?;
        Ok(batchify)
    }
}
