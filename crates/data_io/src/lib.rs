//! Pluggable data ingestion for training loops.
//!
//! Three contracts and a registry tie the crate together:
//! - [`DataIter`]: resettable streaming cursor yielding [`DataInst`]s or
//!   [`DataBatch`]es
//! - [`Dataset`]: random access to `(record, field)` items
//! - [`BatchifyFunction`]: merges per-sample fields into batched tensors
//! - registries: create any of the above by name with string key-value
//!   configuration
//!
//! ```ignore
//! use data_io::{create_iterator, kwargs};
//!
//! let mut iter = create_iterator("ThreadedDataLoader")?;
//! iter.init(&kwargs([
//!     ("dataset", "NDArrayDataset"),
//!     ("dataset.path", "train.safetensors"),
//!     ("sampler", "RandomSampler"),
//!     ("sampler.batch_size", "64"),
//!     ("num_workers", "4"),
//! ]))?;
//! for epoch in 0..10 {
//!     iter.before_first()?;
//!     while iter.next()? {
//!         let batch = iter.value()?;
//!         // train on batch.data
//!     }
//! }
//! ```

pub mod batch;
pub mod batchify;
pub mod config;
pub mod dataset;
pub mod error;
pub mod instance;
pub mod iter;
pub mod params;
pub mod registry;

pub use batch::DataBatch;
pub use batchify::{sanity_check, BatchifyFunction, GroupBatchify, PadBatchify, StackBatchify};
pub use config::ComponentConfig;
pub use dataset::{Dataset, GroupDataset, IndexedDataset, Item, NDArrayDataset};
pub use error::{data_error, DataError};
pub use instance::DataInst;
pub use iter::{
    BatchLoader, DataIter, DataIterExt, PrefetcherIter, RandomSampler, SequentialSampler,
    ThreadedDataLoader,
};
pub use params::{kwargs, KwArg, Params};
pub use registry::{
    create_batchify, create_dataset, create_iterator, list_batchify, list_datasets,
    list_iterators, register_batchify, register_dataset, register_iterator, EntryInfo, Registry,
};
