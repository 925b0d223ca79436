//! Streaming iterators: the pull-based contract every training loop consumes.
//!
//! A [`DataIter`] is a resettable cursor. Consumers drive it as
//!
//! ```ignore
//! iter.init(&kwargs)?;
//! loop {
//!     iter.before_first()?;
//!     while iter.next()? {
//!         let batch = iter.value()?;
//!         // ...
//!     }
//! }
//! ```
//!
//! Building blocks:
//! - [`SequentialSampler`], [`RandomSampler`]: index instances
//! - [`BatchLoader`]: groups instances into [`DataBatch`](crate::DataBatch)es
//! - [`PrefetcherIter`]: runs any batch iterator on a background thread
//! - [`ThreadedDataLoader`]: sampler + dataset + batchify over a worker pool

mod batch_loader;
mod loader;
mod pool;
mod prefetcher;
mod sampler;

pub use batch_loader::BatchLoader;
pub use loader::ThreadedDataLoader;
pub use prefetcher::PrefetcherIter;
pub use sampler::{RandomSampler, SequentialSampler};

use crate::params::KwArg;
use anyhow::Result;
use std::marker::PhantomData;

/// A resettable cursor over values of type `T`.
///
/// # Lifecycle
/// - `init` exactly once, before anything else
/// - `before_first` rewinds to the start of a pass
/// - `next` advances; after it returns `false` it keeps returning `false`
///   until the next `before_first`
/// - `value` is only valid directly after `next` returned `true`
///
/// Implementations own their position, so one instance serves one consumer.
pub trait DataIter<T>: Send {
    /// Configures the iterator from an ordered key-value list.
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()>;

    /// Rewinds to the start of a pass.
    fn before_first(&mut self) -> Result<()>;

    /// Advances; `Ok(false)` at the end of the pass.
    fn next(&mut self) -> Result<bool>;

    /// The value produced by the last successful `next`.
    fn value(&self) -> Result<&T>;

    /// Expected number of values per pass; negative means unknown.
    fn len_hint(&self) -> i64 {
        -1
    }

    /// Semantic names of the value's fields, in order.
    fn data_names(&self) -> &[String];

    fn set_data_name(&mut self, name: &str);
}

impl<T, I: DataIter<T> + ?Sized> DataIter<T> for Box<I> {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        (**self).init(kwargs)
    }

    fn before_first(&mut self) -> Result<()> {
        (**self).before_first()
    }

    fn next(&mut self) -> Result<bool> {
        (**self).next()
    }

    fn value(&self) -> Result<&T> {
        (**self).value()
    }

    fn len_hint(&self) -> i64 {
        (**self).len_hint()
    }

    fn data_names(&self) -> &[String] {
        (**self).data_names()
    }

    fn set_data_name(&mut self, name: &str) {
        (**self).set_data_name(name)
    }
}

/// Adapters over [`DataIter`].
pub trait DataIterExt<T: Clone>: DataIter<T> {
    /// Rewinds and returns a std iterator over one pass.
    ///
    /// Values are cloned out of the cursor; for tensors this is a shallow
    /// clone. The first error ends the pass.
    fn values(&mut self) -> Values<'_, T, Self> {
        Values {
            iter: self,
            started: false,
            done: false,
            _marker: PhantomData,
        }
    }
}

impl<T: Clone, I: DataIter<T> + ?Sized> DataIterExt<T> for I {}

pub struct Values<'a, T, I: ?Sized> {
    iter: &'a mut I,
    started: bool,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone, I: DataIter<T> + ?Sized> Iterator for Values<'_, T, I> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = (|| -> Result<Option<T>> {
            if !self.started {
                self.started = true;
                self.iter.before_first()?;
            }
            if self.iter.next()? {
                Ok(Some(self.iter.value()?.clone()))
            } else {
                Ok(None)
            }
        })();
        match step {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
