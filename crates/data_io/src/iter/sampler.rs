use super::DataIter;
use crate::error::DataError;
use crate::instance::DataInst;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use tch::Tensor;
use tracing::debug;

/// Shared cursor over an index order.
#[derive(Debug, Default)]
struct Cursor {
    order: Vec<u64>,
    position: usize,
    current: Option<DataInst>,
    names: Vec<String>,
    initialized: bool,
}

impl Cursor {
    fn check_init(&self, component: &'static str) -> Result<()> {
        ensure!(self.initialized, DataError::not_initialized(component));
        Ok(())
    }

    fn rewind(&mut self) {
        self.position = 0;
        self.current = None;
    }

    fn advance(&mut self) -> bool {
        match self.order.get(self.position) {
            Some(&index) => {
                self.position += 1;
                self.current = Some(DataInst::new(index, vec![Tensor::from(index as i64)]));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn value(&self, component: &'static str) -> Result<&DataInst> {
        self.check_init(component)?;
        self.current
            .as_ref()
            .ok_or_else(|| DataError::no_current_value(component).into())
    }
}

/// Yields indices `start, start + 1, ..., start + length - 1` in order.
///
/// Every instance carries its index both as `DataInst::index` and as a
/// scalar `Int64` tensor in `data[0]`.
///
/// # Parameters
/// - `length` (required): number of indices per pass
/// - `start`: first index (default 0)
///
/// # Example
/// ```ignore
/// let mut sampler = SequentialSampler::new();
/// sampler.init(&kwargs([("length", "5")]))?;
/// // yields 0, 1, 2, 3, 4
/// ```
#[derive(Debug, Default)]
pub struct SequentialSampler {
    cursor: Cursor,
}

impl SequentialSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataIter<DataInst> for SequentialSampler {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.cursor.initialized,
            DataError::already_initialized("SequentialSampler")
        );
        let mut params = Params::new("SequentialSampler", kwargs);
        let length: u64 = params.require("length")?;
        let start: u64 = params.take("start")?.unwrap_or(0);
        params.finish()?;

        self.cursor.order = (start..start + length).collect();
        self.cursor.initialized = true;
        Ok(())
    }

    fn before_first(&mut self) -> Result<()> {
        self.cursor.check_init("SequentialSampler")?;
        self.cursor.rewind();
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.cursor.check_init("SequentialSampler")?;
        Ok(self.cursor.advance())
    }

    fn value(&self) -> Result<&DataInst> {
        self.cursor.value("SequentialSampler")
    }

    fn len_hint(&self) -> i64 {
        self.cursor.order.len() as i64
    }

    fn data_names(&self) -> &[String] {
        &self.cursor.names
    }

    fn set_data_name(&mut self, name: &str) {
        self.cursor.names.push(name.to_string());
    }
}

/// Yields a random permutation of `0..length` per pass.
///
/// # Seed handling
/// The permutation for pass `k` is drawn from `StdRng` seeded with
/// `seed + k`. `init` draws pass 0; `before_first` moves to the next pass
/// only if the current one has been started, so repeated rewinds keep the
/// same order. Same seed, same sequence of epochs.
///
/// # Parameters
/// - `length` (required): number of indices per pass
/// - `seed`: base RNG seed (default 0)
#[derive(Debug, Default)]
pub struct RandomSampler {
    cursor: Cursor,
    base_seed: u64,
    epoch: u64,
    /// Set once `next` has been called on the current permutation.
    started: bool,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch counter.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Reorders indices with an RNG derived from `base_seed + epoch`.
    fn shuffle(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(self.epoch));
        self.cursor.order.sort_unstable();
        self.cursor.order.shuffle(&mut rng);
    }
}

impl DataIter<DataInst> for RandomSampler {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            !self.cursor.initialized,
            DataError::already_initialized("RandomSampler")
        );
        let mut params = Params::new("RandomSampler", kwargs);
        let length: u64 = params.require("length")?;
        self.base_seed = params.take("seed")?.unwrap_or(0);
        params.finish()?;

        self.cursor.order = (0..length).collect();
        self.epoch = 0;
        self.started = false;
        self.shuffle();
        self.cursor.initialized = true;
        Ok(())
    }

    fn before_first(&mut self) -> Result<()> {
        self.cursor.check_init("RandomSampler")?;
        if self.started {
            self.epoch += 1;
            self.shuffle();
            self.started = false;
            debug!(epoch = self.epoch, "RandomSampler reshuffled");
        }
        self.cursor.rewind();
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.cursor.check_init("RandomSampler")?;
        self.started = true;
        Ok(self.cursor.advance())
    }

    fn value(&self) -> Result<&DataInst> {
        self.cursor.value("RandomSampler")
    }

    fn len_hint(&self) -> i64 {
        self.cursor.order.len() as i64
    }

    fn data_names(&self) -> &[String] {
        &self.cursor.names
    }

    fn set_data_name(&mut self, name: &str) {
        self.cursor.names.push(name.to_string());
    }
}
