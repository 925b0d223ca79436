use super::DataIter;
use crate::batch::DataBatch;
use crate::error::DataError;
use crate::params::{KwArg, Params};
use anyhow::{ensure, Context, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::thread;
use tracing::{debug, warn};

const DEFAULT_PREFETCH_BUFFER: usize = 4;

/// Messages from the producer thread, tagged with the pass they belong to.
enum Produced {
    Batch { epoch: u64, batch: DataBatch },
    End { epoch: u64 },
    Failed { epoch: u64, error: anyhow::Error },
}

enum Control {
    /// Produce pass `epoch` from wherever the wrapped iterator stands.
    Start(u64),
    /// Rewind the wrapped iterator, then produce pass `epoch`.
    Reset(u64),
}

/// Runs a batch iterator on a background thread, up to `prefetch_buffer`
/// batches ahead of the consumer.
///
/// Ordering is preserved. The first pass starts without rewinding the
/// wrapped iterator, exactly as if it were consumed directly. `before_first`
/// tells the producer to rewind and discards whatever it had queued for the
/// previous pass; further calls before the next `next` are no-ops. Errors
/// raised by the wrapped iterator surface from the consumer's `next`.
///
/// # Parameters
/// - `prefetch_buffer`: queue capacity in batches (default 4)
///
/// Every other key is forwarded to the wrapped iterator's `init`.
///
/// # Example
/// ```ignore
/// let loader = BatchLoader::new(Box::new(SequentialSampler::new()));
/// let mut iter = PrefetcherIter::new(Box::new(loader));
/// iter.init(&kwargs([("batch_size", "32"), ("length", "1000")]))?;
/// ```
pub struct PrefetcherIter {
    /// Present until `init` moves it onto the producer thread.
    base: Option<Box<dyn DataIter<DataBatch>>>,
    worker: Option<thread::JoinHandle<()>>,
    ctrl_tx: Option<Sender<Control>>,
    out_rx: Option<Receiver<Produced>>,
    epoch: u64,
    /// Whether the producer has been told to start a pass.
    started: bool,
    /// A rewind was requested and `next` has not run since.
    rewound: bool,
    exhausted: bool,
    current: Option<DataBatch>,
    names: Vec<String>,
    len_hint: i64,
}

impl PrefetcherIter {
    pub fn new(base: Box<dyn DataIter<DataBatch>>) -> Self {
        Self {
            base: Some(base),
            worker: None,
            ctrl_tx: None,
            out_rx: None,
            epoch: 0,
            started: false,
            rewound: false,
            exhausted: false,
            current: None,
            names: Vec::new(),
            len_hint: -1,
        }
    }

    fn channels(&self) -> Result<(Sender<Control>, Receiver<Produced>)> {
        match (&self.ctrl_tx, &self.out_rx) {
            (Some(ctrl_tx), Some(out_rx)) => Ok((ctrl_tx.clone(), out_rx.clone())),
            _ => Err(DataError::not_initialized("PrefetcherIter").into()),
        }
    }
}

/// One step of the wrapped iterator, packaged for the consumer.
fn produce_one(base: &mut dyn DataIter<DataBatch>, epoch: u64) -> Produced {
    match base.next() {
        Ok(true) => match base.value() {
            Ok(batch) => Produced::Batch {
                epoch,
                batch: batch.clone(),
            },
            Err(error) => Produced::Failed { epoch, error },
        },
        Ok(false) => Produced::End { epoch },
        Err(error) => Produced::Failed { epoch, error },
    }
}

/// Producer loop: waits for the first command, fills `out_tx` until the pass
/// ends, then idles until the consumer asks for the next pass. Every reset
/// rewinds the wrapped iterator exactly once. Exits when either channel
/// disconnects.
fn producer_loop(
    mut base: Box<dyn DataIter<DataBatch>>,
    out_tx: Sender<Produced>,
    ctrl_rx: Receiver<Control>,
) {
    let mut epoch = 0;
    let mut pending_error = None;
    let mut idle = true;
    'produce: loop {
        let mut command = None;
        if idle {
            match ctrl_rx.recv() {
                Ok(control) => command = Some(control),
                Err(_) => break 'produce,
            }
        } else {
            let message = match pending_error.take() {
                Some(error) => Produced::Failed { epoch, error },
                None => produce_one(base.as_mut(), epoch),
            };
            idle = !matches!(message, Produced::Batch { .. });

            select! {
                send(out_tx, message) -> sent => {
                    if sent.is_err() {
                        break 'produce;
                    }
                }
                recv(ctrl_rx) -> msg => match msg {
                    Ok(control) => command = Some(control),
                    Err(_) => break 'produce,
                },
            }
        }

        match command {
            Some(Control::Start(next_epoch)) => {
                epoch = next_epoch;
                idle = false;
            }
            Some(Control::Reset(next_epoch)) => {
                epoch = next_epoch;
                idle = false;
                pending_error = base.before_first().err();
            }
            None => {}
        }
    }
    debug!("Prefetch thread exiting");
}

impl DataIter<DataBatch> for PrefetcherIter {
    fn init(&mut self, kwargs: &[KwArg]) -> Result<()> {
        ensure!(
            self.base.is_some(),
            DataError::already_initialized("PrefetcherIter")
        );
        let mut params = Params::new("PrefetcherIter", kwargs);
        let buffer = params
            .take::<usize>("prefetch_buffer")?
            .unwrap_or(DEFAULT_PREFETCH_BUFFER);
        ensure!(
            buffer > 0,
            DataError::config("PrefetcherIter", "prefetch_buffer must be positive")
        );

        let Some(mut base) = self.base.take() else {
            return Err(DataError::already_initialized("PrefetcherIter").into());
        };
        if let Err(e) = base.init(&params.rest()) {
            self.base = Some(base);
            return Err(e);
        }
        self.names = base.data_names().to_vec();
        self.len_hint = base.len_hint();

        let (out_tx, out_rx) = bounded(buffer);
        let (ctrl_tx, ctrl_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("data-prefetch".to_string())
            .spawn(move || producer_loop(base, out_tx, ctrl_rx))
            .context("Failed to spawn prefetch thread")?;
        debug!(prefetch_buffer = buffer, "Prefetch thread started");

        self.worker = Some(handle);
        self.ctrl_tx = Some(ctrl_tx);
        self.out_rx = Some(out_rx);
        self.epoch = 0;
        self.started = false;
        self.rewound = false;
        Ok(())
    }

    fn before_first(&mut self) -> Result<()> {
        let (ctrl_tx, _) = self.channels()?;
        self.current = None;
        if self.rewound {
            return Ok(());
        }
        let next_epoch = self.epoch + 1;
        ctrl_tx
            .send(Control::Reset(next_epoch))
            .map_err(|_| DataError::source("PrefetcherIter", "prefetch thread has exited"))?;
        self.epoch = next_epoch;
        self.started = true;
        self.rewound = true;
        self.exhausted = false;
        debug!(epoch = next_epoch, "PrefetcherIter reset");
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let (ctrl_tx, out_rx) = self.channels()?;
        self.current = None;
        self.rewound = false;
        if self.exhausted {
            return Ok(false);
        }
        if !self.started {
            // First pass without an explicit rewind.
            ctrl_tx
                .send(Control::Start(self.epoch))
                .map_err(|_| DataError::source("PrefetcherIter", "prefetch thread has exited"))?;
            self.started = true;
        }
        loop {
            let message = out_rx
                .recv()
                .map_err(|_| DataError::source("PrefetcherIter", "prefetch thread has exited"))?;
            match message {
                Produced::Batch { epoch, batch } if epoch == self.epoch => {
                    self.current = Some(batch);
                    return Ok(true);
                }
                Produced::End { epoch } if epoch == self.epoch => {
                    self.exhausted = true;
                    return Ok(false);
                }
                Produced::Failed { epoch, error } if epoch == self.epoch => {
                    self.exhausted = true;
                    return Err(error.context("Prefetched iterator failed"));
                }
                // Left over from a pass the consumer already abandoned.
                _ => continue,
            }
        }
    }

    fn value(&self) -> Result<&DataBatch> {
        self.channels()?;
        self.current
            .as_ref()
            .ok_or_else(|| DataError::no_current_value("PrefetcherIter").into())
    }

    fn len_hint(&self) -> i64 {
        self.len_hint
    }

    fn data_names(&self) -> &[String] {
        match &self.base {
            Some(base) => base.data_names(),
            None => &self.names,
        }
    }

    fn set_data_name(&mut self, name: &str) {
        match &mut self.base {
            Some(base) => base.set_data_name(name),
            None => self.names.push(name.to_string()),
        }
    }
}

impl Drop for PrefetcherIter {
    fn drop(&mut self) {
        // Disconnecting both channels wakes the producer wherever it blocks.
        self.ctrl_tx.take();
        self.out_rx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Prefetch thread panicked");
            }
        }
    }
}
