//! Worker pool used by the threaded loader.
//!
//! Workers pull tasks from one shared bounded queue and push results to one
//! bounded output queue. Bounded channels keep memory flat: a producer that
//! runs ahead blocks (or, with [`WorkerPool::try_submit`], gets its task back).

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Thread pool for parallel record fetching.
///
/// - Task channel: main thread -> workers
/// - Output channel: workers -> main thread
/// - Shutdown flag: set on drop so workers stop after their current task
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    output_rx: Option<Receiver<Output>>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn(worker_id, task_rx, output_tx, shutdown)`.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Either set num_workers > 0 or use single-threaded mode."
            ));
        }
        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let (task_tx, task_rx) = bounded(buffer_size);
        let (output_tx, output_rx) = bounded(buffer_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("dataloader-worker-{}", worker_id))
                .spawn(move || worker_fn_clone(worker_id, task_rx, output_tx, shutdown_clone))
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;
            workers.push(handle);
        }
        debug!(num_workers, buffer_size, "Worker pool started");

        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            output_rx: Some(output_rx),
            shutdown,
        })
    }

    /// Queues `task` without blocking; hands it back when the queue is full.
    pub(crate) fn try_submit(&self, task: Task) -> Result<Option<Task>> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("WorkerPool is shut down"))?;
        match task_tx.try_send(task) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(task)) => Ok(Some(task)),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("All worker threads have exited")),
        }
    }

    /// Blocks until a worker produces an output.
    pub(crate) fn recv(&self) -> Result<Output> {
        self.output_rx
            .as_ref()
            .ok_or_else(|| anyhow!("WorkerPool is shut down"))?
            .recv()
            .map_err(|_| anyhow!("All worker threads have exited"))
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Relaxed);

        // Drop the task sender to close the channel
        self.task_tx.take();

        // Disconnect the output queue so blocked sends fail
        self.output_rx.take();

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                warn!(thread = %name, "Worker thread panicked");
            }
        }
    }
}
