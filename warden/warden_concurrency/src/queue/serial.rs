//! Single-worker serial queue.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, error, trace};

/// Error when submitting work to a serial queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been shut down
    #[error("queue '{0}' is shut down")]
    ShutDown(String),

    /// The submitted closure panicked before producing a value
    #[error("task on queue '{0}' panicked")]
    TaskPanicked(String),

    /// The worker thread could not be started
    #[error("failed to spawn worker for queue '{0}': {1}")]
    SpawnFailed(String, String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Counters {
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

/// A queue that runs closures one at a time on a dedicated thread.
///
/// # Examples
///
/// ```
/// use warden_concurrency::SerialQueue;
/// use std::sync::{Arc, Mutex};
///
/// let queue = SerialQueue::new("example").unwrap();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for i in 0..3 {
///     let log = Arc::clone(&log);
///     queue.dispatch(move || log.lock().unwrap().push(i)).unwrap();
/// }
///
/// // `sync` runs after everything dispatched before it.
/// let seen = {
///     let log = Arc::clone(&log);
///     queue.sync(move || log.lock().unwrap().clone()).unwrap()
/// };
/// assert_eq!(seen, vec![0, 1, 2]);
/// ```
pub struct SerialQueue {
    label: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    counters: Arc<Counters>,
}

impl SerialQueue {
    /// Create a queue and start its worker thread.
    ///
    /// # Arguments
    ///
    /// * `label` - Used to name the worker thread and in log output.
    pub fn new(label: impl Into<String>) -> Result<Self, QueueError> {
        let label = label.into();
        let (sender, receiver) = unbounded::<Job>();
        let counters = Arc::new(Counters {
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
        });

        let worker_label = label.clone();
        let worker_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name(format!("warden-queue-{}", label))
            .spawn(move || Self::worker_loop(&worker_label, receiver, &worker_counters))
            .map_err(|e| QueueError::SpawnFailed(label.clone(), e.to_string()))?;

        debug!(queue = %label, "Serial queue started");

        Ok(Self {
            label,
            worker_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            counters,
        })
    }

    fn worker_loop(label: &str, receiver: Receiver<Job>, counters: &Counters) {
        for job in receiver.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            match result {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(
                        queue = %label,
                        "Task panicked: {:?}",
                        e.downcast_ref::<&str>().unwrap_or(&"<unknown panic>")
                    );
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        trace!(queue = %label, "Serial queue drained");
    }

    /// The queue label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Submit a closure without waiting for it.
    pub fn dispatch<F>(&self, f: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| QueueError::ShutDown(self.label.clone()))?;
        sender
            .send(Box::new(f))
            .map_err(|_| QueueError::ShutDown(self.label.clone()))
    }

    /// Run a closure on the queue and wait for its result.
    ///
    /// Called from the worker thread itself, the closure runs inline so
    /// that nested `sync` calls do not deadlock.
    pub fn sync<F, R>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (tx, rx) = bounded(1);
        self.dispatch(move || {
            let _ = tx.send(f());
        })?;
        rx.recv()
            .map_err(|_| QueueError::TaskPanicked(self.label.clone()))
    }

    /// Number of closures that ran to completion.
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Number of closures that panicked.
    pub fn panicked(&self) -> usize {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    /// Stop accepting work, let queued work finish, and join the worker.
    ///
    /// When called from the worker thread the join is skipped; the worker
    /// exits once the current closure returns.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(queue = %self.label, "Worker thread terminated abnormally");
            }
        }
        debug!(queue = %self.label, "Serial queue shut down");
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Detach: queued work still runs, but dropping never blocks.
        drop(self.sender.lock().take());
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .field("completed", &self.completed())
            .finish()
    }
}
