//! Bounded worker pool for inbound messages.
//!
//! Transport threads must never block on message processing, so handlers
//! enqueue jobs with `try_send`; a full queue rejects the message.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, info};

use crate::error::{ExecutionError, RepositoryError, RepositoryResult};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads fed by a bounded queue.
pub struct WorkerPool {
    name: String,
    tx: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
    rejected: AtomicU64,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("queue_capacity", &self.queue_capacity)
            .field("rejected", &self.rejected())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns the workers.
    pub fn start(name: &str, config: &WorkerPoolConfig) -> RepositoryResult<Self> {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let thread_name = format!("discovery-{name}-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker = %thread_name, "job panicked");
                        }
                    }
                })
                .map_err(|e| RepositoryError::internal(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        info!(pool = name, workers, queue_capacity, "worker pool started");
        Ok(Self {
            name: name.to_string(),
            tx: RwLock::new(Some(tx)),
            workers: Mutex::new(handles),
            queue_capacity,
            rejected: AtomicU64::new(0),
        })
    }

    /// Enqueues a job without blocking.
    pub fn try_submit<F>(&self, job: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let disconnected = || ExecutionError::Disconnected {
            path: self.name.clone(),
        };
        let tx = self.tx.read().map_err(|_| disconnected())?;
        let Some(tx) = tx.as_ref() else {
            return Err(disconnected());
        };

        match tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ExecutionError::QueueFull {
                    queue: self.name.clone(),
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    /// Number of jobs rejected because the queue was full.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Closes the queue, lets workers drain queued jobs and joins them.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.write() {
            tx.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}
