//! Reusable connection workers.
//!
//! # Responsibilities
//! - Bound the number of concurrently served connections (`max_workers`)
//! - Recycle worker objects and their I/O buffers across connection lifetimes
//!
//! # Design Decisions
//! - A worker is plain state (id + buffer); the task serving a connection
//!   borrows it through a [`WorkerGuard`] and hands it back on drop
//! - At most `size` idle workers are retained, extras are freed
//! - Connections are never pooled, only the workers serving them

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;

/// Default size of a worker's read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// The pool was closed; no more workers are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// A recyclable execution context for one connection at a time.
#[derive(Debug)]
pub struct Worker {
    id: u64,
    served: u64,
    buffer: Vec<u8>,
}

impl Worker {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of connections this worker has served, including the current one.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

/// Bounded pool of [`Worker`]s.
pub struct WorkerPool {
    idle: Mutex<Vec<Worker>>,
    limit: Arc<Semaphore>,
    size: usize,
    max_workers: usize,
    buffer_size: usize,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(size: usize, max_workers: usize, buffer_size: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            idle: Mutex::new(Vec::with_capacity(size)),
            limit: Arc::new(Semaphore::new(max_workers)),
            size,
            max_workers,
            buffer_size,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &PoolConfig, buffer_size: usize) -> Self {
        Self::new(config.size, config.max_workers, buffer_size)
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Worker>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a worker, waiting while `max_workers` are busy.
    pub async fn acquire(self: &Arc<Self>) -> Result<WorkerGuard, PoolClosed> {
        let permit = self
            .limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;

        let mut worker = match self.idle().pop() {
            Some(worker) => worker,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(worker = id, "Creating pool worker");
                Worker {
                    id,
                    served: 0,
                    buffer: vec![0; self.buffer_size.max(1)],
                }
            }
        };
        worker.served += 1;

        Ok(WorkerGuard {
            worker,
            pool: self.clone(),
            _permit: permit,
        })
    }

    fn release(&self, worker: Worker) {
        if self.is_closed() {
            return;
        }
        let mut idle = self.idle();
        if idle.len() < self.size {
            idle.push(worker);
        }
    }

    /// Stop handing out workers. Waiting `acquire` calls fail with [`PoolClosed`].
    pub fn close(&self) {
        self.limit.close();
        self.idle().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.limit.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Workers currently serving a connection.
    pub fn active_count(&self) -> usize {
        self.max_workers - self.limit.available_permits()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("max_workers", &self.max_workers)
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A borrowed worker, returned to the pool when dropped.
pub struct WorkerGuard {
    worker: Worker,
    pool: Arc<WorkerPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for WorkerGuard {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl std::ops::DerefMut for WorkerGuard {
    fn deref_mut(&mut self) -> &mut Worker {
        &mut self.worker
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let worker = std::mem::replace(
            &mut self.worker,
            Worker {
                id: 0,
                served: 0,
                buffer: Vec::new(),
            },
        );
        self.pool.release(worker);
    }
}

impl fmt::Debug for WorkerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerGuard").field("worker", &self.worker).finish()
    }
}
