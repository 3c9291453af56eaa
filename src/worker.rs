//! Bounded pool for CPU-bound producer work.
//!
//! Parsing a year of daily bars or reshaping a large upstream payload should
//! not stall the request-handling tasks, so producers hand such work to
//! [`WorkerPool::run`]. At most `size` jobs run on the blocking thread pool at
//! once; the rest wait for a permit.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of concurrent off-loaded jobs.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on the blocking thread pool once a permit is free.
    ///
    /// # Errors
    /// `Error::WorkerError` if the pool was closed or the job panicked.
    pub async fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::WorkerError(format!("Failed to acquire worker permit: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::WorkerError(format!("Off-loaded job failed: {}", e)))
    }

    /// Stop handing out permits; queued and future jobs fail.
    pub fn close(&self) {
        self.permits.close();
    }
}
