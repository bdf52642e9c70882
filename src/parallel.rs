//! Worker pool configuration for batch exports
//!
//! Multi-year exports run on a private Rayon pool sized from the machine's
//! parallelism, leaving one core for the caller. The pool lives only as long
//! as one batch run; nothing here touches the global Rayon pool.

use crate::errors::{ExportError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Configuration for the batch worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    pub num_threads: usize,
}

impl ParallelConfig {
    /// Pool of `min(available parallelism - 1, max_workers)` threads, at least one
    #[must_use]
    pub fn for_batch(max_workers: usize) -> Self {
        Self {
            num_threads: batch_worker_count(available_parallelism(), max_workers),
        }
    }

    /// Create a configuration that uses a specific number of threads
    #[must_use]
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Build a private thread pool
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::ThreadPoolError`] if the pool cannot be created.
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("climate-export-{i}"))
            .build()
            .map_err(|e| {
                ExportError::ThreadPoolError(format!(
                    "Failed to initialize thread pool with {} threads: {}",
                    self.num_threads, e
                ))
            })?;
        debug!(threads = self.num_threads, "Created batch worker pool");
        Ok(pool)
    }
}

/// Worker count for a batch: one core is left free, capped by `max_workers`
#[must_use]
pub fn batch_worker_count(available: usize, max_workers: usize) -> usize {
    available.saturating_sub(1).min(max_workers).max(1)
}

/// Parallelism reported by the OS, falling back to the CPU count
#[must_use]
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or_else(|_| num_cpus::get())
}
