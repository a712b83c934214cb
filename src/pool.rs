//! The bounded background-decompression worker pool (component C, second
//! half): runs [`crate::codec::Decompressor`] jobs on a fixed number of
//! worker threads when background decompression is enabled, falling back
//! to inline decompression in the caller when the pool is saturated.
//!
//! Grounded on the decoder pool's auto-sizing and stats-tracking shape, but
//! generalized from a single-thread LRU decoder cache into a true bounded
//! multi-threaded worker pool with a cancellable job queue, since the
//! decompression jobs here are one-shot CPU work items rather than reusable
//! cached decoder state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Sender, TrySendError, bounded};

use crate::error::{Error, Result};

/// Observability counters for the worker pool, mirroring the hit/miss style
/// counters kept by the decoder cache this pool is modeled on.
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    fallen_back_to_inline: AtomicU64,
}

impl PoolStats {
    /// Jobs submitted to the pool (not counting fallbacks).
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
    /// Jobs the pool finished.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
    /// Jobs that fell back to inline decompression because every worker was
    /// busy.
    pub fn fallen_back_to_inline(&self) -> u64 {
        self.fallen_back_to_inline.load(Ordering::Relaxed)
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// A bounded pool of decompression worker threads.
///
/// `pool_size` workers are spawned at construction. Submitting a job when
/// every worker is already busy does not block or queue indefinitely: the
/// pool's internal channel has capacity equal to `pool_size`, so a burst of
/// more than `2 * pool_size` concurrent jobs will see [`Pool::try_submit`]
/// return `Err` for the overflow, and the caller is expected to run the
/// work inline instead (§4.3 pool policy).
pub struct Pool {
    sender: Option<Sender<Job>>,
    workers: Vec<std::thread::JoinHandle<()>>,
    pool_size: usize,
    stats: Arc<PoolStats>,
}

impl Pool {
    /// Builds a pool with `pool_size` worker threads. `pool_size == 0`
    /// builds a pool that always reports itself as saturated, so every
    /// submission falls back to inline decompression, matching "background
    /// decompression disabled".
    pub fn new(pool_size: usize) -> Self {
        let stats = Arc::new(PoolStats::default());
        if pool_size == 0 {
            return Pool {
                sender: None,
                workers: Vec::new(),
                pool_size: 0,
                stats,
            };
        }

        let (sender, receiver) = bounded::<Job>(pool_size);
        let workers = (0..pool_size)
            .map(|_| {
                let receiver = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
            })
            .collect();

        Pool {
            sender: Some(sender),
            workers,
            pool_size,
            stats,
        }
    }

    /// Number of worker threads. `0` means background decompression is
    /// disabled.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pool-wide observability counters.
    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Runs `job` on the pool if a worker slot is free, otherwise runs it
    /// synchronously on the calling thread. This is the primitive the load
    /// state machine actually uses; it never loses work the way a raw
    /// [`Self::try_submit`] could if the caller discarded the returned job.
    pub fn submit_or_inline(&self, job: impl FnOnce() + Send + 'static) {
        match &self.sender {
            None => {
                self.stats
                    .fallen_back_to_inline
                    .fetch_add(1, Ordering::Relaxed);
                job();
            }
            Some(sender) => {
                let stats = Arc::clone(&self.stats);
                let wrapped: Job = Box::new(move || {
                    job();
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                });
                match sender.try_send(wrapped) {
                    Ok(()) => {
                        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(wrapped)) => {
                        self.stats
                            .fallen_back_to_inline
                            .fetch_add(1, Ordering::Relaxed);
                        wrapped();
                    }
                    Err(TrySendError::Disconnected(wrapped)) => {
                        self.stats
                            .fallen_back_to_inline
                            .fetch_add(1, Ordering::Relaxed);
                        wrapped();
                    }
                }
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Holds the currently active pool plus the parameters it was built from,
/// so [`Manager::set_background_params`](crate::manager::ResourceManager::set_background_params)
/// can decide whether a rebuild is needed.
pub struct ManagedPool {
    pool: Mutex<Arc<Pool>>,
    chunk_size: Mutex<usize>,
    read_ahead: Mutex<usize>,
}

impl ManagedPool {
    /// Builds a managed pool from initial parameters.
    pub fn new(pool_size: usize, chunk_size: usize, read_ahead: usize) -> Self {
        ManagedPool {
            pool: Mutex::new(Arc::new(Pool::new(pool_size))),
            chunk_size: Mutex::new(chunk_size.max(1)),
            read_ahead: Mutex::new(read_ahead.max(1)),
        }
    }

    /// The currently active pool.
    pub fn current(&self) -> Arc<Pool> {
        Arc::clone(&self.pool.lock().expect("poisoned"))
    }

    /// Reconfigures chunk size, read-ahead, and (iff it differs from the
    /// current pool's size) rebuilds the worker pool. Existing jobs in a
    /// pool being replaced are allowed to drain naturally (the old `Arc<Pool>`
    /// stays alive until every in-flight job's clone of it is dropped).
    pub fn reconfigure(&self, pool_size: usize, chunk_size: usize, read_ahead: usize) {
        *self.chunk_size.lock().expect("poisoned") = chunk_size.max(1);
        *self.read_ahead.lock().expect("poisoned") = read_ahead.max(1);

        let mut pool = self.pool.lock().expect("poisoned");
        if pool.pool_size() != pool_size {
            *pool = Arc::new(Pool::new(pool_size));
        }
    }

    /// Current chunk size.
    pub fn chunk_size(&self) -> usize {
        *self.chunk_size.lock().expect("poisoned")
    }

    /// Current read-ahead depth.
    pub fn read_ahead(&self) -> usize {
        *self.read_ahead.lock().expect("poisoned")
    }
}

/// Convenience constructor matching the error type used elsewhere in the
/// crate, for pool-init failures (which must never fail the caller's load).
pub fn init_failure(reason: impl std::fmt::Display) -> Error {
    Error::DecompressionError(format!("pool init failed, falling back to inline: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn disabled_pool_always_falls_back() {
        let pool = Pool::new(0);
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        pool.submit_or_inline(move || {
            flag2.store(1, Ordering::SeqCst);
        });
        assert_eq!(flag.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().fallen_back_to_inline(), 1);
    }

    #[test]
    fn enabled_pool_runs_job() {
        let pool = Pool::new(2);
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        pool.submit_or_inline(move || {
            flag2.store(1, Ordering::SeqCst);
        });
        // Give the worker thread a moment to run.
        for _ in 0..100 {
            if flag.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn managed_pool_rebuilds_only_on_size_change() {
        let managed = ManagedPool::new(2, 8, 1);
        let first = managed.current();
        managed.reconfigure(2, 16, 2);
        let second = managed.current();
        assert!(Arc::ptr_eq(&first, &second));
        managed.reconfigure(4, 16, 2);
        let third = managed.current();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(managed.chunk_size(), 16);
        assert_eq!(managed.read_ahead(), 2);
    }
}
