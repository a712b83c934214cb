//! The async read coordinator (component B): issues non-blocking reads
//! against the file layer, holds a bounded request table, and surfaces
//! completions through a ticket.
//!
//! The coordinator never blocks on submission: a full request table returns
//! [`Error::AsyncQueueFull`] immediately, and the submitter (the load state
//! machine's `pump` step) is expected to retry on the next `sync`/`wait`
//! call. Internally, a small pool of reader threads drains a bounded
//! `crossbeam_channel` of jobs and deposits completions into a shared
//! table; `poll`/`wait` only ever touch that table, never the channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError, bounded};

use crate::error::{Error, Result};
use crate::file::{FileLayer, FileRef};

/// A handle to a single submitted read, used to poll or wait for its
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// The outcome of a completed read.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The read completed, delivering `bytes_read` bytes into the caller's
    /// buffer (already written by the worker thread). `bytes_read` may be
    /// less than the number requested; a short read is a failure at this
    /// layer, the caller decides whether to retry or fail the load.
    Done { bytes_read: usize },
    /// The underlying file layer reported an error.
    Error(String),
    /// The ticket was cancelled before its read started.
    Cancelled,
}

enum SlotState {
    Pending,
    Done(Completion),
}

struct Job {
    ticket: Ticket,
    file: FileRef,
    offset: u64,
    length: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

struct Shared {
    table: Mutex<HashMap<u64, SlotState>>,
    condvar: Condvar,
    cancelled: Mutex<std::collections::HashSet<u64>>,
}

/// Bounded, thread-backed async read coordinator.
///
/// Cloning an `AsyncReadCoordinator` is cheap and shares the same worker
/// pool and completion table; this lets every [`crate::manager::ResourceManager`]
/// submit against one process-wide coordinator, or each manager can own its
/// own instance.
#[derive(Clone)]
pub struct AsyncReadCoordinator {
    sender: Sender<Job>,
    shared: Arc<Shared>,
    next_ticket: Arc<AtomicU64>,
    capacity: usize,
}

impl AsyncReadCoordinator {
    /// Creates a coordinator with `worker_count` reader threads and a
    /// request table bounded to `capacity` in-flight reads.
    pub fn new(file_layer: Arc<dyn FileLayer>, worker_count: usize, capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded::<Job>(capacity);
        let shared = Arc::new(Shared {
            table: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
            cancelled: Mutex::new(std::collections::HashSet::new()),
        });

        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let file_layer = Arc::clone(&file_layer);
            std::thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let was_cancelled = {
                        let mut cancelled = shared.cancelled.lock().expect("poisoned");
                        cancelled.remove(&job.ticket.0)
                    };
                    let completion = if was_cancelled {
                        Completion::Cancelled
                    } else {
                        let mut buf = job.buffer.lock().expect("poisoned");
                        buf.resize(job.length, 0);
                        match file_layer.read_at(&job.file, job.offset, &mut buf) {
                            Ok(bytes_read) => {
                                buf.truncate(bytes_read);
                                Completion::Done { bytes_read }
                            }
                            Err(e) => Completion::Error(e.to_string()),
                        }
                    };
                    let mut table = shared.table.lock().expect("poisoned");
                    table.insert(job.ticket.0, SlotState::Done(completion));
                    shared.condvar.notify_all();
                }
            });
        }

        AsyncReadCoordinator {
            sender,
            shared,
            next_ticket: Arc::new(AtomicU64::new(1)),
            capacity,
        }
    }

    /// Maximum number of in-flight reads before submission starts failing
    /// with [`Error::AsyncQueueFull`].
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Submits a non-blocking read of `length` bytes at `offset` from
    /// `file`, returning a [`Ticket`]. `buffer` receives the bytes on
    /// completion; callers read it back out via the ticket's
    /// [`Completion`].
    ///
    /// Returns [`Error::AsyncQueueFull`] immediately if the request table is
    /// full; this never blocks.
    pub fn submit_read(
        &self,
        file: FileRef,
        offset: u64,
        length: usize,
        buffer: Arc<Mutex<Vec<u8>>>,
    ) -> Result<Ticket> {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let ticket = Ticket(id);
        {
            let mut table = self.shared.table.lock().expect("poisoned");
            table.insert(id, SlotState::Pending);
        }
        let job = Job {
            ticket,
            file,
            offset,
            length,
            buffer,
        };
        match self.sender.try_send(job) {
            Ok(()) => Ok(ticket),
            Err(TrySendError::Full(_)) => {
                self.shared.table.lock().expect("poisoned").remove(&id);
                Err(Error::AsyncQueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared.table.lock().expect("poisoned").remove(&id);
                Err(Error::IoError(std::io::Error::other(
                    "async read coordinator workers have shut down",
                )))
            }
        }
    }

    /// Non-blocking poll: returns `None` if the read has not yet completed.
    pub fn poll(&self, ticket: Ticket) -> Option<Completion> {
        let mut table = self.shared.table.lock().expect("poisoned");
        match table.get(&ticket.0) {
            Some(SlotState::Done(_)) => match table.remove(&ticket.0) {
                Some(SlotState::Done(c)) => Some(c),
                _ => unreachable!(),
            },
            _ => None,
        }
    }

    /// Blocks the calling thread until `ticket` completes.
    pub fn wait(&self, ticket: Ticket) -> Completion {
        let mut table = self.shared.table.lock().expect("poisoned");
        loop {
            match table.get(&ticket.0) {
                Some(SlotState::Done(_)) => {
                    let c = table.remove(&ticket.0);
                    return match c {
                        Some(SlotState::Done(c)) => c,
                        _ => unreachable!(),
                    };
                }
                Some(SlotState::Pending) => {
                    let (guard, _timeout) = self
                        .shared
                        .condvar
                        .wait_timeout(table, Duration::from_millis(10))
                        .expect("poisoned");
                    table = guard;
                }
                None => {
                    // Already harvested, or cancelled before it was ever
                    // inserted; treat as cancelled rather than panicking.
                    return Completion::Cancelled;
                }
            }
        }
    }

    /// Cancels `ticket`. If the read has not yet started, it never runs and
    /// [`Self::poll`]/[`Self::wait`] observe [`Completion::Cancelled`]. If
    /// the read has already started, it may still run to completion, but
    /// its result is discarded and the caller observes
    /// [`Completion::Cancelled`] regardless.
    pub fn cancel(&self, ticket: Ticket) {
        let mut cancelled = self.shared.cancelled.lock().expect("poisoned");
        cancelled.insert(ticket.0);
        drop(cancelled);

        let mut table = self.shared.table.lock().expect("poisoned");
        if matches!(table.get(&ticket.0), Some(SlotState::Pending)) {
            table.insert(ticket.0, SlotState::Done(Completion::Cancelled));
            self.shared.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::StdFileLayer;
    use std::io::Write;

    fn fixture(contents: &[u8]) -> (tempfile::NamedTempFile, FileRef) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(contents).unwrap();
        tmp.flush().unwrap();
        let layer = StdFileLayer;
        let file_ref = layer.open(tmp.path().to_str().unwrap()).unwrap();
        (tmp, file_ref)
    }

    #[test]
    fn submit_and_wait_round_trips_bytes() {
        let (_tmp, file_ref) = fixture(b"hello");
        let coordinator = AsyncReadCoordinator::new(Arc::new(StdFileLayer), 2, 8);
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let ticket = coordinator
            .submit_read(file_ref, 0, 5, Arc::clone(&buffer))
            .unwrap();
        match coordinator.wait(ticket) {
            Completion::Done { bytes_read } => assert_eq!(bytes_read, 5),
            other => panic!("unexpected completion: {other:?}"),
        }
        assert_eq!(&*buffer.lock().unwrap(), b"hello");
    }

    #[test]
    fn queue_full_eventually_reports_async_queue_full_or_drains() {
        let (_tmp, file_ref) = fixture(b"x");
        let coordinator = AsyncReadCoordinator::new(Arc::new(StdFileLayer), 1, 1);
        let buf = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..64 {
            match coordinator.submit_read(file_ref.clone(), 0, 1, Arc::clone(&buf)) {
                Ok(t) => {
                    coordinator.wait(t);
                }
                Err(Error::AsyncQueueFull) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn cancel_before_start_prevents_read() {
        let (_tmp, file_ref) = fixture(b"hello");
        let coordinator = AsyncReadCoordinator::new(Arc::new(StdFileLayer), 0, 8);
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let ticket = coordinator
            .submit_read(file_ref, 0, 5, Arc::clone(&buffer))
            .unwrap();
        coordinator.cancel(ticket);
        match coordinator.wait(ticket) {
            Completion::Cancelled => {}
            other => panic!("expected cancelled, got {other:?}"),
        }
    }
}
