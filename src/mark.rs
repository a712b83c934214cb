//! The mark/sync primitive (component F): a monotonic per-manager fence
//! counter used to synchronize against outstanding asynchronous loads.
//!
//! A [`Mark`] is never zero; [`MarkState::sync`]/[`MarkState::wait`] treat
//! `mark == 0` (or any mark on an otherwise-invalid manager, which callers
//! enforce above this module) as trivially satisfied per §4.6.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};

/// A fence value issued by a resource manager. Marks start at 1; 0 is never
/// a valid mark and is reserved for "no mark"/"always satisfied".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mark(u32);

impl Mark {
    /// The underlying counter value.
    pub fn value(self) -> u32 {
        self.0
    }

    fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Constructs a `Mark` directly from a raw value, for use by other
    /// modules' tests that need a `Mark` without driving a full
    /// `MarkState`. Not exposed outside the crate: real marks only ever
    /// come from [`MarkState::next`].
    #[cfg(test)]
    pub(crate) fn for_test(value: u32) -> Mark {
        Mark(value)
    }

    /// Constructs a `Mark` from a raw value already known to have been
    /// issued by this manager's [`MarkState`], for use by the pump loop when
    /// completing a load it tracks only by its raw mark value.
    pub(crate) fn from_raw(value: u32) -> Mark {
        Mark(value)
    }
}

/// Per-manager mark counter plus the set of marks with a load still
/// outstanding.
///
/// Marks wrap at 2³¹ − 1: the next call to [`MarkState::next`] after
/// reaching that value resets the counter to 1. Per §4.6, wraparound
/// assumes outstanding loads from before the reset have been drained; this
/// crate does not enforce that (it would require cooperation from the load
/// state machine that owns those marks), but exposes
/// [`MarkState::force_wrap_to`] as a test hook to exercise the boundary
/// deterministically, matching the source's own test hook.
pub struct MarkState {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

struct Inner {
    counter: u32,
    outstanding: BTreeSet<u32>,
}

const WRAP_LIMIT: u32 = (1u32 << 31) - 1;

impl Default for MarkState {
    fn default() -> Self {
        MarkState {
            inner: Mutex::new(Inner {
                counter: 0,
                outstanding: BTreeSet::new(),
            }),
            condvar: Condvar::new(),
        }
    }
}

impl MarkState {
    /// Creates a fresh mark state, counter starting such that the first
    /// call to [`Self::next`] returns mark 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next mark, marking it outstanding until
    /// [`Self::complete`] is called for it.
    pub fn next(&self) -> Mark {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.counter = if inner.counter >= WRAP_LIMIT {
            1
        } else {
            inner.counter + 1
        };
        inner.outstanding.insert(inner.counter);
        Mark(inner.counter)
    }

    /// Marks `mark` as having reached a terminal state (Ready, Failed, or
    /// Cancelled), waking any thread blocked in [`Self::wait`].
    pub fn complete(&self, mark: Mark) {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.outstanding.remove(&mark.0);
        drop(inner);
        self.condvar.notify_all();
    }

    /// Returns true iff every mark ≤ `mark` has completed. A zero mark
    /// always returns true immediately, never blocking, per §4.6.
    pub fn sync(&self, mark: Mark) -> bool {
        if mark.is_zero() {
            return true;
        }
        let inner = self.inner.lock().expect("poisoned");
        !inner.outstanding.iter().any(|&m| m <= mark.0)
    }

    /// Blocks (cooperatively) until [`Self::sync`] would return true for
    /// `mark`. A zero mark returns immediately without blocking.
    pub fn wait(&self, mark: Mark) {
        if mark.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().expect("poisoned");
        while inner.outstanding.iter().any(|&m| m <= mark.0) {
            inner = self
                .condvar
                .wait_timeout(inner, std::time::Duration::from_millis(10))
                .expect("poisoned")
                .0;
        }
    }

    /// Test hook: forces the internal counter to `value`, so the next
    /// [`Self::next`] call returns `value + 1` (or wraps if `value` is at
    /// the wrap limit). Used to exercise wraparound deterministically.
    #[cfg(any(test, feature = "test-util"))]
    pub fn force_wrap_to(&self, value: u32) {
        let mut inner = self.inner.lock().expect("poisoned");
        inner.counter = value;
    }
}
