//! Padded atomic sequence counter.
//!
//! Sequences track positions in the logical event stream: the producers'
//! cursor, the consumer's progress, and the gating cache are all instances
//! of this one type. The layout pads the counter to a full cache line so
//! that two sequences updated by different threads never share a line.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::disruptor::INITIAL_CURSOR_VALUE;

/// Cache line size assumed for padding.
const CACHE_LINE_SIZE: usize = 64;

/// A 64-bit monotonic sequence counter that prevents false sharing.
///
/// The alignment attribute places the counter at the start of its own cache
/// line and the trailing padding fills the rest of it, so neighbouring
/// allocations cannot land on the same line.
#[repr(align(64))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
}

impl Sequence {
    /// Create a new sequence with the given initial value.
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: AtomicI64::new(initial_value),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
        }
    }

    /// Get the current value (acquire).
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the value (release).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Set the value with sequentially-consistent semantics.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Compare-and-set; returns true when the swap happened.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically increment and return the new value.
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Atomically add `increment` and return the new value.
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}
