//! Consumer wait strategy.
//!
//! The consumer parks here when it runs out of published events. The
//! production strategy is a hybrid: a short spin phase keeps bursty
//! workloads entirely lock-free, then a monitor (mutex + condvar) phase
//! parks the thread with a bounded periodic wake-up. Producer-side wakes
//! are batched so that heavy publish traffic touches the monitor at most
//! once per `wake_batch_size` events.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::disruptor::Sequence;

/// Strategy by which the consumer waits for new events.
///
/// The sequencer signals the strategy on publish and the barrier calls
/// [`wait_for`] from the consumer thread. Implementations must tolerate
/// spurious wake-ups; the barrier re-checks availability after every
/// return.
///
/// [`wait_for`]: WaitStrategy::wait_for
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until `cursor` reaches `sequence`, the batch threshold is met,
    /// or `cancelled` is set. Returns the last observed cursor value, which
    /// may be below `sequence` when cancelled.
    fn wait_for(&self, sequence: i64, cursor: &Sequence, cancelled: &AtomicBool) -> i64;

    /// The batch size below which the spin phase keeps waiting. Exposed to
    /// the barrier as its fast-path threshold.
    fn min_batch_size(&self) -> i64;

    /// Batched wake: called by producers after publishing `published_up_to`.
    fn signal_published(&self, published_up_to: i64);

    /// Unconditional wake of a blocked consumer.
    fn signal_all_when_blocking(&self);

    /// Shorten the idle wake-up and wake the consumer; called when the
    /// owning consumer is being cancelled so a parked thread returns
    /// promptly.
    fn signal_stopping(&self);
}

/// Iterations of the lock-free spin phase.
const MAX_SPINS: u32 = 35;

/// Idle wake-up applied once stopping has been signalled, in milliseconds.
const STOPPING_WAKEUP_MS: u64 = 15;

/// Hybrid spin-then-monitor wait strategy.
///
/// The spin phase waits for `spin_batch_size` events to accumulate so a
/// busy producer stream is consumed in large lock-free batches. The block
/// phase parks on the monitor and relies on three wake sources: batched
/// producer signals, the unconditional wake, and the `wakeup_ms` timer.
/// The timer guarantees liveness when producers publish without signalling
/// (all their wakes were batched away) and bounds shutdown latency.
#[derive(Debug)]
pub struct SpinBlockingWaitStrategy {
    spin_batch_size: i64,
    wake_batch_size: i64,
    /// Idle wake-up in ms; shortened by `signal_stopping`.
    wakeup_ms: AtomicU64,
    monitor: Mutex<()>,
    condvar: Condvar,
    /// Set while a consumer is parked in the block phase.
    is_waiting: AtomicBool,
    /// Sequence the parked consumer asked for; valid while `is_waiting`.
    requested: AtomicI64,
}

impl SpinBlockingWaitStrategy {
    /// Create a strategy with the given batching thresholds and idle
    /// wake-up interval.
    pub fn new(spin_batch_size: i64, wake_batch_size: i64, wakeup_ms: u64) -> Self {
        Self {
            spin_batch_size,
            wake_batch_size,
            wakeup_ms: AtomicU64::new(wakeup_ms),
            monitor: Mutex::new(()),
            condvar: Condvar::new(),
            is_waiting: AtomicBool::new(false),
            requested: AtomicI64::new(0),
        }
    }

    /// Clear `is_waiting` and broadcast on the monitor.
    ///
    /// Taking the monitor before the broadcast serializes the wake against
    /// a consumer that has armed `is_waiting` but not yet parked: the
    /// notify cannot fire inside that window.
    fn wake(&self) {
        if self
            .is_waiting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _guard = self.monitor.lock();
            self.condvar.notify_all();
        }
    }
}

impl Default for SpinBlockingWaitStrategy {
    fn default() -> Self {
        Self::new(32, 128, 25)
    }
}

impl WaitStrategy for SpinBlockingWaitStrategy {
    fn wait_for(&self, sequence: i64, cursor: &Sequence, cancelled: &AtomicBool) -> i64 {
        // Spin phase: wait lock-free for a batch to accumulate.
        for _ in 0..MAX_SPINS {
            if cancelled.load(Ordering::Acquire) {
                return cursor.get();
            }
            let available = cursor.get();
            if available - sequence >= self.spin_batch_size {
                return available;
            }
            std::hint::spin_loop();
        }

        // Block phase: park on the monitor until the requested sequence is
        // published, the idle timer fires, or cancellation breaks us out.
        let mut guard = self.monitor.lock();
        while cursor.get() < sequence && !cancelled.load(Ordering::Acquire) {
            self.requested.store(sequence, Ordering::Release);
            self.is_waiting.store(true, Ordering::Release);
            let timeout = Duration::from_millis(self.wakeup_ms.load(Ordering::Relaxed));
            self.condvar.wait_for(&mut guard, timeout);
        }
        self.is_waiting.store(false, Ordering::Release);
        drop(guard);

        cursor.get()
    }

    fn min_batch_size(&self) -> i64 {
        self.spin_batch_size
    }

    fn signal_published(&self, published_up_to: i64) {
        if self.is_waiting.load(Ordering::Acquire)
            && published_up_to >= self.requested.load(Ordering::Acquire) + self.wake_batch_size
        {
            self.wake();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.wake();
    }

    fn signal_stopping(&self) {
        self.wakeup_ms.store(STOPPING_WAKEUP_MS, Ordering::Relaxed);
        self.wake();
    }
}
