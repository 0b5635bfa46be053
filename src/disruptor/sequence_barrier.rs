//! Sequence barrier between the sequencer and the consumer.
//!
//! The barrier presents the sequencer's published frontier to the consumer
//! and carries the consumer's cancellation signal. It owns the fast path:
//! when a full batch is already published the consumer never touches the
//! wait strategy's monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disruptor::{Result, Sequence, Sequencer, SinkError, WaitStrategy};

/// Barrier used by the single consumer of a sequencer.
///
/// Not an ownership cycle: the coordinator owns the sequencer, the
/// sequencer builds barriers, and the barrier holds non-owning handles
/// (`Arc`) to the cursor, the wait strategy, and the sequencer's
/// availability view.
#[derive(Debug)]
pub struct ProcessingSequenceBarrier {
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    sequencer: Arc<dyn Sequencer>,
    /// One-shot cooperative cancellation for the current consumer run.
    cancelled: AtomicBool,
}

impl ProcessingSequenceBarrier {
    /// Create a barrier over the given cursor, wait strategy and sequencer.
    pub fn new(
        cursor: Arc<Sequence>,
        wait_strategy: Arc<dyn WaitStrategy>,
        sequencer: Arc<dyn Sequencer>,
    ) -> Self {
        Self {
            cursor,
            wait_strategy,
            sequencer,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Wait until `sequence` is consumable and return the highest
    /// contiguous published sequence from there.
    ///
    /// May return a value below `sequence` after a wake-up that found
    /// nothing consumable; the caller re-enters.
    ///
    /// # Errors
    /// Returns `SinkError::Cancelled` once [`cancel`] has been called.
    ///
    /// [`cancel`]: ProcessingSequenceBarrier::cancel
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_cancelled()?;

        // Fast path: a full batch is already published, skip the wait
        // strategy entirely.
        let available = self.cursor.get();
        if available - sequence >= self.wait_strategy.min_batch_size() {
            return Ok(self
                .sequencer
                .get_highest_published_sequence(sequence, available));
        }

        let available = self
            .wait_strategy
            .wait_for(sequence, &self.cursor, &self.cancelled);
        if available < sequence {
            return Ok(available);
        }

        // The cursor can run ahead of per-slot publication; make the slot
        // writes visible before scanning for the contiguous prefix.
        std::sync::atomic::fence(Ordering::Acquire);
        Ok(self
            .sequencer
            .get_highest_published_sequence(sequence, available))
    }

    /// The cursor this barrier tracks.
    pub fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    /// Whether the current run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the current consumer run and wake a parked consumer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wait_strategy.signal_stopping();
    }

    /// Arm the barrier for a fresh consumer run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SinkError::Cancelled)
        } else {
            Ok(())
        }
    }
}
