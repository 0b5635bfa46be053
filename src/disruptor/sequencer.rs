//! Multi-producer sequencer.
//!
//! The sequencer hands out sequence numbers to producers, enforces the wrap
//! point against the consumer, tracks per-slot publication, and answers the
//! consumer's question of how far the published prefix reaches. The cursor
//! may run ahead of per-slot publication under concurrent producers, so the
//! consumer always re-scans through [`get_highest_published_sequence`].
//!
//! [`get_highest_published_sequence`]: Sequencer::get_highest_published_sequence

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::counters::SinkCounters;
use crate::disruptor::{
    is_power_of_two, ProcessingSequenceBarrier, Result, Sequence, SinkError, WaitStrategy,
    INITIAL_CURSOR_VALUE,
};

/// The sequencer surface consumed by the barrier.
///
/// Claiming and publishing stay on the concrete type; the barrier only
/// needs to locate the published frontier.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The producers' cursor: highest sequence ever claimed.
    fn cursor(&self) -> Arc<Sequence>;

    /// Number of slots in the ring.
    fn buffer_size(&self) -> usize;

    /// Whether `sequence` has been published for its current generation.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `next_sequence..=available_sequence` such that
    /// every sequence up to it is published. Returns
    /// `next_sequence - 1` when the first slot of the range is still
    /// pending.
    fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;
}

/// Sequencer supporting any number of concurrent producer threads.
///
/// Publication is tracked per slot in `available_buffer`: the entry for
/// sequence `s` holds `s >> index_shift` once `s` is published, which
/// distinguishes generations across wraps (entries start at `-1` so nothing
/// is considered published for generation zero).
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    index_mask: i64,
    index_shift: u32,
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    /// Sequences that gate producers; in this crate always exactly the one
    /// consumer sequence, registered after the processor is built.
    gating_sequences: parking_lot::RwLock<Vec<Arc<Sequence>>>,
    /// Last observed minimum gating sequence. Non-authoritative: it elides
    /// the acquire load on the consumer sequence unless the wrap point
    /// might be reached.
    gating_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
    counters: Arc<SinkCounters>,
}

impl MultiProducerSequencer {
    /// Create a sequencer over a ring of `buffer_size` slots.
    ///
    /// # Panics
    /// Panics if `buffer_size` is not a power of two; the configuration
    /// layer has validated it by the time a sequencer is built.
    pub fn new(
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        counters: Arc<SinkCounters>,
    ) -> Self {
        assert!(
            is_power_of_two(buffer_size),
            "buffer size must be a power of 2"
        );

        let available_buffer: Box<[AtomicI32]> =
            (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();

        Self {
            buffer_size,
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
            cursor: Arc::new(Sequence::new(INITIAL_CURSOR_VALUE)),
            wait_strategy,
            gating_sequences: parking_lot::RwLock::new(Vec::new()),
            gating_cache: Sequence::new(INITIAL_CURSOR_VALUE),
            available_buffer,
            counters,
        }
    }

    /// Register a sequence producers must not overtake.
    pub fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.gating_sequences.write().push(sequence);
    }

    /// Authoritative minimum over the gating sequences; the cursor when
    /// none are registered yet.
    fn minimum_gating_sequence(&self) -> i64 {
        self.gating_sequences
            .read()
            .iter()
            .map(|sequence| sequence.get())
            .min()
            .unwrap_or_else(|| self.cursor.get())
    }

    /// Claim the next sequence, waiting at the wrap point if the consumer
    /// is behind.
    ///
    /// The cursor is advanced with a fetch-add before the wrap check, so a
    /// claim always completes; a producer that outruns the consumer spins
    /// on the gating sequence until the claimed slot is free. Entering the
    /// wait bumps `buffer_unavailable` and wakes a parked consumer so it
    /// starts draining.
    pub fn next(&self) -> i64 {
        let next = self.cursor.increment_and_get();
        let wrap_point = next - self.buffer_size as i64;
        let cached = self.gating_cache.get();

        if wrap_point > cached || cached >= next {
            let mut gating = self.minimum_gating_sequence();
            self.gating_cache.set(gating);

            if wrap_point > gating {
                self.counters.buffer_unavailable.increment();
                self.wait_strategy.signal_all_when_blocking();
                while wrap_point > gating {
                    std::thread::yield_now();
                    gating = self.minimum_gating_sequence();
                }
                self.gating_cache.set(gating);
            }
        }

        next
    }

    /// Claim the next sequence without blocking.
    ///
    /// Uses a CAS loop so a failed claim never advances the cursor: there
    /// is no stranded sequence to recycle on the full-buffer path.
    ///
    /// # Errors
    /// Returns `SinkError::BufferFull` when the claim would overtake the
    /// consumer.
    pub fn try_next(&self) -> Result<i64> {
        loop {
            let current = self.cursor.get();
            if !self.has_available_capacity(1, current) {
                return Err(SinkError::BufferFull);
            }
            let next = current + 1;
            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    /// Whether `required` slots can be claimed on top of `current`.
    ///
    /// Checks the gating cache first and returns false only after
    /// reconfirming against the authoritative consumer sequence.
    fn has_available_capacity(&self, required: i64, current: i64) -> bool {
        let next = current + required;
        let wrap_point = next - self.buffer_size as i64;
        let cached = self.gating_cache.get();

        if wrap_point > cached || cached >= next {
            let gating = self.minimum_gating_sequence();
            self.gating_cache.set(gating);
            if wrap_point > gating {
                return false;
            }
        }

        true
    }

    /// Mark `sequence` published and signal the wait strategy.
    pub fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_published(sequence);
    }

    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    fn set_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].store(flag, Ordering::Release);
    }

    /// Free slots remaining between the claimed frontier and the consumer.
    pub fn remaining_capacity(&self) -> i64 {
        let consumed = self.minimum_gating_sequence();
        let produced = self.cursor.get();
        self.buffer_size as i64 - (produced - consumed)
    }

    /// Build a barrier bound to this sequencer, its wait strategy, and the
    /// cursor.
    pub fn new_barrier(self: Arc<Self>) -> ProcessingSequenceBarrier {
        ProcessingSequenceBarrier::new(
            Arc::clone(&self.cursor),
            Arc::clone(&self.wait_strategy),
            self as Arc<dyn Sequencer>,
        )
    }
}

impl Sequencer for MultiProducerSequencer {
    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].load(Ordering::Acquire) == flag
    }

    fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        let mut sequence = next_sequence;
        while sequence <= available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::SpinBlockingWaitStrategy;
    use std::thread;
    use std::time::Duration;

    fn sequencer(buffer_size: usize) -> Arc<MultiProducerSequencer> {
        Arc::new(MultiProducerSequencer::new(
            buffer_size,
            Arc::new(SpinBlockingWaitStrategy::default()),
            Arc::new(SinkCounters::new()),
        ))
    }

    #[test]
    fn test_sequencer_creation() {
        let sequencer = sequencer(1024);
        assert_eq!(sequencer.buffer_size(), 1024);
        assert_eq!(sequencer.cursor().get(), INITIAL_CURSOR_VALUE);
        assert_eq!(sequencer.available_buffer.len(), 1024);
    }

    #[test]
    fn test_claims_are_monotonic() {
        let sequencer = sequencer(512);
        assert_eq!(sequencer.next(), 0);
        assert_eq!(sequencer.next(), 1);
        assert_eq!(sequencer.try_next().unwrap(), 2);
    }

    #[test]
    fn test_publish_makes_sequence_available() {
        let sequencer = sequencer(512);
        let seq = sequencer.next();

        assert!(!sequencer.is_available(seq));
        sequencer.publish(seq);
        assert!(sequencer.is_available(seq));

        // The next generation of the same slot is not available yet.
        assert!(!sequencer.is_available(seq + 512));
    }

    #[test]
    fn test_try_next_fails_when_full() {
        let sequencer = sequencer(512);
        let consumer = Arc::new(Sequence::default());
        sequencer.add_gating_sequence(Arc::clone(&consumer));

        for _ in 0..512 {
            let seq = sequencer.try_next().unwrap();
            sequencer.publish(seq);
        }
        assert!(matches!(
            sequencer.try_next().unwrap_err(),
            SinkError::BufferFull
        ));
        assert_eq!(sequencer.remaining_capacity(), 0);

        // Consumer progress frees capacity again.
        consumer.set(9);
        let seq = sequencer.try_next().unwrap();
        assert_eq!(seq, 512);
    }

    #[test]
    fn test_highest_published_stops_at_gap() {
        let sequencer = sequencer(512);
        let s0 = sequencer.try_next().unwrap();
        let s1 = sequencer.try_next().unwrap();
        let s2 = sequencer.try_next().unwrap();

        // Publish out of order, leaving a hole at s1.
        sequencer.publish(s0);
        sequencer.publish(s2);
        assert_eq!(sequencer.get_highest_published_sequence(0, 2), 0);

        sequencer.publish(s1);
        assert_eq!(sequencer.get_highest_published_sequence(0, 2), 2);
    }

    #[test]
    fn test_stalled_publisher_blocks_the_frontier() {
        // A producer that claimed a sequence but never published it must
        // hide every later sequence from the consumer.
        let sequencer = sequencer(512);
        let stalled = sequencer.try_next().unwrap();
        let seq = sequencer.try_next().unwrap();
        sequencer.publish(seq);

        let cursor = sequencer.cursor().get();
        assert_eq!(cursor, 1);
        assert_eq!(
            sequencer.get_highest_published_sequence(0, cursor),
            stalled - 1
        );
    }

    #[test]
    fn test_blocking_next_waits_for_consumer() {
        let counters = Arc::new(SinkCounters::new());
        let sequencer = Arc::new(MultiProducerSequencer::new(
            512,
            Arc::new(SpinBlockingWaitStrategy::default()),
            Arc::clone(&counters),
        ));
        let consumer = Arc::new(Sequence::default());
        sequencer.add_gating_sequence(Arc::clone(&consumer));

        for _ in 0..512 {
            let seq = sequencer.next();
            sequencer.publish(seq);
        }

        let blocked = {
            let sequencer = Arc::clone(&sequencer);
            thread::spawn(move || {
                let seq = sequencer.next();
                sequencer.publish(seq);
                seq
            })
        };

        // Give the producer time to hit the wrap point, then free a slot.
        thread::sleep(Duration::from_millis(50));
        consumer.set(0);

        assert_eq!(blocked.join().unwrap(), 512);
        assert!(counters.buffer_unavailable.get() >= 1);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        let sequencer = sequencer(1024);
        let consumer = Arc::new(Sequence::default());
        sequencer.add_gating_sequence(consumer);

        let mut handles = vec![];
        for _ in 0..4 {
            let sequencer = Arc::clone(&sequencer);
            handles.push(thread::spawn(move || {
                let mut claimed = Vec::with_capacity(128);
                for _ in 0..128 {
                    let seq = sequencer.try_next().unwrap();
                    claimed.push(seq);
                    sequencer.publish(seq);
                }
                claimed
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 512);
        assert_eq!(sequencer.cursor().get(), 511);
    }
}
