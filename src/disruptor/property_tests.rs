//! Property-based tests for the engine components.
//!
//! These verify laws that must hold for all inputs: sequence arithmetic,
//! index wrapping, claim uniqueness and availability bookkeeping.

use proptest::prelude::*;
use std::sync::Arc;

use crate::counters::SinkCounters;
use crate::disruptor::{
    MultiProducerSequencer, RingBuffer, Sequence, Sequencer, SpinBlockingWaitStrategy,
};

fn sequencer(buffer_size: usize) -> MultiProducerSequencer {
    MultiProducerSequencer::new(
        buffer_size,
        Arc::new(SpinBlockingWaitStrategy::default()),
        Arc::new(SinkCounters::new()),
    )
}

mod sequence_properties {
    use super::*;

    proptest! {
        #[test]
        fn sequence_get_set_consistency(value in any::<i64>()) {
            let seq = Sequence::new(0);
            seq.set(value);
            prop_assert_eq!(seq.get(), value);
        }

        #[test]
        fn sequence_add_and_get_consistency(initial in -1_000_000i64..1_000_000, delta in 1i64..1000) {
            let seq = Sequence::new(initial);
            let new_value = seq.add_and_get(delta);
            prop_assert_eq!(new_value, initial + delta);
            prop_assert_eq!(seq.get(), initial + delta);
        }

        #[test]
        fn sequence_compare_and_set_success(initial in any::<i64>(), new_value in any::<i64>()) {
            let seq = Sequence::new(initial);
            prop_assert!(seq.compare_and_set(initial, new_value));
            prop_assert_eq!(seq.get(), new_value);
        }

        #[test]
        fn sequence_compare_and_set_failure(initial in any::<i64>(), wrong in any::<i64>(), new_value in any::<i64>()) {
            prop_assume!(wrong != initial);
            let seq = Sequence::new(initial);
            prop_assert!(!seq.compare_and_set(wrong, new_value));
            prop_assert_eq!(seq.get(), initial);
        }
    }
}

mod ring_buffer_properties {
    use super::*;

    proptest! {
        #[test]
        fn same_slot_across_generations(size_power in 1u32..12, sequence in 0i64..1_000_000) {
            let size = 1usize << size_power;
            let buffer = RingBuffer::<i64>::new(size).unwrap();

            unsafe { buffer.write(sequence, 42) };
            // The sequence one generation later maps onto the same slot.
            prop_assert_eq!(*buffer.get(sequence + size as i64), 42);
        }

        #[test]
        fn batch_length_never_crosses_the_physical_end(
            size_power in 1u32..10,
            lo in 0i64..100_000,
            extra in 0i64..100_000
        ) {
            let size = 1usize << size_power;
            let buffer = RingBuffer::<i64>::new(size).unwrap();
            let hi = lo + extra;

            let len = unsafe { buffer.batch_mut(lo, hi) }.len();
            let to_end = size - (lo as usize & (size - 1));
            prop_assert_eq!(len, ((extra + 1) as usize).min(to_end));
            prop_assert!(len >= 1);
        }
    }
}

mod sequencer_properties {
    use super::*;

    proptest! {
        #[test]
        fn claims_are_unique_and_monotonic(size_power in 9u32..12, claims in 1usize..256) {
            let sequencer = sequencer(1usize << size_power);
            let mut last = -1i64;

            for _ in 0..claims {
                let seq = sequencer.try_next().unwrap();
                prop_assert_eq!(seq, last + 1);
                last = seq;
                sequencer.publish(seq);
            }
        }

        #[test]
        fn publish_order_does_not_affect_availability(
            size_power in 9u32..11,
            count in 2usize..64
        ) {
            let sequencer = sequencer(1usize << size_power);
            let claimed: Vec<i64> = (0..count).map(|_| sequencer.try_next().unwrap()).collect();

            // Publish in reverse of claim order; every sequence still
            // becomes available, and the contiguous frontier reaches the
            // top only once the lowest claim is in.
            for &seq in claimed.iter().rev().take(count - 1) {
                sequencer.publish(seq);
            }
            prop_assert_eq!(sequencer.get_highest_published_sequence(0, (count - 1) as i64), -1);

            sequencer.publish(claimed[0]);
            prop_assert_eq!(
                sequencer.get_highest_published_sequence(0, (count - 1) as i64),
                (count - 1) as i64
            );
        }

        #[test]
        fn capacity_is_never_exceeded(size_power in 9u32..11, attempts in 1usize..2048) {
            let buffer_size = 1usize << size_power;
            let sequencer = sequencer(buffer_size);
            let consumer = Arc::new(Sequence::default());
            sequencer.add_gating_sequence(Arc::clone(&consumer));

            let mut claimed = 0usize;
            for _ in 0..attempts {
                match sequencer.try_next() {
                    Ok(seq) => {
                        claimed += 1;
                        sequencer.publish(seq);
                    }
                    Err(_) => break,
                }
            }

            // With the consumer parked at -1 the claim count is capped at
            // the buffer size.
            prop_assert!(claimed <= buffer_size);
            prop_assert_eq!(claimed, attempts.min(buffer_size));
        }
    }
}
