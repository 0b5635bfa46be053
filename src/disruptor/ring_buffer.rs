//! Pre-allocated ring buffer.
//!
//! The buffer is a fixed power-of-two array of slots, pre-filled with
//! default records at construction so the hot path never allocates. A
//! sequence maps to its slot with a bitmask. One cache line of dead slots
//! pads each end of the live region so the boundary slots never share a
//! line with unrelated state.

use std::cell::UnsafeCell;

use crate::disruptor::{is_power_of_two, Result, SinkError};

/// Cache line size assumed for the front/back slot padding.
const CACHE_LINE_SIZE: usize = 64;

/// Number of dead slots on each side of the live region for a record type.
///
/// Zero-sized types need no padding; otherwise enough slots to cover one
/// cache line.
fn buffer_pad<E>() -> usize {
    let record_size = std::mem::size_of::<E>();
    if record_size == 0 {
        0
    } else {
        CACHE_LINE_SIZE.div_ceil(record_size)
    }
}

/// Fixed-size slot array shared between producers and the consumer.
///
/// Slot ownership is coordinated entirely by sequence arithmetic: the slot
/// for sequence `s` belongs to the producer that claimed `s` until it is
/// published, then to the consumer until the consumer advances past `s`.
/// The buffer itself takes no locks.
#[derive(Debug)]
pub struct RingBuffer<E> {
    /// Live slots plus `buffer_pad` dead slots on each side.
    slots: Box<[UnsafeCell<E>]>,
    /// Mask for mapping sequences onto the live region (`buffer_size - 1`).
    index_mask: i64,
    /// Number of live slots.
    buffer_size: usize,
    /// Offset of the first live slot.
    buffer_pad: usize,
}

impl<E> RingBuffer<E>
where
    E: Send + Sync,
{
    /// Create a buffer with `buffer_size` live slots, each pre-filled with
    /// the record type's default value.
    ///
    /// # Errors
    /// Returns `SinkError::InvalidConfig` if `buffer_size` is not a power
    /// of two. Size policy (minimum, rounding) is enforced by the
    /// configuration layer before this point.
    pub fn new(buffer_size: usize) -> Result<Self>
    where
        E: Default,
    {
        if !is_power_of_two(buffer_size) {
            return Err(SinkError::InvalidConfig(buffer_size));
        }

        let pad = buffer_pad::<E>();
        let slots: Box<[UnsafeCell<E>]> = (0..buffer_size + 2 * pad)
            .map(|_| UnsafeCell::new(E::default()))
            .collect();

        Ok(Self {
            slots,
            index_mask: (buffer_size - 1) as i64,
            buffer_size,
            buffer_pad: pad,
        })
    }

    /// Number of live slots.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of live slots as the sequence type.
    pub fn size(&self) -> i64 {
        self.buffer_size as i64
    }

    #[inline]
    fn slot_index(&self, sequence: i64) -> usize {
        self.buffer_pad + (sequence & self.index_mask) as usize
    }

    /// Read the record at the given sequence.
    pub fn get(&self, sequence: i64) -> &E {
        let index = self.slot_index(sequence);
        // SAFETY: slot_index is always within the allocation.
        let slot = unsafe { self.slots.get_unchecked(index) };
        unsafe { &*slot.get() }
    }

    /// Raw pointer to the record at the given sequence.
    ///
    /// # Safety
    /// The caller must hold exclusive ownership of `sequence` under the
    /// sequencer protocol: a producer between claim and publish, or the
    /// consumer between availability and advancing its sequence.
    pub unsafe fn get_mut_unchecked(&self, sequence: i64) -> *mut E {
        let index = self.slot_index(sequence);
        // SAFETY: slot_index is always within the allocation.
        self.slots.get_unchecked(index).get()
    }

    /// Replace the record at the given sequence, dropping the displaced
    /// value in place.
    ///
    /// # Safety
    /// Same ownership requirement as [`get_mut_unchecked`].
    ///
    /// [`get_mut_unchecked`]: RingBuffer::get_mut_unchecked
    pub unsafe fn write(&self, sequence: i64, value: E) {
        *self.get_mut_unchecked(sequence) = value;
    }

    /// Mutable slice over the longest contiguous run of slots starting at
    /// `lo`, capped at `hi`.
    ///
    /// The slice length is `min(hi - lo + 1, N - (lo & mask))`: a batch
    /// never wraps the physical array, and the caller issues a follow-up
    /// call for the remainder after the wrap point.
    ///
    /// # Safety
    /// The caller must hold exclusive ownership of every sequence in
    /// `lo..=hi` and must not hold any other reference into that range.
    pub unsafe fn batch_mut(&self, lo: i64, hi: i64) -> &mut [E] {
        debug_assert!(lo <= hi);
        let to_end = self.buffer_size - (lo & self.index_mask) as usize;
        let len = ((hi - lo + 1) as usize).min(to_end);
        let start = self.slot_index(lo);
        // SAFETY: UnsafeCell<E> has the same layout as E, the range stays
        // inside the live region, and exclusivity is the caller's contract.
        std::slice::from_raw_parts_mut(self.slots.get_unchecked(start).get(), len)
    }
}

// SAFETY: slots are UnsafeCell, but every access is serialized by the
// sequencer protocol: a slot has exactly one owner at any time, and the
// publish/consume handoffs establish release/acquire edges through the
// availability table and the consumer sequence.
unsafe impl<E: Send + Sync> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}
