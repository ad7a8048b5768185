//! Preallocated ring of fixed-capacity sample slots
//!
//! Samples are appended to the current slot until the next chunk would not
//! fit; the cursor then advances to the next slot (modulo the slot count) and
//! the chunk starts at offset 0 there. Every slot remembers how many samples
//! it received the last time it was written, so a window can be replayed
//! slot by slot without duplicating or dropping samples at slot boundaries.

use thiserror::Error;

/// Errors raised by the ring store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Chunk of {len} samples exceeds slot capacity of {capacity}")]
    ChunkTooLarge { len: usize, capacity: usize },
}

/// Where a chunk landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Slot the chunk was written into
    pub slot: usize,
    /// Samples written
    pub written: usize,
    /// Insertion offset in `slot` after the write
    pub insertion_point: usize,
    /// Whether the cursor advanced to a new slot before writing
    pub rolled_over: bool,
}

/// Ring of N preallocated sample slots
#[derive(Debug)]
pub struct RingBufferStore {
    slots: Vec<Box<[f32]>>,
    filled: Vec<usize>,
    capacity: usize,
    current: usize,
    offset: usize,
}

impl RingBufferStore {
    /// Allocate `slot_count` slots of `capacity` samples each
    ///
    /// Both values come from a validated config and are at least 1.
    pub fn new(slot_count: usize, capacity: usize) -> Self {
        let slot_count = slot_count.max(1);
        let capacity = capacity.max(1);
        Self {
            slots: (0..slot_count)
                .map(|_| vec![0.0f32; capacity].into_boxed_slice())
                .collect(),
            filled: vec![0; slot_count],
            capacity,
            current: 0,
            offset: 0,
        }
    }

    /// Whether writing `len` samples would advance the cursor first
    pub fn will_roll_over(&self, len: usize) -> bool {
        self.offset > 0 && self.offset + len > self.capacity
    }

    /// Append a chunk, rolling over to the next slot if it does not fit
    pub fn write(&mut self, chunk: &[f32]) -> Result<WriteOutcome, RingError> {
        let len = chunk.len();
        if len > self.capacity {
            return Err(RingError::ChunkTooLarge {
                len,
                capacity: self.capacity,
            });
        }

        let rolled_over = self.will_roll_over(len);
        if rolled_over {
            self.current = self.next_slot(self.current);
            self.offset = 0;
        }

        let start = self.offset;
        self.slots[self.current][start..start + len].copy_from_slice(chunk);
        self.offset += len;
        self.filled[self.current] = self.offset;

        Ok(WriteOutcome {
            slot: self.current,
            written: len,
            insertion_point: self.offset,
            rolled_over,
        })
    }

    /// Recorded samples of `slot`, truncated to its filled length
    pub fn slot_data(&self, slot: usize) -> &[f32] {
        &self.slots[slot][..self.filled[slot]]
    }

    /// Samples recorded in `slot` the last time it was written
    pub fn filled(&self, slot: usize) -> usize {
        self.filled[slot]
    }

    /// Whether `slot` holds a full slot's worth of samples
    pub fn is_full(&self, slot: usize) -> bool {
        self.filled[slot] == self.capacity
    }

    /// Slot currently being written
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Insertion offset within the current slot
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Samples per slot
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot following `slot` in ring order
    pub fn next_slot(&self, slot: usize) -> usize {
        (slot + 1) % self.slots.len()
    }

    /// Slots from `start` through `end` inclusive, in ring order
    pub fn slots_between(&self, start: usize, end: usize) -> Vec<usize> {
        let mut slots = vec![start];
        let mut slot = start;
        while slot != end {
            slot = self.next_slot(slot);
            slots.push(slot);
        }
        slots
    }

    /// Return to slot 0 and forget previously recorded lengths
    ///
    /// Sample memory is kept; only the cursor and fill counts change.
    pub fn reset(&mut self) {
        self.current = 0;
        self.offset = 0;
        self.filled.iter_mut().for_each(|f| *f = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_slot_before_rolling_over() {
        let mut ring = RingBufferStore::new(4, 100);

        let first = ring.write(&[0.1; 50]).unwrap();
        assert_eq!(first.slot, 0);
        assert!(!first.rolled_over);
        assert_eq!(first.insertion_point, 50);

        let second = ring.write(&[0.2; 50]).unwrap();
        assert_eq!(second.slot, 0);
        assert!(!second.rolled_over);
        assert!(ring.is_full(0));

        let third = ring.write(&[0.3; 50]).unwrap();
        assert_eq!(third.slot, 1);
        assert!(third.rolled_over);
        assert_eq!(third.insertion_point, 50);
        assert_eq!(ring.filled(0), 100);
        assert_eq!(ring.filled(1), 50);
    }

    #[test]
    fn test_partial_fit_rolls_over_without_splitting() {
        let mut ring = RingBufferStore::new(2, 100);
        ring.write(&[1.0; 60]).unwrap();
        let outcome = ring.write(&[2.0; 60]).unwrap();

        assert!(outcome.rolled_over);
        assert_eq!(outcome.slot, 1);
        assert_eq!(ring.slot_data(0), &[1.0; 60][..]);
        assert_eq!(ring.slot_data(1), &[2.0; 60][..]);
    }

    #[test]
    fn test_cursor_wraps_modulo_slot_count() {
        let mut ring = RingBufferStore::new(3, 10);
        let slots: Vec<usize> = (0..7)
            .map(|i| ring.write(&[i as f32; 10]).unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.slot_data(0), &[6.0; 10][..]);
        assert_eq!(ring.slot_data(2), &[5.0; 10][..]);
    }

    #[test]
    fn test_oversized_chunk_is_rejected() {
        let mut ring = RingBufferStore::new(2, 16);
        assert_eq!(
            ring.write(&[0.0; 17]),
            Err(RingError::ChunkTooLarge {
                len: 17,
                capacity: 16
            })
        );
        // Nothing written
        assert_eq!(ring.filled(0), 0);
        assert_eq!(ring.offset(), 0);
    }

    #[test]
    fn test_stale_length_survives_until_rewritten() {
        let mut ring = RingBufferStore::new(2, 10);
        ring.write(&[1.0; 10]).unwrap(); // slot 0
        ring.write(&[2.0; 10]).unwrap(); // slot 1
        ring.write(&[3.0; 4]).unwrap(); // slot 0 again, shorter

        assert_eq!(ring.filled(1), 10);
        assert_eq!(ring.slot_data(1), &[2.0; 10][..]);
        assert_eq!(ring.filled(0), 4);
    }

    #[test]
    fn test_slots_between_wraps() {
        let ring = RingBufferStore::new(4, 1);
        assert_eq!(ring.slots_between(2, 1), vec![2, 3, 0, 1]);
        assert_eq!(ring.slots_between(3, 3), vec![3]);
        assert_eq!(ring.slots_between(0, 3), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_single_slot_ring() {
        let mut ring = RingBufferStore::new(1, 4);
        ring.write(&[1.0; 4]).unwrap();
        let outcome = ring.write(&[2.0; 2]).unwrap();
        assert!(outcome.rolled_over);
        assert_eq!(outcome.slot, 0);
        assert_eq!(ring.slot_data(0), &[2.0; 2][..]);
    }

    #[test]
    fn test_reset() {
        let mut ring = RingBufferStore::new(3, 8);
        for _ in 0..5 {
            ring.write(&[0.5; 8]).unwrap();
        }
        ring.reset();
        assert_eq!(ring.current_slot(), 0);
        assert_eq!(ring.offset(), 0);
        assert!((0..3).all(|s| ring.filled(s) == 0));
    }
}
