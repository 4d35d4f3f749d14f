//! Lock-free byte ring
//!
//! Single-producer single-consumer byte buffer carrying interleaved 16-bit
//! samples (or encoded pass-through frames) from the enqueue path to the
//! playback thread.
//!
//! The ring itself is a `ringbuf` heap buffer split into its two halves.
//! Each half sits behind its own mutex because the half's operations need
//! `&mut self`; the producer only ever takes the write half and the
//! playback thread only ever takes the read half, so the locks never
//! contend on the data path. `clear` is the one cross-over: it drains
//! through the read half and may only run while the segment owning the
//! ring is out of the playback thread's reach.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::Mutex;

pub struct ByteRing {
    prod: Mutex<HeapProd<u8>>,
    cons: Mutex<HeapCons<u8>>,
    capacity: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        let (prod, cons) = HeapRb::<u8>::new(capacity).split();
        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    pub fn write(&self, data: &[u8]) -> usize {
        self.prod.lock().unwrap().push_slice(data)
    }

    /// Bytes buffered and not yet consumed.
    pub fn used(&self) -> usize {
        self.prod.lock().unwrap().occupied_len()
    }

    /// Bytes of remaining space.
    pub fn free(&self) -> usize {
        self.prod.lock().unwrap().vacant_len()
    }

    /// Drop up to `count` buffered bytes; returns how many were dropped.
    pub fn advance(&self, count: usize) -> usize {
        self.cons.lock().unwrap().skip(count)
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.cons.lock().unwrap().clear();
    }

    /// Hand the longest contiguous readable slice (capped at `max`) to
    /// `consume`, which returns how many bytes it actually took; the read
    /// cursor advances by exactly that amount. The slice is mutable so the
    /// caller can scale samples in place right before writing them out.
    pub fn drain<F>(&self, max: usize, consume: F) -> usize
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let mut cons = self.cons.lock().unwrap();
        let taken;
        {
            let (first, _) = cons.as_mut_slices();
            if first.is_empty() || max == 0 {
                return 0;
            }
            let n = first.len().min(max);
            taken = consume(&mut first[..n]);
            debug_assert!(taken <= n);
        }
        cons.skip(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_drain_fifo() {
        let ring = ByteRing::new(16);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 4);
        assert_eq!(ring.used(), 4);
        assert_eq!(ring.free(), 12);

        let mut seen = Vec::new();
        let n = ring.drain(usize::MAX, |slice| {
            seen.extend_from_slice(slice);
            slice.len()
        });
        assert_eq!(n, 4);
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_write_clamps_to_free_space() {
        let ring = ByteRing::new(4);
        assert_eq!(ring.write(&[9; 6]), 4);
        assert_eq!(ring.used(), 4);
        assert_eq!(ring.write(&[9; 2]), 0);
    }

    #[test]
    fn test_drain_respects_max_and_partial_consumption() {
        let ring = ByteRing::new(16);
        ring.write(&[7; 10]);
        // cap below what is available
        let n = ring.drain(4, |slice| {
            assert_eq!(slice.len(), 4);
            slice.len()
        });
        assert_eq!(n, 4);
        // consume less than offered
        let n = ring.drain(usize::MAX, |_slice| 2);
        assert_eq!(n, 2);
        assert_eq!(ring.used(), 4);
    }

    #[test]
    fn test_drain_empty_returns_zero() {
        let ring = ByteRing::new(8);
        let n = ring.drain(usize::MAX, |_| panic!("must not be called"));
        assert_eq!(n, 0);
    }

    #[test]
    fn test_advance_and_clear() {
        let ring = ByteRing::new(8);
        ring.write(&[1, 2, 3, 4, 5]);
        assert_eq!(ring.advance(2), 2);
        assert_eq!(ring.used(), 3);
        ring.clear();
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.free(), 8);
    }

    #[test]
    fn test_wrap_around_keeps_order() {
        let ring = ByteRing::new(8);
        ring.write(&[1, 2, 3, 4, 5, 6]);
        ring.advance(4);
        ring.write(&[7, 8, 9, 10]);
        let mut seen = Vec::new();
        // two drains may be needed across the wrap point
        while ring.used() > 0 {
            ring.drain(usize::MAX, |slice| {
                seen.extend_from_slice(slice);
                slice.len()
            });
        }
        assert_eq!(seen, vec![5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_in_place_mutation_is_visible() {
        let ring = ByteRing::new(8);
        ring.write(&[1, 1, 1, 1]);
        let mut seen = Vec::new();
        ring.drain(usize::MAX, |slice| {
            for b in slice.iter_mut() {
                *b *= 3;
            }
            seen.extend_from_slice(slice);
            slice.len()
        });
        assert_eq!(seen, vec![3, 3, 3, 3]);
    }
}
