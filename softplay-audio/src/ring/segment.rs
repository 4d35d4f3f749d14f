//! Playback segments and the segment queue
//!
//! A segment is one reconfigurable playback unit: the format negotiated at
//! setup time plus a byte ring of buffered audio in that format. The queue
//! is a fixed ring of eight segments with a producer-owned write cursor, a
//! playback-thread-owned read cursor and a shared fill counter.
//!
//! ## Thread safety
//!
//! Segment metadata is written by the producer while a slot is allocated
//! and read by the playback thread after it observes the slot through
//! `filled`; the fields are atomics so both sides stay well-defined.
//!
//! **Memory ordering:**
//! - `filled` is sequentially consistent; it is the counter both sides use
//!   to hand slots over, and every other field is published before it.
//! - metadata fields use Release stores and Acquire loads.
//! - `packet_size` is diagnostic only and stays Relaxed.

use crate::error::{AudioError, Result};
use crate::pts::{bytes_to_ticks, NO_PTS};
use crate::ring::ByteRing;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};

/// Number of segments in the queue.
pub const SEGMENT_COUNT: usize = 8;

/// Ring bytes per segment: about two seconds of 8-channel 16-bit audio.
pub const SEGMENT_RING_BYTES: usize = 3 * 5 * 7 * 8 * 2 * 1000;

/// The format triple the playback thread compares across a segment hop to
/// decide whether the sink must be reconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFormat {
    pub use_ac3: bool,
    pub hw_rate: u32,
    pub hw_channels: u32,
}

pub struct Segment {
    /// Sink state must be dropped before this segment plays
    flush: AtomicBool,
    /// Pass-through: bytes are an encoded bitstream, hands off
    use_ac3: AtomicBool,
    /// Size of the first enqueued burst, for logging only
    packet_size: AtomicUsize,
    in_rate: AtomicU32,
    in_channels: AtomicU32,
    hw_rate: AtomicU32,
    hw_channels: AtomicU32,
    /// Timestamp of the next sample written into the ring, or `NO_PTS`
    pts: AtomicI64,
    ring: ByteRing,
}

impl Segment {
    fn new() -> Self {
        Self {
            flush: AtomicBool::new(false),
            use_ac3: AtomicBool::new(false),
            packet_size: AtomicUsize::new(0),
            in_rate: AtomicU32::new(0),
            in_channels: AtomicU32::new(0),
            hw_rate: AtomicU32::new(0),
            hw_channels: AtomicU32::new(0),
            pts: AtomicI64::new(NO_PTS),
            ring: ByteRing::new(SEGMENT_RING_BYTES),
        }
    }

    /// Prepare the slot for a new life: flush-marked, empty ring, unknown
    /// timestamp. Only the producer calls this, and only on a free slot.
    fn reset(&self, in_rate: u32, in_channels: u32, hw_rate: u32, hw_channels: u32, use_ac3: bool) {
        self.flush.store(true, Ordering::Release);
        self.use_ac3.store(use_ac3, Ordering::Release);
        self.packet_size.store(0, Ordering::Relaxed);
        self.in_rate.store(in_rate, Ordering::Release);
        self.in_channels.store(in_channels, Ordering::Release);
        self.hw_rate.store(hw_rate, Ordering::Release);
        self.hw_channels.store(hw_channels, Ordering::Release);
        self.pts.store(NO_PTS, Ordering::Release);
        self.ring.clear();
    }

    pub fn ring(&self) -> &ByteRing {
        &self.ring
    }

    pub fn format(&self) -> SegmentFormat {
        SegmentFormat {
            use_ac3: self.use_ac3(),
            hw_rate: self.hw_rate(),
            hw_channels: self.hw_channels(),
        }
    }

    /// A slot that never saw a setup reports a zero rate.
    pub fn is_configured(&self) -> bool {
        self.hw_rate() != 0
    }

    pub fn use_ac3(&self) -> bool {
        self.use_ac3.load(Ordering::Acquire)
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate.load(Ordering::Acquire)
    }

    pub fn in_channels(&self) -> u32 {
        self.in_channels.load(Ordering::Acquire)
    }

    pub fn hw_rate(&self) -> u32 {
        self.hw_rate.load(Ordering::Acquire)
    }

    pub fn hw_channels(&self) -> u32 {
        self.hw_channels.load(Ordering::Acquire)
    }

    /// Bytes per frame of the hardware format.
    pub fn frame_bytes(&self) -> usize {
        self.hw_channels() as usize * crate::pts::BYTES_PER_SAMPLE
    }

    /// Consume the flush marker, if set.
    pub fn take_flush(&self) -> bool {
        self.flush.swap(false, Ordering::AcqRel)
    }

    pub fn pts(&self) -> i64 {
        self.pts.load(Ordering::Acquire)
    }

    pub fn set_pts(&self, pts: i64) {
        self.pts.store(pts, Ordering::Release);
    }

    /// Move the write-side timestamp forward by the duration of `bytes`
    /// in this segment's hardware format. Unknown stays unknown.
    pub fn advance_pts(&self, bytes: usize) {
        let pts = self.pts.load(Ordering::Acquire);
        if pts != NO_PTS {
            let ticks = bytes_to_ticks(bytes, self.hw_rate(), self.hw_channels());
            self.pts.store(pts + ticks, Ordering::Release);
        }
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size.load(Ordering::Relaxed)
    }

    pub fn set_packet_size(&self, size: usize) {
        self.packet_size.store(size, Ordering::Relaxed);
    }
}

pub struct SegmentQueue {
    slots: Vec<Segment>,
    /// Producer-owned; the slot the decoder writes into
    write: AtomicUsize,
    /// Playback-thread-owned; the slot being drained
    read: AtomicUsize,
    /// Queued segments beyond the current read slot
    filled: AtomicUsize,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self {
            slots: (0..SEGMENT_COUNT).map(|_| Segment::new()).collect(),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
        }
    }

    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::SeqCst)
    }

    pub fn read_index(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    pub fn write_index(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    pub fn slot(&self, index: usize) -> &Segment {
        &self.slots[index % SEGMENT_COUNT]
    }

    pub fn write_segment(&self) -> &Segment {
        self.slot(self.write_index())
    }

    pub fn read_segment(&self) -> &Segment {
        self.slot(self.read_index())
    }

    /// Allocate the next segment for the given format. Fails when all
    /// slots are in flight; the caller is expected to back off.
    ///
    /// The fresh segment always carries the flush marker, so stale sink
    /// state from the previous format is dropped before it plays.
    pub fn add(
        &self,
        in_rate: u32,
        in_channels: u32,
        hw_rate: u32,
        hw_channels: u32,
        use_ac3: bool,
    ) -> Result<()> {
        if self.filled() == SEGMENT_COUNT {
            return Err(AudioError::NoSegment);
        }
        let next = (self.write.load(Ordering::Acquire) + 1) % SEGMENT_COUNT;
        self.slots[next].reset(in_rate, in_channels, hw_rate, hw_channels, use_ac3);
        self.write.store(next, Ordering::Release);
        self.filled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Hop the read cursor to the next queued segment and return it.
    /// Only the playback thread calls this, and only when `filled > 0`.
    pub fn advance_read(&self) -> &Segment {
        self.filled.fetch_sub(1, Ordering::SeqCst);
        let next = (self.read.load(Ordering::Acquire) + 1) % SEGMENT_COUNT;
        self.read.store(next, Ordering::Release);
        &self.slots[next]
    }

    /// Commit the result of a flush scan: jump the read cursor to
    /// `read` and leave `remaining` segments queued beyond it.
    pub fn commit_flush_scan(&self, read: usize, remaining: usize) {
        self.read.store(read % SEGMENT_COUNT, Ordering::Release);
        self.filled.store(remaining, Ordering::SeqCst);
    }
}

impl Default for SegmentQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue_is_empty_and_unconfigured() {
        let queue = SegmentQueue::new();
        assert_eq!(queue.filled(), 0);
        assert_eq!(queue.read_index(), queue.write_index());
        assert!(!queue.read_segment().is_configured());
        assert_eq!(queue.read_segment().pts(), NO_PTS);
    }

    #[test]
    fn test_add_configures_next_slot() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 6, 48_000, 2, false).unwrap();
        assert_eq!(queue.filled(), 1);
        assert_eq!(queue.write_index(), 1);
        let seg = queue.write_segment();
        assert!(seg.is_configured());
        assert_eq!(seg.in_channels(), 6);
        assert_eq!(seg.hw_channels(), 2);
        assert_eq!(seg.pts(), NO_PTS);
        assert_eq!(seg.packet_size(), 0);
        assert!(seg.take_flush());
        assert!(!seg.take_flush());
    }

    #[test]
    fn test_ninth_add_fails() {
        let queue = SegmentQueue::new();
        for _ in 0..SEGMENT_COUNT {
            queue.add(48_000, 2, 48_000, 2, false).unwrap();
        }
        assert!(matches!(
            queue.add(48_000, 2, 48_000, 2, false),
            Err(AudioError::NoSegment)
        ));
        assert_eq!(queue.filled(), SEGMENT_COUNT);
    }

    #[test]
    fn test_advance_read_follows_allocation_order() {
        let queue = SegmentQueue::new();
        queue.add(44_100, 2, 44_100, 2, false).unwrap();
        queue.add(48_000, 6, 48_000, 6, false).unwrap();
        assert_eq!(queue.filled(), 2);

        let first = queue.advance_read();
        assert_eq!(first.hw_rate(), 44_100);
        let second = queue.advance_read();
        assert_eq!(second.hw_rate(), 48_000);
        assert_eq!(queue.filled(), 0);
    }

    #[test]
    fn test_format_comparison_drives_reconfiguration() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        queue.add(48_000, 6, 48_000, 6, false).unwrap();

        let a = queue.advance_read().format();
        let b = queue.advance_read().format();
        let c = queue.advance_read().format();
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_reset_clears_leftover_ring_bytes() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        queue.write_segment().ring().write(&[0u8; 512]);
        // walk add/advance around the whole arena back to the same slot
        for _ in 0..SEGMENT_COUNT {
            queue.advance_read();
            queue.add(48_000, 2, 48_000, 2, false).unwrap();
        }
        assert_eq!(queue.write_index(), 1);
        assert_eq!(queue.write_segment().ring().used(), 0);
    }

    #[test]
    fn test_pts_advances_only_when_known() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        let seg = queue.write_segment();

        seg.advance_pts(192_000);
        assert_eq!(seg.pts(), NO_PTS);

        seg.set_pts(1_000);
        seg.advance_pts(192_000); // one second of 48 kHz stereo
        assert_eq!(seg.pts(), 1_000 + 90_000);
    }

    #[test]
    fn test_packet_size_survives_until_reallocation() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        let seg = queue.write_segment();

        // the first burst records its size, later bursts leave it alone
        if seg.packet_size() == 0 {
            seg.set_packet_size(4_800);
        }
        if seg.packet_size() == 0 {
            seg.set_packet_size(9_600);
        }
        assert_eq!(seg.packet_size(), 4_800);

        // a reallocation of the slot starts over
        for _ in 0..SEGMENT_COUNT {
            queue.advance_read();
            queue.add(48_000, 2, 48_000, 2, false).unwrap();
        }
        assert_eq!(queue.write_index(), 1);
        assert_eq!(queue.write_segment().packet_size(), 0);
    }

    #[test]
    fn test_commit_flush_scan_jumps_cursor() {
        let queue = SegmentQueue::new();
        for _ in 0..3 {
            queue.add(48_000, 2, 48_000, 2, false).unwrap();
        }
        // pretend the scan found a flush marker on the last queued slot
        queue.commit_flush_scan(3, 0);
        assert_eq!(queue.read_index(), 3);
        assert_eq!(queue.filled(), 0);
    }
}
