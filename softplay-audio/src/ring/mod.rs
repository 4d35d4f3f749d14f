//! Buffering between the decoder and the playback thread
//!
//! A fixed arena of eight playback segments, each pairing format metadata
//! with a byte ring roughly two seconds deep. The producer fills the
//! current write segment; the playback thread drains the current read
//! segment and hops forward when one empties.

pub mod byte_ring;
pub mod segment;

pub use byte_ring::ByteRing;
pub use segment::{Segment, SegmentFormat, SegmentQueue, SEGMENT_COUNT, SEGMENT_RING_BYTES};
