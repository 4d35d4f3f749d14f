//! Sample-domain processing
//!
//! Pure in-memory transforms applied between the decoder and the segment
//! rings: channel remixing to the hardware layout, and the gain filters
//! (software amplifier, RMS normalizer, peak compressor).

pub mod filter;
pub mod remix;
