//! Presentation-timestamp units
//!
//! Every timestamp handled by the engine is expressed in 90 kHz ticks, the
//! unit the demuxer delivers. Helpers here convert between buffered byte
//! counts and ticks for a given hardware format.

/// Ticks per second of the presentation clock.
pub const PTS_CLOCK_HZ: i64 = 90_000;

/// Sentinel meaning "no timestamp known" (the most-negative 64-bit value).
pub const NO_PTS: i64 = i64::MIN;

/// Bytes per sample of one channel (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Duration in 90 kHz ticks of `bytes` of interleaved 16-bit audio.
pub fn bytes_to_ticks(bytes: usize, rate: u32, channels: u32) -> i64 {
    if rate == 0 || channels == 0 {
        return 0;
    }
    (bytes as i64 * PTS_CLOCK_HZ) / (rate as i64 * channels as i64 * BYTES_PER_SAMPLE as i64)
}

/// Byte count covering `ticks` of interleaved 16-bit audio.
///
/// Negative durations map to zero; callers align the result to whole frames
/// with [`align_to_frame`] before touching a ring.
pub fn ticks_to_bytes(ticks: i64, rate: u32, channels: u32) -> usize {
    if ticks <= 0 {
        return 0;
    }
    ((ticks * rate as i64 * channels as i64 * BYTES_PER_SAMPLE as i64) / PTS_CLOCK_HZ) as usize
}

/// Round `bytes` down to a whole frame of `channels` 16-bit samples.
pub fn align_to_frame(bytes: usize, channels: u32) -> usize {
    let frame = channels as usize * BYTES_PER_SAMPLE;
    if frame == 0 {
        return 0;
    }
    bytes - bytes % frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_ticks_stereo_48k() {
        // One second of 48 kHz stereo is 192000 bytes and 90000 ticks.
        assert_eq!(bytes_to_ticks(192_000, 48_000, 2), 90_000);
        assert_eq!(bytes_to_ticks(0, 48_000, 2), 0);
    }

    #[test]
    fn test_ticks_to_bytes_round_trip() {
        let bytes = ticks_to_bytes(90_000, 48_000, 2);
        assert_eq!(bytes, 192_000);
        assert_eq!(bytes_to_ticks(bytes, 48_000, 2), 90_000);
    }

    #[test]
    fn test_ticks_to_bytes_negative_is_zero() {
        assert_eq!(ticks_to_bytes(-1, 48_000, 2), 0);
        assert_eq!(ticks_to_bytes(NO_PTS, 48_000, 2), 0);
    }

    #[test]
    fn test_degenerate_format_is_zero() {
        assert_eq!(bytes_to_ticks(4096, 0, 2), 0);
        assert_eq!(bytes_to_ticks(4096, 48_000, 0), 0);
    }

    #[test]
    fn test_align_to_frame() {
        assert_eq!(align_to_frame(13, 2), 12);
        assert_eq!(align_to_frame(12, 2), 12);
        assert_eq!(align_to_frame(13, 6), 12);
        assert_eq!(align_to_frame(11, 6), 0);
        assert_eq!(align_to_frame(100, 0), 0);
    }
}
