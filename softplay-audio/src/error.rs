//! Error types for the audio output engine
//!
//! Only configuration-shaped failures surface to callers: an unsupported
//! format at setup time, or running out of playback segments. Device
//! trouble during playback is absorbed by the playback thread and logged,
//! because a dying sound card must never take the video pipeline with it.

use thiserror::Error;

/// Main error type for the audio output engine
#[derive(Debug, Error)]
pub enum AudioError {
    /// Sample rate not in the hardware-supported table
    #[error("{0}Hz sample-rate unsupported")]
    UnsupportedRate(u32),

    /// Channel count has no mapping to a hardware channel count
    #[error("{0} channels unsupported")]
    UnsupportedChannels(u32),

    /// All playback segments are in flight; caller should back off
    #[error("out of playback segments")]
    NoSegment,

    /// Device open/configure failure reported by a sink adapter
    #[error("audio device error: {0}")]
    Device(String),

    /// Configuration file errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors from device file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, AudioError>;
