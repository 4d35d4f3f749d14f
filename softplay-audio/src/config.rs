//! Configuration loading and management
//!
//! Bootstrap configuration for the output engine, loadable from a TOML
//! file. Device strings and the driver preference are fixed at
//! construction; the gain and sync knobs stay adjustable at runtime
//! through the [`AudioOutput`](crate::AudioOutput) setters.

use crate::error::{AudioError, Result};
use serde::Deserialize;
use std::path::Path;

/// Output engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// PCM device string. Empty selects the silent noop sink; a string
    /// beginning with `/` prefers the DSP character-device adapter.
    #[serde(default = "default_device")]
    pub device: String,

    /// Pass-through device for already-encoded frames (empty: use `device`)
    #[serde(default)]
    pub device_ac3: String,

    /// Driver preference ("alsa", "oss", "noop"); overrides the
    /// device-string heuristic when set
    #[serde(default)]
    pub driver: Option<String>,

    /// Mixer device for hardware volume
    #[serde(default = "default_mixer_device")]
    pub mixer_device: String,

    /// Mixer element/channel carrying the playback volume
    #[serde(default = "default_mixer_channel")]
    pub mixer_channel: String,

    /// Buffered-audio target in milliseconds before playback starts
    #[serde(default = "default_buffer_time_ms")]
    pub buffer_time_ms: u32,

    /// Apply volume in software instead of through the mixer
    #[serde(default)]
    pub soft_volume: bool,

    /// Enable the RMS volume normalizer
    #[serde(default)]
    pub normalize: bool,

    /// Upper bound for the normalize factor (1000 = unity)
    #[serde(default = "default_max_factor")]
    pub max_normalize: i32,

    /// Enable the peak compressor
    #[serde(default)]
    pub compression: bool,

    /// Upper bound for the compression factor (1000 = unity)
    #[serde(default = "default_max_factor")]
    pub max_compression: i32,

    /// Volume reduction (0..1000 units) applied to two-channel material
    #[serde(default)]
    pub stereo_descent: i32,

    /// Extra audio delay relative to video, in 90 kHz ticks
    #[serde(default)]
    pub video_audio_delay: i32,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_mixer_device() -> String {
    "default".to_string()
}

fn default_mixer_channel() -> String {
    "PCM".to_string()
}

fn default_buffer_time_ms() -> u32 {
    336
}

fn default_max_factor() -> i32 {
    2000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            device_ac3: String::new(),
            driver: None,
            mixer_device: default_mixer_device(),
            mixer_channel: default_mixer_channel(),
            buffer_time_ms: default_buffer_time_ms(),
            soft_volume: false,
            normalize: false,
            max_normalize: default_max_factor(),
            compression: false,
            max_compression: default_max_factor(),
            stereo_descent: 0,
            video_audio_delay: 0,
        }
    }
}

impl OutputConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing keys fall back to their defaults, so a partial file (or an
    /// empty one) is valid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AudioError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| AudioError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Configuration for a silent engine (noop sink), used by tools that
    /// need the pipeline without a device.
    pub fn silent() -> Self {
        Self {
            device: String::new(),
            ..Self::default()
        }
    }
}
