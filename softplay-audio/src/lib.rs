//! # Softplay Audio Output
//!
//! The audio half of a video playback pipeline: takes decoded PCM bursts
//! (or encoded AC3 frames for pass-through) from the decoder, remixes
//! them to a format the hardware accepts, buffers them in a ring of
//! reconfigurable playback segments and streams them to a kernel audio
//! device, keeping a tight presentation-timestamp relationship with the
//! video side.
//!
//! **Architecture:** one producer (the decoder thread, through
//! [`AudioOutput`]) and one playback thread, meeting at a fixed arena of
//! eight segment rings. Format changes travel through the queue as new
//! segments, so the device is only reconfigured between segments and
//! never under the producer's feet.
//!
//! Sinks: ALSA PCM and OSS DSP on Linux, a silent noop fallback, and a
//! programmable fake for tests.

pub mod config;
pub mod dsp;
pub mod error;
pub mod output;
pub mod pts;
pub mod ring;
pub mod sink;

pub use config::OutputConfig;
pub use error::{AudioError, Result};
pub use output::engine::{AudioOutput, SetupChange};
pub use pts::NO_PTS;
