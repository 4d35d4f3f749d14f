//! Sink adapters
//!
//! A sink is the capability set over one concrete kernel audio endpoint:
//! configure a format, push bytes, report buffered delay, flush, pause.
//! The engine selects exactly one adapter at init and drives it from the
//! playback thread; dynamic dispatch is fine for a set this small chosen
//! once.
//!
//! Adapters:
//! - `alsa`: the native PCM API (Linux)
//! - `oss`:  the character-device DSP API (Linux)
//! - `noop`: accepts everything silently
//! - `fake`: programmable, for tests

pub mod fake;
pub mod noop;

#[cfg(target_os = "linux")]
pub mod alsa;
#[cfg(target_os = "linux")]
pub mod oss;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::ring::{Segment, SEGMENT_RING_BYTES};
use tracing::warn;

/// Software gain for the outgoing slice, applied by the adapter right
/// before the bytes reach the device.
#[derive(Debug, Clone, Copy)]
pub struct DrainGain {
    /// 0..1000 scale, 1000 = unity
    pub gain: i32,
    pub mute: bool,
}

/// Outcome of one playback-thread iteration against the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Bytes were handed to the device
    Progress,
    /// The current segment's ring had nothing to offer
    Drained,
    /// The device buffer has no room; retry after a short sleep
    Full,
    /// A device error was absorbed; retry after a short sleep
    Error,
}

/// Result of configuring the sink for a format.
#[derive(Debug, Clone, Copy)]
pub struct SetupOutcome {
    /// The device forced a different rate or channel count
    pub adjusted: bool,
    /// Bytes of buffered audio required before playback should start
    pub start_threshold: usize,
}

/// Capability set over one kernel audio endpoint.
///
/// `setup`, `init`, `exit` and `set_volume` are called from the producer
/// thread while the playback thread is parked; `tick`, `flush`, `play`
/// and `pause` belong to the playback thread. The engine serializes all
/// of it behind one mutex.
pub trait Sink: Send {
    fn name(&self) -> &'static str;

    /// Open the mixer and discover device-wide facts. Called once.
    fn init(&mut self) -> Result<()>;

    /// Release every device handle. Called once, after the playback
    /// thread has stopped.
    fn exit(&mut self);

    /// (Re)open the endpoint for the given format. `rate` and `channels`
    /// are adjusted in place when the device forces a change. `target_ms`
    /// is the buffering goal the start threshold is derived from.
    fn setup(
        &mut self,
        rate: &mut u32,
        channels: &mut u32,
        use_ac3: bool,
        target_ms: u64,
    ) -> Result<SetupOutcome>;

    /// One write iteration: query writable space and move as many bytes
    /// as possible from `segment`'s ring into the device, applying `gain`
    /// on the way out when given.
    fn tick(&mut self, segment: &Segment, gain: Option<DrainGain>) -> Tick;

    /// Drop device state, leaving the endpoint ready for an immediate
    /// restart.
    fn flush(&mut self);

    /// Resume after `pause`.
    fn play(&mut self);

    /// Stop consuming without losing buffered data where the hardware
    /// allows it.
    fn pause(&mut self);

    /// Hardware volume, 0..1000. No-op for adapters without a mixer.
    fn set_volume(&mut self, volume: u32);

    /// Frames still queued inside the device, as 90 kHz ticks.
    fn delay_ticks(&mut self) -> i64;
}

/// Start threshold for a format: at least the device period, at most a
/// third of a segment ring, aiming for `target_ms` of buffered audio.
pub fn start_threshold(min_bytes: usize, rate: u32, channels: u32, target_ms: u64) -> usize {
    let delay_bytes = (rate as u64 * channels as u64 * 2 * target_ms / 1000) as usize;
    min_bytes.max(delay_bytes).min(SEGMENT_RING_BYTES / 3)
}

/// Pick the adapter for `config`: an explicit `driver` wins, otherwise an
/// empty device string means noop and a leading `/` prefers the DSP
/// adapter. Unavailable choices fall back to noop.
pub fn open_sink(config: &OutputConfig) -> Box<dyn Sink> {
    let preferred = match config.driver.as_deref() {
        Some(name) => name,
        None if config.device.is_empty() => "noop",
        None if config.device.starts_with('/') => "oss",
        None => "alsa",
    };
    match preferred {
        #[cfg(target_os = "linux")]
        "alsa" => Box::new(alsa::AlsaSink::new(config)),
        #[cfg(target_os = "linux")]
        "oss" => Box::new(oss::OssSink::new(config)),
        "noop" => Box::new(noop::NoopSink::default()),
        other => {
            warn!("audio: driver {:?} unavailable, falling back to noop", other);
            Box::new(noop::NoopSink::default())
        }
    }
}
