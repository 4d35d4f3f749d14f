//! Public facade and A/V sync control
//!
//! [`AudioOutput`] owns the segment queue, the selected sink and the
//! playback thread. The decoder thread calls it to negotiate formats,
//! push sample bursts and steer synchronisation; everything here is
//! non-blocking apart from the deliberately bounded flush poll.
//!
//! # Synchronisation model
//!
//! Playback does not begin the moment data arrives. Each enqueue checks a
//! start threshold: once the video side has signalled readiness, one
//! threshold of buffered audio starts the clock; without that signal the
//! engine waits for four thresholds before forcing a start. When video
//! readiness comes with a timestamp, the engine computes how much of the
//! buffered audio lies before the first video frame and skips it,
//! sample-accurately, so the two streams open together.

use crate::config::OutputConfig;
use crate::dsp::filter::FilterChain;
use crate::dsp::remix::remix;
use crate::error::{AudioError, Result};
use crate::pts::{align_to_frame, bytes_to_ticks, ticks_to_bytes, NO_PTS};
use crate::ring::{Segment, SegmentQueue};
use crate::sink::{self, DrainGain, Sink};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::worker;

/// Hardware sample rates the engine will negotiate.
pub const HW_RATES: [u32; 2] = [44_100, 48_000];

/// Ticks of video start-up the skip computation allows for: fifteen
/// frames of 20 ms each.
const VIDEO_STARTUP_TICKS: i64 = 15 * 20 * 90;

/// Skips longer than this are considered bogus timestamps and ignored.
const MAX_SKIP_TICKS: i64 = 2 * 90_000;

/// How long `flush_buffers` waits for the playback thread to drop the
/// queued data.
const FLUSH_POLL_ROUNDS: u32 = 48;

/// Result of a format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupChange {
    /// The requested format is used as-is
    Unchanged,
    /// Rate or channel count were adjusted in place
    Adjusted,
}

/// Input-to-hardware channel mapping, probed from the device at init.
///
/// Entry zero means the combination is unusable; otherwise it names the
/// channel count the device is opened with and the remixer targets.
pub(crate) struct ChannelMatrix {
    map: [[u32; 9]; HW_RATES.len()],
}

impl ChannelMatrix {
    pub fn rate_index(rate: u32) -> Option<usize> {
        HW_RATES.iter().position(|&r| r == rate)
    }

    pub fn hw_channels(&self, rate: u32, channels: u32) -> Option<u32> {
        let rate_index = Self::rate_index(rate)?;
        if !(1..=8).contains(&channels) {
            return None;
        }
        match self.map[rate_index][channels as usize] {
            0 => None,
            hw => Some(hw),
        }
    }

    /// Probe every rate/channel combination once and derive substitutions
    /// for the unsupported ones (surround falls back to a stereo downmix,
    /// 5.0 prefers a zero-filled 5.1). Returns the matrix and the start
    /// threshold reported by the last successful probe.
    fn probe(sink: &mut dyn Sink, target_ms: u64) -> (Self, Option<usize>) {
        let mut native = [[false; 9]; HW_RATES.len()];
        let mut last_threshold = None;
        for (rate_index, &rate) in HW_RATES.iter().enumerate() {
            for channels in 1..=8u32 {
                let mut probe_rate = rate;
                let mut probe_channels = channels;
                match sink.setup(&mut probe_rate, &mut probe_channels, false, target_ms) {
                    Ok(outcome)
                        if !outcome.adjusted
                            && probe_rate == rate
                            && probe_channels == channels =>
                    {
                        native[rate_index][channels as usize] = true;
                        last_threshold = Some(outcome.start_threshold);
                    }
                    Ok(_) => {}
                    Err(_) => {}
                }
            }
        }

        let mut map = [[0u32; 9]; HW_RATES.len()];
        for (rate_index, &rate) in HW_RATES.iter().enumerate() {
            for channels in 1..=8usize {
                map[rate_index][channels] = if native[rate_index][channels] {
                    channels as u32
                } else {
                    match channels {
                        1 if native[rate_index][2] => 2,
                        2 if native[rate_index][1] => 1,
                        5 if native[rate_index][6] => 6,
                        3..=8 if native[rate_index][2] => 2,
                        _ => 0,
                    }
                };
            }
            let usable: Vec<u32> = (1..=8)
                .filter(|&ch| map[rate_index][ch as usize] != 0)
                .collect();
            info!("audio: {}Hz supports {:?} channels", rate, usable);
        }
        (Self { map }, last_threshold)
    }
}

/// Start-condition handshake between the facade and the playback thread.
pub(crate) struct StartGate {
    pub running: Mutex<bool>,
    pub cond: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            running: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Raise the start condition.
    pub fn wake(&self) {
        *self.running.lock().unwrap() = true;
        self.cond.notify_one();
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    /// Lower the running flag; the playback thread calls this before
    /// going back to its condition wait.
    pub fn park(&self) {
        *self.running.lock().unwrap() = false;
    }
}

/// State shared between the facade and the playback thread.
pub(crate) struct EngineShared {
    pub queue: SegmentQueue,
    pub sink: Mutex<Box<dyn Sink>>,
    pub filters: Mutex<FilterChain>,
    pub start: StartGate,
    pub shutdown: AtomicBool,
    pub paused: AtomicBool,
    pub video_ready: AtomicBool,
    pub pending_skip: AtomicUsize,
    pub start_threshold: AtomicUsize,
    pub soft_volume: AtomicBool,
    pub muted: AtomicBool,
    pub volume: AtomicI32,
    pub amplifier: AtomicI32,
    pub stereo_descent: AtomicI32,
    pub buffer_time_ms: AtomicU32,
    pub video_audio_delay: AtomicI32,
    pub matrix: ChannelMatrix,
}

impl EngineShared {
    /// Buffering goal in milliseconds, including the configured
    /// video-audio delay when it pushes audio later.
    pub fn delay_target_ms(&self) -> u64 {
        let extra = self.video_audio_delay.load(Ordering::Acquire).max(0) as u64 / 90;
        self.buffer_time_ms.load(Ordering::Acquire) as u64 + extra
    }

    /// Software gain for the outgoing slice of `segment`, or `None` when
    /// the bytes must pass untouched.
    pub fn drain_gain(&self, segment: &Segment) -> Option<DrainGain> {
        let mute = self.muted.load(Ordering::Acquire);
        let soft = self.soft_volume.load(Ordering::Acquire);
        if mute || (soft && !segment.use_ac3()) {
            Some(DrainGain {
                gain: self.amplifier.load(Ordering::Acquire),
                mute,
            })
        } else {
            None
        }
    }

    /// Recompute the effective amplifier from the volume, applying the
    /// stereo descent for two-channel PCM material, and push it to the
    /// mixer when volume is handled in hardware.
    pub fn apply_volume(&self) {
        let mut volume = self.volume.load(Ordering::Acquire);
        let segment = self.queue.read_segment();
        let descent = self.stereo_descent.load(Ordering::Acquire);
        if descent > 0 && segment.in_channels() == 2 && !segment.use_ac3() {
            volume = (volume - descent).max(0);
        }
        self.amplifier.store(volume, Ordering::Release);
        if !self.soft_volume.load(Ordering::Acquire) {
            self.sink.lock().unwrap().set_volume(volume.max(0) as u32);
        }
    }
}

/// The audio output engine.
///
/// One instance per process; the playback thread lives exactly as long
/// as the value. Dropping it (or calling [`close`](Self::close)) stops
/// the thread and releases the device.
pub struct AudioOutput {
    shared: Arc<EngineShared>,
    worker: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Build the engine for `config`: select and open the sink, probe the
    /// channel matrix and start the playback thread.
    pub fn new(config: OutputConfig) -> Result<Self> {
        let sink = sink::open_sink(&config);
        Self::with_sink(config, sink)
    }

    /// Same as [`new`](Self::new) with a caller-provided sink. Tests use
    /// this to wire in the programmable fake.
    pub fn with_sink(config: OutputConfig, mut sink: Box<dyn Sink>) -> Result<Self> {
        info!("audio: using {} output", sink.name());
        sink.init()?;

        let target_ms =
            config.buffer_time_ms as u64 + (config.video_audio_delay.max(0) as u64) / 90;
        let (matrix, probed_threshold) = ChannelMatrix::probe(sink.as_mut(), target_ms);
        // a sane gate until the first real reconfiguration stores its own
        let initial_threshold =
            probed_threshold.unwrap_or_else(|| sink::start_threshold(4096, 48_000, 2, target_ms));

        let shared = Arc::new(EngineShared {
            queue: SegmentQueue::new(),
            sink: Mutex::new(sink),
            filters: Mutex::new(FilterChain::new(
                config.normalize,
                config.max_normalize,
                config.compression,
                config.max_compression,
            )),
            start: StartGate::new(),
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            video_ready: AtomicBool::new(false),
            pending_skip: AtomicUsize::new(0),
            start_threshold: AtomicUsize::new(initial_threshold),
            soft_volume: AtomicBool::new(config.soft_volume),
            muted: AtomicBool::new(false),
            volume: AtomicI32::new(1000),
            amplifier: AtomicI32::new(1000),
            stereo_descent: AtomicI32::new(config.stereo_descent),
            buffer_time_ms: AtomicU32::new(config.buffer_time_ms),
            video_audio_delay: AtomicI32::new(config.video_audio_delay),
            matrix,
        });
        let worker = worker::spawn(Arc::clone(&shared));
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Stop the playback thread and release the device.
    pub fn close(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.start.cond.notify_one();
            if handle.join().is_err() {
                error!("audio: playback thread panicked");
            }
            self.shared.sink.lock().unwrap().exit();
        }
    }

    /// Negotiate a new stream format by allocating the next playback
    /// segment. `rate` and `channels` are adjusted in place when the
    /// hardware needs a different layout; [`SetupChange::Adjusted`] says
    /// so. Fails when the format is unusable or all segments are in
    /// flight.
    pub fn setup(&self, rate: &mut u32, channels: &mut u32, use_ac3: bool) -> Result<SetupChange> {
        let shared = &self.shared;
        let hw_channels = shared
            .matrix
            .hw_channels(*rate, *channels)
            .ok_or_else(|| {
                if ChannelMatrix::rate_index(*rate).is_none() {
                    AudioError::UnsupportedRate(*rate)
                } else {
                    AudioError::UnsupportedChannels(*channels)
                }
            })?;
        shared
            .queue
            .add(*rate, *channels, *rate, hw_channels, use_ac3)?;
        debug!(
            "audio: new segment {}Hz {}ch -> {}ch{}",
            rate,
            channels,
            hw_channels,
            if use_ac3 { " pass-through" } else { "" }
        );
        shared.start.wake();
        if hw_channels != *channels {
            *channels = hw_channels;
            Ok(SetupChange::Adjusted)
        } else {
            Ok(SetupChange::Unchanged)
        }
    }

    /// Enqueue one burst of decoded samples (or encoded pass-through
    /// bytes) into the current write segment.
    ///
    /// PCM bursts are remixed to the hardware layout and run through the
    /// enabled filters first. The call never blocks beyond the copies it
    /// performs; bytes that do not fit are counted and dropped.
    pub fn enqueue(&self, data: &[u8]) {
        let shared = &self.shared;
        let segment = shared.queue.write_segment();
        if !segment.is_configured() {
            debug!("audio: enqueue before setup, {} bytes dropped", data.len());
            return;
        }
        if !data.is_empty() && segment.packet_size() == 0 {
            segment.set_packet_size(data.len());
            debug!("audio: packet size {} bytes", data.len());
        }

        let staging;
        let mut bytes: &[u8] = if segment.use_ac3() {
            data
        } else {
            let in_channels = segment.in_channels();
            let hw_channels = segment.hw_channels();
            let frame = in_channels as usize * 2;
            let usable = data.len() - data.len() % frame;
            if usable < data.len() {
                warn!(
                    "audio: dropping {} bytes of a partial frame",
                    data.len() - usable
                );
            }
            let mut samples: Vec<i16> = data[..usable]
                .chunks_exact(2)
                .map(|c| i16::from_ne_bytes([c[0], c[1]]))
                .collect();
            let mut remixed = Vec::new();
            let processed: &mut Vec<i16> = if in_channels == hw_channels {
                &mut samples
            } else {
                remix(&samples, in_channels, hw_channels, &mut remixed);
                &mut remixed
            };
            shared.filters.lock().unwrap().process(processed);
            staging = {
                let mut out = Vec::with_capacity(processed.len() * 2);
                for &s in processed.iter() {
                    out.extend_from_slice(&s.to_ne_bytes());
                }
                out
            };
            &staging
        };

        // a queued sync skip eats leading bytes before they reach the ring
        let skip = shared.pending_skip.load(Ordering::Acquire);
        if skip > 0 {
            let take = skip.min(bytes.len());
            bytes = &bytes[take..];
            shared.pending_skip.store(skip - take, Ordering::Release);
        }
        if !bytes.is_empty() {
            let written = segment.ring().write(bytes);
            if written != bytes.len() {
                error!("audio: ring full, {} bytes lost", bytes.len() - written);
            }
            segment.advance_pts(written);
        }

        if !shared.start.is_running() {
            let used = segment.ring().used();
            let threshold = shared.start_threshold.load(Ordering::Acquire);
            let gate = if shared.video_ready.load(Ordering::Acquire) {
                threshold
            } else {
                threshold.saturating_mul(4)
            };
            if used > gate {
                debug!("audio: starting playback with {} bytes buffered", used);
                shared.start.wake();
            }
        }
    }

    /// The video pipeline is ready to present. With a valid timestamp on
    /// both sides this aligns the first audio sample to the first video
    /// frame by skipping buffered audio (and, when the skip outruns the
    /// buffer, queueing the remainder against future enqueues).
    pub fn video_ready(&self, video_pts: i64) {
        let shared = &self.shared;
        let segment = shared.queue.write_segment();
        let write_pts = segment.pts();
        if video_pts == NO_PTS || !segment.is_configured() || write_pts == NO_PTS {
            debug!("audio: video ready without valid timing");
            shared.video_ready.store(true, Ordering::Release);
            return;
        }

        let rate = segment.hw_rate();
        let channels = segment.hw_channels();
        let used = segment.ring().used();
        // timestamp of the next sample that will be played
        let audio_pts = write_pts - bytes_to_ticks(used, rate, channels);

        if !shared.start.is_running() {
            let buffer_ticks = shared.buffer_time_ms.load(Ordering::Acquire) as i64 * 90;
            let skip_ticks = video_pts - VIDEO_STARTUP_TICKS - buffer_ticks - audio_pts
                + shared.video_audio_delay.load(Ordering::Acquire) as i64;
            if skip_ticks > 0 && skip_ticks < MAX_SKIP_TICKS {
                let skip_bytes = align_to_frame(ticks_to_bytes(skip_ticks, rate, channels), channels);
                let in_ring = skip_bytes.min(used);
                shared
                    .pending_skip
                    .store(skip_bytes - in_ring, Ordering::Release);
                if in_ring > 0 {
                    segment.ring().advance(in_ring);
                }
                debug!(
                    "audio: sync skip {} ticks, {} bytes buffered, {} pending",
                    skip_ticks,
                    in_ring,
                    skip_bytes - in_ring
                );
            }
            if segment.ring().used() > shared.start_threshold.load(Ordering::Acquire) {
                shared.start.wake();
            }
        }
        shared.video_ready.store(true, Ordering::Release);
    }

    /// Drop all buffered audio as fast as possible.
    ///
    /// A fresh flush-marked segment inheriting the current format is
    /// queued; the playback thread coalesces it with anything older and
    /// resets the sink. Video readiness and any queued skip are cleared.
    /// The call polls briefly for the drop to happen but never longer
    /// than ~48 ms.
    pub fn flush_buffers(&self) {
        let shared = &self.shared;
        shared.video_ready.store(false, Ordering::Release);
        shared.pending_skip.store(0, Ordering::Release);

        let current = shared.queue.write_segment();
        if !current.is_configured() {
            return;
        }
        let result = shared.queue.add(
            current.in_rate(),
            current.in_channels(),
            current.hw_rate(),
            current.hw_channels(),
            current.use_ac3(),
        );
        if let Err(e) = result {
            error!("audio: cannot queue flush: {}", e);
            return;
        }

        for _ in 0..FLUSH_POLL_ROUNDS {
            if shared.queue.filled() == 0 {
                break;
            }
            // the playback thread may have parked below the threshold
            shared.start.wake();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Audio buffered ahead of the speaker, in 90 kHz ticks. Zero while
    /// stopped or while a reconfiguration is pending.
    pub fn delay(&self) -> i64 {
        let shared = &self.shared;
        if !shared.start.is_running() {
            return 0;
        }
        if shared.queue.filled() != 0 {
            return 0;
        }
        let segment = shared.queue.read_segment();
        if !segment.is_configured() {
            return 0;
        }
        let sink_delay = shared.sink.lock().unwrap().delay_ticks();
        sink_delay + bytes_to_ticks(segment.ring().used(), segment.hw_rate(), segment.hw_channels())
    }

    /// The audio clock: timestamp of the sample hitting the speaker right
    /// now, or [`NO_PTS`] when unknown.
    pub fn clock(&self) -> i64 {
        let pts = self.shared.queue.read_segment().pts();
        if pts == NO_PTS {
            return NO_PTS;
        }
        pts - self.delay()
    }

    /// Overwrite the write segment's timestamp; the decoder calls this
    /// with each burst's presentation time.
    pub fn set_clock(&self, pts: i64) {
        self.shared.queue.write_segment().set_pts(pts);
    }

    /// Free space in the write segment's ring.
    pub fn free_bytes(&self) -> usize {
        let segment = self.shared.queue.write_segment();
        if segment.is_configured() {
            segment.ring().free()
        } else {
            0
        }
    }

    /// Buffered bytes in the write segment's ring.
    pub fn used_bytes(&self) -> usize {
        let segment = self.shared.queue.write_segment();
        if segment.is_configured() {
            segment.ring().used()
        } else {
            0
        }
    }

    /// Resume after [`pause`](Self::pause).
    pub fn play(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    /// Stop consuming; the playback thread pauses the device
    /// cooperatively.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Set the volume (0..1000, 1000 = unity). Zero mutes.
    pub fn set_volume(&self, volume: u32) {
        let volume = volume.min(1000) as i32;
        self.shared.volume.store(volume, Ordering::Release);
        self.shared.muted.store(volume == 0, Ordering::Release);
        self.shared.apply_volume();
    }

    /// Apply volume in software instead of the hardware mixer.
    pub fn set_soft_volume(&self, enabled: bool) {
        self.shared.soft_volume.store(enabled, Ordering::Release);
    }

    /// Enable/disable the RMS normalizer and set its factor ceiling.
    pub fn set_normalize(&self, enabled: bool, max_factor: i32) {
        let mut filters = self.shared.filters.lock().unwrap();
        filters.normalize = enabled;
        filters.normalizer.set_max(max_factor);
        filters.normalizer.reset();
    }

    /// Enable/disable the peak compressor and set its factor ceiling.
    pub fn set_compression(&self, enabled: bool, max_factor: i32) {
        let mut filters = self.shared.filters.lock().unwrap();
        filters.compress = enabled;
        filters.compressor.set_max(max_factor);
        filters.compressor.reset();
    }

    /// Volume reduction for two-channel material (0..1000 units).
    pub fn set_stereo_descent(&self, descent: i32) {
        self.shared
            .stereo_descent
            .store(descent.clamp(0, 1000), Ordering::Release);
        self.shared.apply_volume();
    }

    /// Buffered-audio target before playback starts, in milliseconds.
    pub fn set_buffer_time(&self, milliseconds: u32) {
        self.shared
            .buffer_time_ms
            .store(milliseconds, Ordering::Release);
    }

    /// Extra audio delay relative to video, in 90 kHz ticks.
    pub fn set_video_audio_delay(&self, ticks: i32) {
        self.shared
            .video_audio_delay
            .store(ticks, Ordering::Release);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::fake::FakeSink;

    #[test]
    fn test_matrix_substitutes_downmix() {
        let (mut sink, handle) = FakeSink::new();
        handle.set_supported_channels(&[2]);
        let (matrix, _) = ChannelMatrix::probe(&mut sink, 336);

        assert_eq!(matrix.hw_channels(48_000, 2), Some(2));
        assert_eq!(matrix.hw_channels(48_000, 1), Some(2));
        for channels in 3..=8 {
            assert_eq!(matrix.hw_channels(48_000, channels), Some(2));
        }
        assert_eq!(matrix.hw_channels(32_000, 2), None);
        assert_eq!(matrix.hw_channels(48_000, 9), None);
    }

    #[test]
    fn test_matrix_prefers_upmix_for_five_zero() {
        let (mut sink, handle) = FakeSink::new();
        handle.set_supported_channels(&[2, 6]);
        let (matrix, _) = ChannelMatrix::probe(&mut sink, 336);

        assert_eq!(matrix.hw_channels(44_100, 5), Some(6));
        assert_eq!(matrix.hw_channels(44_100, 7), Some(2));
    }

    #[test]
    fn test_matrix_mono_only_device() {
        let (mut sink, handle) = FakeSink::new();
        handle.set_supported_channels(&[1]);
        let (matrix, _) = ChannelMatrix::probe(&mut sink, 336);

        assert_eq!(matrix.hw_channels(48_000, 2), Some(1));
        assert_eq!(matrix.hw_channels(48_000, 6), None);
    }
}
