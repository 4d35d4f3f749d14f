//! ALSA PCM adapter
//!
//! Drives a nonblocking PCM handle through the avail/write/recover cycle:
//! each tick asks the device for writable space, hands it one contiguous
//! ring slice and recovers from underruns in place. Pass-through opens the
//! AC3 device string instead of the PCM one. Hardware volume goes through
//! a mixer simple element.
//!
//! The software start threshold is pushed into the device so it begins
//! playing on its own once enough frames are queued; a device stuck in
//! the prepared state with a full buffer is kicked explicitly, once per
//! session with a diagnostic.

use super::{start_threshold, DrainGain, SetupOutcome, Sink, Tick};
use crate::config::OutputConfig;
use crate::dsp::filter::amplify_bytes;
use crate::error::{AudioError, Result};
use crate::ring::Segment;
use alsa::mixer::{Mixer, SelemId};
use alsa::pcm::{Access, Format, Frames, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use tracing::{debug, warn};

fn device_error(err: alsa::Error) -> AudioError {
    AudioError::Device(err.to_string())
}

pub struct AlsaSink {
    device: String,
    device_ac3: String,
    mixer_device: String,
    mixer_channel: String,
    pcm: Option<PCM>,
    mixer: Option<Mixer>,
    rate: u32,
    channels: u32,
    can_pause: bool,
    broken_logged: bool,
    scratch: Vec<i16>,
}

impl AlsaSink {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            device: config.device.clone(),
            device_ac3: config.device_ac3.clone(),
            mixer_device: config.mixer_device.clone(),
            mixer_channel: config.mixer_channel.clone(),
            pcm: None,
            mixer: None,
            rate: 0,
            channels: 0,
            can_pause: false,
            broken_logged: false,
            scratch: Vec::new(),
        }
    }

    fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

impl Sink for AlsaSink {
    fn name(&self) -> &'static str {
        "alsa"
    }

    fn init(&mut self) -> Result<()> {
        match Mixer::new(&self.mixer_device, false) {
            Ok(mixer) => self.mixer = Some(mixer),
            Err(e) => warn!(
                "audio/alsa: cannot open mixer {}: {}",
                self.mixer_device, e
            ),
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.pcm = None;
        self.mixer = None;
    }

    fn setup(
        &mut self,
        rate: &mut u32,
        channels: &mut u32,
        use_ac3: bool,
        target_ms: u64,
    ) -> Result<SetupOutcome> {
        self.pcm = None;
        let device = if use_ac3 && !self.device_ac3.is_empty() {
            self.device_ac3.as_str()
        } else {
            self.device.as_str()
        };
        let requested_rate = *rate;
        let requested_channels = *channels;

        let pcm = PCM::new(device, Direction::Playback, true)
            .map_err(|e| AudioError::Device(format!("cannot open {}: {}", device, e)))?;
        let (buffer_frames, period_frames);
        {
            let hwp = HwParams::any(&pcm).map_err(device_error)?;
            hwp.set_access(Access::RWInterleaved).map_err(device_error)?;
            hwp.set_format(Format::s16()).map_err(device_error)?;
            hwp.set_channels(*channels)
                .map_err(|_| AudioError::UnsupportedChannels(*channels))?;
            hwp.set_rate(*rate, ValueOr::Nearest).map_err(device_error)?;
            pcm.hw_params(&hwp).map_err(device_error)?;
            *rate = hwp.get_rate().map_err(device_error)?;
            *channels = hwp.get_channels().map_err(device_error)?;
            buffer_frames = hwp.get_buffer_size().map_err(device_error)?;
            period_frames = hwp.get_period_size().map_err(device_error)?;
            self.can_pause = hwp.can_pause();
        }

        let frame_bytes = *channels as usize * 2;
        let threshold = start_threshold(
            period_frames as usize * frame_bytes,
            *rate,
            *channels,
            target_ms,
        );
        {
            let swp = pcm.sw_params_current().map_err(device_error)?;
            let threshold_frames = ((threshold / frame_bytes) as Frames).min(buffer_frames).max(1);
            swp.set_start_threshold(threshold_frames)
                .map_err(device_error)?;
            pcm.sw_params(&swp).map_err(device_error)?;
        }

        debug!(
            "audio/alsa: {} {}Hz {}ch buffer {} period {} pause {}",
            device, *rate, *channels, buffer_frames, period_frames, self.can_pause
        );
        self.rate = *rate;
        self.channels = *channels;
        self.pcm = Some(pcm);
        Ok(SetupOutcome {
            adjusted: *rate != requested_rate || *channels != requested_channels,
            start_threshold: threshold,
        })
    }

    fn tick(&mut self, segment: &Segment, gain: Option<DrainGain>) -> Tick {
        let Some(pcm) = self.pcm.as_ref() else {
            return Tick::Error;
        };
        let frame_bytes = self.frame_bytes();
        if frame_bytes == 0 {
            return Tick::Error;
        }

        let avail = match pcm.avail_update() {
            Ok(frames) => frames,
            Err(e) => {
                if pcm.recover(e.errno(), true).is_err() {
                    warn!("audio/alsa: avail recovery failed: {}", e);
                    return Tick::Error;
                }
                match pcm.avail_update() {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("audio/alsa: avail still failing: {}", e);
                        return Tick::Error;
                    }
                }
            }
        };
        let avail_bytes = avail.max(0) as usize * frame_bytes;
        if avail_bytes < 256 {
            if pcm.state() == State::Prepared {
                // full but never started: the driver missed its own start
                // threshold, kick it
                if !self.broken_logged {
                    self.broken_logged = true;
                    warn!("audio/alsa: device stuck in prepared state, starting manually");
                }
                let _ = pcm.start();
            }
            return Tick::Full;
        }

        let scratch = &mut self.scratch;
        let mut write_error: Option<alsa::Error> = None;
        let n = segment.ring().drain(avail_bytes - avail_bytes % frame_bytes, |slice| {
            let usable = slice.len() - slice.len() % frame_bytes;
            if usable == 0 {
                return 0;
            }
            let slice = &mut slice[..usable];
            if let Some(g) = gain {
                amplify_bytes(slice, g.gain, g.mute);
            }
            scratch.clear();
            scratch.extend(
                slice
                    .chunks_exact(2)
                    .map(|c| i16::from_ne_bytes([c[0], c[1]])),
            );
            match pcm.io_i16() {
                Ok(io) => match io.writei(scratch) {
                    Ok(frames) => frames * frame_bytes,
                    Err(e) => {
                        write_error = Some(e);
                        0
                    }
                },
                Err(e) => {
                    write_error = Some(e);
                    0
                }
            }
        });

        if let Some(e) = write_error {
            if pcm.recover(e.errno(), false).is_err() {
                warn!("audio/alsa: write failed: {}", e);
                return Tick::Error;
            }
            // recovered underrun, retry on the next iteration
            return Tick::Progress;
        }
        if n > 0 {
            Tick::Progress
        } else {
            Tick::Drained
        }
    }

    fn flush(&mut self) {
        if let Some(pcm) = self.pcm.as_ref() {
            let _ = pcm.drop();
            let _ = pcm.prepare();
        }
    }

    fn play(&mut self) {
        if let Some(pcm) = self.pcm.as_ref() {
            if self.can_pause && pcm.state() == State::Paused {
                let _ = pcm.pause(false);
            }
        }
    }

    fn pause(&mut self) {
        if let Some(pcm) = self.pcm.as_ref() {
            if self.can_pause {
                let _ = pcm.pause(true);
            } else {
                let _ = pcm.drop();
                let _ = pcm.prepare();
            }
        }
    }

    fn set_volume(&mut self, volume: u32) {
        let Some(mixer) = self.mixer.as_ref() else {
            return;
        };
        let id = SelemId::new(&self.mixer_channel, 0);
        let Some(elem) = mixer.find_selem(&id) else {
            warn!("audio/alsa: mixer channel {} not found", self.mixer_channel);
            return;
        };
        let (min, max) = elem.get_playback_volume_range();
        let value = min + (max - min) * volume.min(1000) as i64 / 1000;
        if let Err(e) = elem.set_playback_volume_all(value) {
            warn!("audio/alsa: cannot set volume: {}", e);
        }
    }

    fn delay_ticks(&mut self) -> i64 {
        let Some(pcm) = self.pcm.as_ref() else {
            return 0;
        };
        if self.rate == 0 {
            return 0;
        }
        match pcm.state() {
            State::Running | State::Draining => {}
            _ => return 0,
        }
        match pcm.delay() {
            Ok(frames) if frames > 0 => frames as i64 * 90_000 / self.rate as i64,
            _ => 0,
        }
    }
}
