//! OSS DSP adapter
//!
//! Talks to a character device (`/dev/dsp` style) with the classic ioctl
//! set: format/channels/speed at setup, output-space queries to pace
//! writes, output-delay for the clock and a reset to drop buffered data.
//! The device file is opened nonblocking so a full kernel buffer shows up
//! as a short write instead of a stall.

use super::{start_threshold, DrainGain, SetupOutcome, Sink, Tick};
use crate::config::OutputConfig;
use crate::dsp::filter::amplify_bytes;
use crate::error::{AudioError, Result};
use crate::ring::Segment;
use nix::libc;
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use tracing::{debug, warn};

const AFMT_S16_LE: libc::c_uint = 0x0000_0010;
const AFMT_S16_BE: libc::c_uint = 0x0000_0020;
const AFMT_AC3: libc::c_uint = 0x0000_0400;

#[cfg(target_endian = "little")]
const AFMT_S16_NE: libc::c_uint = AFMT_S16_LE;
#[cfg(target_endian = "big")]
const AFMT_S16_NE: libc::c_uint = AFMT_S16_BE;

/// SNDCTL_DSP_GETOSPACE result.
#[repr(C)]
#[derive(Debug, Default)]
struct BufferInfo {
    fragments: libc::c_int,
    fragstotal: libc::c_int,
    fragsize: libc::c_int,
    bytes: libc::c_int,
}

const DSP_MAGIC: u8 = b'P';
nix::ioctl_none!(dsp_halt_output, DSP_MAGIC, 0);
nix::ioctl_readwrite!(dsp_set_speed, DSP_MAGIC, 2, libc::c_int);
nix::ioctl_readwrite!(dsp_set_format, DSP_MAGIC, 5, libc::c_uint);
nix::ioctl_readwrite!(dsp_set_channels, DSP_MAGIC, 6, libc::c_int);
nix::ioctl_read!(dsp_out_space, DSP_MAGIC, 12, BufferInfo);
nix::ioctl_read!(dsp_out_delay, DSP_MAGIC, 23, libc::c_int);

const MIXER_MAGIC: u8 = b'M';
const MIXER_CHANNEL_VOLUME: u8 = 0;
const MIXER_CHANNEL_PCM: u8 = 4;
nix::ioctl_readwrite!(mixer_set_volume, MIXER_MAGIC, MIXER_CHANNEL_VOLUME, libc::c_int);
nix::ioctl_readwrite!(mixer_set_pcm, MIXER_MAGIC, MIXER_CHANNEL_PCM, libc::c_int);

pub struct OssSink {
    device: String,
    device_ac3: String,
    mixer_device: String,
    mixer_channel: String,
    dsp: Option<File>,
    mixer: Option<File>,
    rate: u32,
    channels: u32,
    fragment_bytes: usize,
    broken_logged: bool,
}

impl OssSink {
    pub fn new(config: &OutputConfig) -> Self {
        let mixer_device = if config.mixer_device.starts_with('/') {
            config.mixer_device.clone()
        } else {
            "/dev/mixer".to_string()
        };
        Self {
            device: config.device.clone(),
            device_ac3: config.device_ac3.clone(),
            mixer_device,
            mixer_channel: config.mixer_channel.clone(),
            dsp: None,
            mixer: None,
            rate: 0,
            channels: 0,
            fragment_bytes: 0,
            broken_logged: false,
        }
    }

    fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

impl Sink for OssSink {
    fn name(&self) -> &'static str {
        "oss"
    }

    fn init(&mut self) -> Result<()> {
        match File::options()
            .read(true)
            .write(true)
            .open(&self.mixer_device)
        {
            Ok(file) => self.mixer = Some(file),
            Err(e) => warn!("audio/oss: cannot open mixer {}: {}", self.mixer_device, e),
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.dsp = None;
        self.mixer = None;
    }

    fn setup(
        &mut self,
        rate: &mut u32,
        channels: &mut u32,
        use_ac3: bool,
        target_ms: u64,
    ) -> Result<SetupOutcome> {
        self.dsp = None;
        let device = if use_ac3 && !self.device_ac3.is_empty() {
            self.device_ac3.as_str()
        } else {
            self.device.as_str()
        };
        let requested_rate = *rate;
        let requested_channels = *channels;

        let dsp = File::options()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|e| AudioError::Device(format!("cannot open {}: {}", device, e)))?;
        let fd = dsp.as_raw_fd();

        let mut format: libc::c_uint = if use_ac3 { AFMT_AC3 } else { AFMT_S16_NE };
        let wanted = format;
        unsafe { dsp_set_format(fd, &mut format) }
            .map_err(|e| AudioError::Device(format!("set format: {}", e)))?;
        if format != wanted {
            return Err(AudioError::Device(format!(
                "format 0x{:x} refused, device offers 0x{:x}",
                wanted, format
            )));
        }

        let mut chan: libc::c_int = *channels as libc::c_int;
        unsafe { dsp_set_channels(fd, &mut chan) }
            .map_err(|_| AudioError::UnsupportedChannels(*channels))?;
        if chan <= 0 {
            return Err(AudioError::UnsupportedChannels(*channels));
        }

        let mut speed: libc::c_int = *rate as libc::c_int;
        unsafe { dsp_set_speed(fd, &mut speed) }
            .map_err(|e| AudioError::Device(format!("set speed: {}", e)))?;
        if speed <= 0 {
            return Err(AudioError::UnsupportedRate(*rate));
        }

        *rate = speed as u32;
        *channels = chan as u32;

        let mut info = BufferInfo::default();
        unsafe { dsp_out_space(fd, &mut info) }
            .map_err(|e| AudioError::Device(format!("query buffer: {}", e)))?;
        self.fragment_bytes = info.fragsize.max(256) as usize;

        let threshold = start_threshold(self.fragment_bytes, *rate, *channels, target_ms);
        debug!(
            "audio/oss: {} {}Hz {}ch fragment {} bytes",
            device, *rate, *channels, self.fragment_bytes
        );
        self.rate = *rate;
        self.channels = *channels;
        self.dsp = Some(dsp);
        Ok(SetupOutcome {
            adjusted: *rate != requested_rate || *channels != requested_channels,
            start_threshold: threshold,
        })
    }

    fn tick(&mut self, segment: &Segment, gain: Option<DrainGain>) -> Tick {
        let Some(dsp) = self.dsp.as_mut() else {
            return Tick::Error;
        };
        let frame_bytes = self.channels as usize * 2;
        if frame_bytes == 0 {
            return Tick::Error;
        }

        let mut info = BufferInfo::default();
        if let Err(e) = unsafe { dsp_out_space(dsp.as_raw_fd(), &mut info) } {
            if !self.broken_logged {
                self.broken_logged = true;
                warn!("audio/oss: buffer query failed: {}", e);
            }
            return Tick::Error;
        }
        let avail = info.bytes.max(0) as usize;
        if avail < 256 || avail < frame_bytes {
            return Tick::Full;
        }

        let mut io_error = false;
        let n = segment.ring().drain(avail - avail % frame_bytes, |slice| {
            let usable = slice.len() - slice.len() % frame_bytes;
            if usable == 0 {
                return 0;
            }
            let slice = &mut slice[..usable];
            if let Some(g) = gain {
                amplify_bytes(slice, g.gain, g.mute);
            }
            match dsp.write(slice) {
                Ok(written) => written,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(e) => {
                    warn!("audio/oss: write failed: {}", e);
                    io_error = true;
                    0
                }
            }
        });

        if io_error {
            return Tick::Error;
        }
        if n > 0 {
            Tick::Progress
        } else {
            Tick::Drained
        }
    }

    fn flush(&mut self) {
        if let Some(dsp) = self.dsp.as_ref() {
            if let Err(e) = unsafe { dsp_halt_output(dsp.as_raw_fd()) } {
                warn!("audio/oss: halt failed: {}", e);
            }
        }
    }

    fn play(&mut self) {
        // writes restart a halted DSP device on their own
    }

    fn pause(&mut self) {
        // no hardware pause: drop buffered data, playback resumes on write
        self.flush();
    }

    fn set_volume(&mut self, volume: u32) {
        let Some(mixer) = self.mixer.as_ref() else {
            return;
        };
        let percent = (volume.min(1000) * 100 / 1000) as libc::c_int;
        let mut value: libc::c_int = percent | (percent << 8);
        let fd = mixer.as_raw_fd();
        let result = if self.mixer_channel.eq_ignore_ascii_case("pcm") {
            unsafe { mixer_set_pcm(fd, &mut value) }
        } else {
            unsafe { mixer_set_volume(fd, &mut value) }
        };
        if let Err(e) = result {
            warn!("audio/oss: cannot set volume: {}", e);
        }
    }

    fn delay_ticks(&mut self) -> i64 {
        let Some(dsp) = self.dsp.as_ref() else {
            return 0;
        };
        if self.rate == 0 {
            return 0;
        }
        let mut bytes: libc::c_int = 0;
        if unsafe { dsp_out_delay(dsp.as_raw_fd(), &mut bytes) }.is_err() {
            return 0;
        }
        let frames = bytes.max(0) as i64 / self.frame_bytes().max(1) as i64;
        frames * 90_000 / self.rate as i64
    }
}
