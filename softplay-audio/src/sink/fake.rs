//! Programmable sink for tests
//!
//! Records every interaction (setups, writes, flushes, transport calls)
//! and lets tests shape the device: how many bytes a tick accepts, the
//! reported delay, the period size and which channel counts "exist".
//! The handle half stays with the test while the sink half is moved into
//! the engine.

use super::{start_threshold, DrainGain, SetupOutcome, Sink, Tick};
use crate::dsp::filter::amplify_bytes;
use crate::error::{AudioError, Result};
use crate::ring::Segment;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Setup {
        rate: u32,
        channels: u32,
        use_ac3: bool,
    },
    Write {
        bytes: usize,
    },
    Flush,
    Play,
    Pause,
}

#[derive(Debug)]
struct FakeState {
    events: Mutex<Vec<SinkEvent>>,
    written: Mutex<Vec<u8>>,
    total_written: AtomicUsize,
    accept_per_tick: AtomicUsize,
    delay_ticks: AtomicI64,
    period_bytes: AtomicUsize,
    supported_channels: Mutex<Vec<u32>>,
    volume: AtomicU32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            total_written: AtomicUsize::new(0),
            accept_per_tick: AtomicUsize::new(usize::MAX),
            delay_ticks: AtomicI64::new(0),
            period_bytes: AtomicUsize::new(1024),
            supported_channels: Mutex::new((1..=8).collect()),
            volume: AtomicU32::new(0),
        }
    }
}

pub struct FakeSink {
    state: Arc<FakeState>,
}

/// Test-side view of a [`FakeSink`].
#[derive(Clone)]
pub struct FakeSinkHandle {
    state: Arc<FakeState>,
}

impl FakeSink {
    pub fn new() -> (Self, FakeSinkHandle) {
        let state = Arc::new(FakeState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeSinkHandle { state },
        )
    }
}

impl FakeSinkHandle {
    /// Everything recorded so far, in order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.state.events.lock().unwrap().clone()
    }

    /// Forget recorded events and written bytes (handy right after engine
    /// construction, which probes the device repeatedly).
    pub fn clear(&self) {
        self.state.events.lock().unwrap().clear();
        self.state.written.lock().unwrap().clear();
        self.state.total_written.store(0, Ordering::SeqCst);
    }

    /// All bytes the device accepted, in arrival order.
    pub fn written(&self) -> Vec<u8> {
        self.state.written.lock().unwrap().clone()
    }

    pub fn total_written(&self) -> usize {
        self.state.total_written.load(Ordering::SeqCst)
    }

    /// The setup calls among the recorded events.
    pub fn setups(&self) -> Vec<SinkEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Setup { .. }))
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Flush))
            .count()
    }

    /// Cap how many bytes each tick may accept (`usize::MAX` = unlimited,
    /// 0 = device full).
    pub fn set_accept_per_tick(&self, bytes: usize) {
        self.state.accept_per_tick.store(bytes, Ordering::SeqCst);
    }

    pub fn set_delay_ticks(&self, ticks: i64) {
        self.state.delay_ticks.store(ticks, Ordering::SeqCst);
    }

    pub fn set_period_bytes(&self, bytes: usize) {
        self.state.period_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Restrict which channel counts the fake device supports.
    pub fn set_supported_channels(&self, channels: &[u32]) {
        *self.state.supported_channels.lock().unwrap() = channels.to_vec();
    }

    pub fn volume(&self) -> u32 {
        self.state.volume.load(Ordering::SeqCst)
    }
}

impl Sink for FakeSink {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn exit(&mut self) {}

    fn setup(
        &mut self,
        rate: &mut u32,
        channels: &mut u32,
        use_ac3: bool,
        target_ms: u64,
    ) -> Result<SetupOutcome> {
        if !self
            .state
            .supported_channels
            .lock()
            .unwrap()
            .contains(channels)
        {
            return Err(AudioError::UnsupportedChannels(*channels));
        }
        self.state.events.lock().unwrap().push(SinkEvent::Setup {
            rate: *rate,
            channels: *channels,
            use_ac3,
        });
        let period = self.state.period_bytes.load(Ordering::SeqCst);
        Ok(SetupOutcome {
            adjusted: false,
            start_threshold: start_threshold(period, *rate, *channels, target_ms),
        })
    }

    fn tick(&mut self, segment: &Segment, gain: Option<DrainGain>) -> Tick {
        let accept = self.state.accept_per_tick.load(Ordering::SeqCst);
        if accept == 0 {
            return Tick::Full;
        }
        let state = &self.state;
        let n = segment.ring().drain(accept, |slice| {
            if let Some(g) = gain {
                amplify_bytes(slice, g.gain, g.mute);
            }
            state.written.lock().unwrap().extend_from_slice(slice);
            slice.len()
        });
        if n > 0 {
            state.total_written.fetch_add(n, Ordering::SeqCst);
            state.events.lock().unwrap().push(SinkEvent::Write { bytes: n });
            Tick::Progress
        } else {
            Tick::Drained
        }
    }

    fn flush(&mut self) {
        self.state.events.lock().unwrap().push(SinkEvent::Flush);
    }

    fn play(&mut self) {
        self.state.events.lock().unwrap().push(SinkEvent::Play);
    }

    fn pause(&mut self) {
        self.state.events.lock().unwrap().push(SinkEvent::Pause);
    }

    fn set_volume(&mut self, volume: u32) {
        self.state.volume.store(volume, Ordering::SeqCst);
    }

    fn delay_ticks(&mut self) -> i64 {
        self.state.delay_ticks.load(Ordering::SeqCst)
    }
}
