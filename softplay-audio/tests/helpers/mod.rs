#![allow(dead_code)]

//! Shared helpers for the engine integration tests

use softplay_audio::sink::fake::{FakeSink, FakeSinkHandle};
use softplay_audio::{AudioOutput, OutputConfig};
use std::time::{Duration, Instant};

/// Build an engine over a programmable fake sink and wipe the probing
/// traffic from the recording.
pub fn engine_with_fake(config: OutputConfig) -> (AudioOutput, FakeSinkHandle) {
    let (sink, handle) = FakeSink::new();
    let output = AudioOutput::with_sink(config, Box::new(sink)).expect("engine construction");
    handle.clear();
    (output, handle)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return condition();
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Negotiate a format and wait until the playback thread has actually
/// reconfigured the sink (it does so asynchronously, then parks until
/// enough audio is buffered).
pub fn setup_and_wait(output: &AudioOutput, handle: &FakeSinkHandle, rate: u32, channels: u32) {
    let before = handle.setups().len();
    let mut r = rate;
    let mut c = channels;
    output.setup(&mut r, &mut c, false).expect("setup");
    assert!(
        wait_for(Duration::from_secs(2), || handle.setups().len() > before),
        "playback thread never reconfigured the sink"
    );
}

/// Enqueue `data` in decoder-sized bursts.
pub fn enqueue_chunked(output: &AudioOutput, data: &[u8], chunk: usize) {
    for part in data.chunks(chunk) {
        output.enqueue(part);
    }
}

/// Wait until the sink has seen `expected` bytes in total, nudging the
/// start gate while polling (an empty enqueue re-evaluates it, like the
/// decoder's next burst would).
pub fn wait_for_written(output: &AudioOutput, handle: &FakeSinkHandle, expected: usize) -> bool {
    wait_for(Duration::from_secs(3), || {
        output.enqueue(&[]);
        handle.total_written() >= expected
    })
}
