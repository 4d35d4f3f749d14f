//! A/V synchronisation tests: start gating, timestamp skip, audio clock
//!
//! Uses the programmable fake sink; see `engine_tests.rs` for the
//! buffering discipline these tests follow.

mod helpers;

use helpers::*;
use softplay_audio::{OutputConfig, NO_PTS};
use std::time::Duration;

fn silence(bytes: usize) -> Vec<u8> {
    vec![0u8; bytes]
}

/// Buffered audio alone must not start playback while video is pending.
#[test]
fn test_no_start_without_video_ready() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    // one second of silence: above one threshold, below four
    enqueue_chunked(&output, &silence(192_000), 19_200);
    output.video_ready(NO_PTS);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.total_written(), 0);
    assert_eq!(output.delay(), 0);
    assert_eq!(output.clock(), NO_PTS);
}

/// Without any video signal, four thresholds of buffered audio force a
/// start anyway.
#[test]
fn test_forced_start_at_four_thresholds() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    // the 336 ms default threshold is 64512 bytes at 48 kHz stereo
    enqueue_chunked(&output, &silence(250_000), 25_000);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(handle.total_written(), 0, "below four thresholds");

    enqueue_chunked(&output, &silence(30_000), 10_000);
    assert!(
        wait_for(Duration::from_secs(2), || handle.total_written() > 0),
        "four thresholds of audio must force playback"
    );
}

/// A video timestamp far ahead of the buffered audio queues a skip that
/// later enqueues are consumed against; playback stays parked until the
/// skip is absorbed.
#[test]
fn test_video_ready_queues_pending_skip() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    output.set_clock(90_000);
    output.enqueue(&silence(19_200)); // 100 ms
    assert_eq!(output.used_bytes(), 19_200);

    // write pts is now 99000, the oldest buffered sample sits at 90000;
    // place video 100000 ticks past the startup and buffering allowance
    let video_pts = 90_000 + 15 * 20 * 90 + 336 * 90 + 100_000;
    output.video_ready(video_pts);

    // the whole buffer was skipped and a remainder is pending
    assert_eq!(output.used_bytes(), 0);
    assert_eq!(handle.total_written(), 0);

    // 100000 ticks at 48 kHz stereo is 213332 frame-aligned bytes; the
    // buffered 19200 are gone, 194132 remain pending
    output.enqueue(&silence(19_200));
    assert_eq!(output.used_bytes(), 0, "enqueue consumed by pending skip");

    output.enqueue(&silence(175_000));
    assert_eq!(output.used_bytes(), 68, "remainder past the skip lands");
}

/// An implausible skip (over two seconds) is ignored.
#[test]
fn test_bogus_video_timestamp_is_ignored() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    output.set_clock(0);
    output.enqueue(&silence(19_200));
    output.video_ready(10_000_000);
    assert_eq!(output.used_bytes(), 19_200, "buffer untouched");

    output.enqueue(&silence(4_800));
    assert_eq!(output.used_bytes(), 24_000, "no pending skip");
}

/// set_clock followed by clock reads back the value (minus a zero delay
/// while parked).
#[test]
fn test_clock_round_trip() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    assert_eq!(output.clock(), NO_PTS);

    setup_and_wait(&output, &handle, 48_000, 2);
    assert_eq!(output.clock(), NO_PTS);

    output.set_clock(123_456);
    assert_eq!(output.clock(), 123_456);
    assert_eq!(output.delay(), 0);
}

/// While a single segment drains, the audio clock never runs backwards.
#[test]
fn test_clock_is_monotonic_during_playback() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    // throttle the fake so draining takes a few scheduler rounds
    handle.set_accept_per_tick(9_600);

    output.set_clock(0);
    enqueue_chunked(&output, &silence(192_000), 19_200);
    output.video_ready(NO_PTS);
    assert!(wait_for(Duration::from_secs(2), || {
        output.enqueue(&[]);
        handle.total_written() > 0
    }));

    let mut last = output.clock();
    assert_ne!(last, NO_PTS);
    while handle.total_written() < 192_000 {
        let now = output.clock();
        assert!(now >= last, "clock ran backwards: {} < {}", now, last);
        last = now;
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Enqueue stays a copy even when the device has stalled: the producer
/// never waits on the playback thread.
#[test]
fn test_enqueue_never_blocks_on_a_stalled_device() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    // device accepts nothing; get the playback thread spinning anyway
    handle.set_accept_per_tick(0);
    enqueue_chunked(&output, &silence(100_000), 20_000);
    output.video_ready(NO_PTS);
    output.enqueue(&[]);
    assert!(wait_for(Duration::from_secs(1), || output.delay() > 0));

    let burst = silence(19_200);
    let start = std::time::Instant::now();
    for _ in 0..20 {
        output.enqueue(&burst);
        let _ = output.clock();
    }
    // pure memcpy territory; generous bound for slow machines
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "enqueue blocked for {:?}",
        start.elapsed()
    );
}

/// The delay reflects both the sink's buffered frames and the ring.
#[test]
fn test_delay_includes_sink_and_ring() {
    let (output, handle) = engine_with_fake(OutputConfig::default());
    setup_and_wait(&output, &handle, 48_000, 2);

    // stop the device, let the ring hold half a second
    handle.set_accept_per_tick(0);
    handle.set_delay_ticks(4_500);

    output.set_clock(0);
    enqueue_chunked(&output, &silence(96_000), 19_200);
    output.video_ready(NO_PTS);
    output.enqueue(&[]); // evaluate the gate: 96000 > one threshold

    // playback is "running" but the device accepts nothing, so the whole
    // half second (45000 ticks) sits in the ring plus the fake's 4500
    assert!(wait_for(Duration::from_secs(1), || output.delay() > 0));
    assert_eq!(output.delay(), 45_000 + 4_500);
    assert_eq!(output.clock(), 45_000 - output.delay());
}
