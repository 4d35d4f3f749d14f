//! The playback thread
//!
//! One thread drains the current read segment into the sink. It parks on
//! the start condition until a producer raises it, then loops: coalesce
//! queued flushes, honour pause, run one sink tick, and hop to the next
//! segment when the current one runs dry. A format change across a hop
//! reconfigures the sink; if the new segment holds less than one start
//! threshold the thread parks again until more data arrives.
//!
//! Cancellation is cooperative: the shutdown flag is checked on every
//! iteration and the condition wait is bounded, so `close` never hangs.

use super::engine::EngineShared;
use crate::ring::SEGMENT_COUNT;
use crate::sink::Tick;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Sleep after a device-full or error tick.
const RETRY_SLEEP: Duration = Duration::from_millis(5);

/// Poll interval while paused.
const PAUSE_SLEEP: Duration = Duration::from_millis(10);

/// Upper bound on one condition wait; keeps shutdown responsive.
const PARK_WAIT: Duration = Duration::from_millis(100);

pub(crate) fn spawn(shared: Arc<EngineShared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("audio-playback".to_string())
        .spawn(move || run(shared))
        .expect("failed to spawn the audio playback thread")
}

/// Park/run decision after a segment hop or flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Continue,
    Park,
}

fn run(shared: Arc<EngineShared>) {
    debug!("audio: playback thread started");
    let mut device_paused = false;
    'outer: loop {
        {
            let mut running = shared.start.running.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    break 'outer;
                }
                if *running {
                    break;
                }
                let (guard, _) = shared
                    .start
                    .cond
                    .wait_timeout(running, PARK_WAIT)
                    .unwrap();
                running = guard;
            }
        }
        trace!("audio: playback thread running");

        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break 'outer;
            }

            if shared.paused.load(Ordering::Acquire) {
                if !device_paused {
                    shared.sink.lock().unwrap().pause();
                    device_paused = true;
                }
                std::thread::sleep(PAUSE_SLEEP);
                continue;
            }
            if device_paused {
                shared.sink.lock().unwrap().play();
                device_paused = false;
            }

            // Coalesce queued flush markers: jump the read cursor to the
            // newest flush-marked segment, dropping everything older, and
            // reset the sink once for the whole batch.
            let mut flushed = false;
            let mut remaining = shared.queue.filled();
            let mut index = shared.queue.read_index();
            while remaining > 0 {
                index = (index + 1) % SEGMENT_COUNT;
                remaining -= 1;
                if shared.queue.slot(index).take_flush() {
                    shared.queue.commit_flush_scan(index, remaining);
                    flushed = true;
                }
            }
            if flushed {
                debug!("audio: flush, dropping sink state");
                shared.sink.lock().unwrap().flush();
                if next_ring(&shared) == Advance::Park {
                    break;
                }
            }

            let segment = shared.queue.read_segment();
            if !segment.is_configured() {
                break;
            }
            let gain = shared.drain_gain(segment);
            let tick = shared.sink.lock().unwrap().tick(segment, gain);
            match tick {
                Tick::Progress => {}
                Tick::Full | Tick::Error => {
                    // bounded retry outside the sink lock, so producer
                    // queries never wait on the device
                    std::thread::sleep(RETRY_SLEEP);
                }
                Tick::Drained => {
                    if shared.queue.filled() == 0 {
                        break;
                    }
                    let old_format = segment.format();
                    let next = shared.queue.advance_read();
                    if next.format() != old_format {
                        if next_ring(&shared) == Advance::Park {
                            break;
                        }
                    } else {
                        // same format, fresh content: restart the gain
                        // tracking
                        shared.filters.lock().unwrap().reset();
                    }
                }
            }
        }

        shared.start.park();
        trace!("audio: playback thread parked");
    }
    debug!("audio: playback thread stopped");
}

/// Reconfigure the sink for the current read segment: device setup,
/// volume re-apply, filter reset and a fresh start threshold. Asks to
/// park when the segment holds less than one threshold, or when the
/// device refuses the format (the next setup retries).
fn next_ring(shared: &EngineShared) -> Advance {
    let segment = shared.queue.read_segment();
    if !segment.is_configured() {
        return Advance::Park;
    }
    let mut rate = segment.hw_rate();
    let mut channels = segment.hw_channels();
    let use_ac3 = segment.use_ac3();
    {
        let mut sink = shared.sink.lock().unwrap();
        match sink.setup(&mut rate, &mut channels, use_ac3, shared.delay_target_ms()) {
            Ok(outcome) => {
                if outcome.adjusted {
                    warn!(
                        "audio: device forced {}Hz {}ch on a {}Hz {}ch segment",
                        rate,
                        channels,
                        segment.hw_rate(),
                        segment.hw_channels()
                    );
                }
                shared
                    .start_threshold
                    .store(outcome.start_threshold, Ordering::Release);
            }
            Err(e) => {
                warn!("audio: sink setup failed: {}", e);
                return Advance::Park;
            }
        }
    }
    shared.apply_volume();
    shared.filters.lock().unwrap().reset();
    debug!(
        "audio: segment online, {}Hz {}ch{}",
        rate,
        channels,
        if use_ac3 { " pass-through" } else { "" }
    );

    if shared.start_threshold.load(Ordering::Acquire) >= segment.ring().used() {
        trace!("audio: below start threshold, waiting for data");
        return Advance::Park;
    }
    Advance::Continue
}
