//! Silent sink
//!
//! Accepts any format, swallows every byte and reports zero delay. Used
//! when no device is configured and as the fallback for unavailable
//! drivers.

use super::{start_threshold, DrainGain, SetupOutcome, Sink, Tick};
use crate::error::Result;
use crate::ring::Segment;

#[derive(Default)]
pub struct NoopSink;

impl Sink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn exit(&mut self) {}

    fn setup(
        &mut self,
        rate: &mut u32,
        channels: &mut u32,
        _use_ac3: bool,
        target_ms: u64,
    ) -> Result<SetupOutcome> {
        Ok(SetupOutcome {
            adjusted: false,
            start_threshold: start_threshold(1024, *rate, *channels, target_ms),
        })
    }

    fn tick(&mut self, segment: &Segment, _gain: Option<DrainGain>) -> Tick {
        let mut total = 0;
        loop {
            let n = segment.ring().drain(usize::MAX, |slice| slice.len());
            if n == 0 {
                break;
            }
            total += n;
        }
        if total > 0 {
            Tick::Progress
        } else {
            Tick::Drained
        }
    }

    fn flush(&mut self) {}

    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn set_volume(&mut self, _volume: u32) {}

    fn delay_ticks(&mut self) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::SegmentQueue;

    #[test]
    fn test_noop_swallows_everything() {
        let queue = SegmentQueue::new();
        queue.add(48_000, 2, 48_000, 2, false).unwrap();
        let seg = queue.write_segment();
        seg.ring().write(&[0u8; 4096]);

        let mut sink = NoopSink;
        assert_eq!(sink.tick(seg, None), Tick::Progress);
        assert_eq!(seg.ring().used(), 0);
        assert_eq!(sink.tick(seg, None), Tick::Drained);
        assert_eq!(sink.delay_ticks(), 0);
    }
}
