//! Test-tone generator
//!
//! Streams a sine wave through the full output engine to whatever sink
//! the configuration selects. Handy for checking a device string and the
//! buffering behavior without a video pipeline around it.

use anyhow::Result;
use clap::Parser;
use softplay_audio::{AudioOutput, OutputConfig};
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "softplay-tone")]
#[command(about = "Play a test tone through the softplay audio engine")]
#[command(version)]
struct Args {
    /// PCM device string (empty for silent output)
    #[arg(short, long, default_value = "default")]
    device: String,

    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Sample rate (44100 or 48000)
    #[arg(short, long, default_value_t = 48_000)]
    rate: u32,

    /// Duration in seconds
    #[arg(short, long, default_value_t = 2.0)]
    seconds: f32,

    /// Optional TOML configuration file; command-line device wins
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "softplay_audio=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => OutputConfig::load(path)?,
        None => OutputConfig::default(),
    };
    config.device = args.device.clone();

    let output = AudioOutput::new(config)?;
    let mut rate = args.rate;
    let mut channels = 2u32;
    output.setup(&mut rate, &mut channels, false)?;
    info!("playing {}Hz tone at {}Hz {}ch", args.frequency, rate, channels);

    output.set_clock(0);
    let total_frames = (args.seconds * rate as f32) as usize;
    let burst_frames = rate as usize / 10;
    let step = TAU * args.frequency / rate as f32;
    let mut phase = 0.0f32;
    let mut sent = 0usize;
    let mut burst = Vec::with_capacity(burst_frames * channels as usize * 2);

    while sent < total_frames {
        let frames = burst_frames.min(total_frames - sent);
        burst.clear();
        for _ in 0..frames {
            let sample = (phase.sin() * 8000.0) as i16;
            phase = (phase + step) % TAU;
            for _ in 0..channels {
                burst.extend_from_slice(&sample.to_ne_bytes());
            }
        }
        while output.free_bytes() < burst.len() {
            std::thread::sleep(Duration::from_millis(10));
        }
        output.enqueue(&burst);
        if sent == 0 {
            // no video side here; report it ready so one buffer's worth
            // of audio starts the clock
            output.video_ready(0);
        }
        sent += frames;
    }

    while output.used_bytes() > 0 {
        std::thread::sleep(Duration::from_millis(50));
    }
    std::thread::sleep(Duration::from_millis(200));
    info!("done, audio clock at {} ticks", output.clock());
    output.close();
    Ok(())
}
