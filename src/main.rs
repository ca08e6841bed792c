//! Frame-grabber binary: capture frames from a V4L2 device into PPM files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use frame_grabber::config::{
    CaptureConfig, DEFAULT_BUFFER_COUNT, DEFAULT_DEVICE, DEFAULT_FRAME_DELAY, DEFAULT_HEIGHT,
    DEFAULT_OUTPUT_DIR, DEFAULT_TIMEOUT, DEFAULT_WIDTH,
};
use frame_grabber::negotiate::query_capabilities;
use frame_grabber::{CaptureSession, FrameWriter, StopToken, V4L2Device};

/// Capture YUYV frames from a V4L2 device and save them as PPM images.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Capture device path.
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Requested frame width.
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// Requested frame height.
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// Keep the device's current format instead of forcing width/height and YUYV.
    #[arg(long)]
    no_force_format: bool,

    /// Buffers to request from the driver.
    #[arg(long, default_value_t = DEFAULT_BUFFER_COUNT)]
    buffers: u32,

    /// Number of frames to capture.
    #[arg(
        short = 'n',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..),
        conflicts_with = "continuous"
    )]
    frames: u64,

    /// Capture until interrupted.
    #[arg(long)]
    continuous: bool,

    /// Directory for the PPM files.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Readiness timeout in milliseconds.
    #[arg(long, default_value_t = millis(DEFAULT_TIMEOUT))]
    timeout_ms: u64,

    /// Delay between frames in milliseconds.
    #[arg(long, default_value_t = millis(DEFAULT_FRAME_DELAY))]
    delay_ms: u64,
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl From<Args> for CaptureConfig {
    fn from(args: Args) -> Self {
        Self {
            device: args.device,
            width: args.width,
            height: args.height,
            force_format: !args.no_force_format,
            buffer_count: args.buffers,
            timeout: Duration::from_millis(args.timeout_ms),
            frame_delay: Duration::from_millis(args.delay_ms),
            max_frames: (!args.continuous).then_some(args.frames),
            output_dir: args.output,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Args::parse().into()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(config: CaptureConfig) -> Result<()> {
    let stop = StopToken::new();
    {
        let stop = stop.clone();
        if let Err(err) = ctrlc::set_handler(move || stop.request()) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    }

    let mut device = V4L2Device::open(&config.device)
        .with_context(|| format!("opening {}", config.device.display()))?;

    let caps = query_capabilities(&mut device).context("querying capabilities")?;
    println!("Device: {} ({})", caps.card, device.path().display());
    println!("Driver: {}", caps.driver);

    let writer = FrameWriter::new(&config.output_dir)
        .with_context(|| format!("preparing {}", config.output_dir.display()))?;

    println!("Output: {}", writer.dir().display());

    let mut session =
        CaptureSession::new(device, &config, stop).context("initializing capture")?;
    let format = session.format();
    println!(
        "Format: {}x{} {} ({} buffers)",
        format.width,
        format.height,
        format.fourcc,
        session.buffer_count()
    );

    session.start().context("starting capture")?;
    let result = session.run(&writer, |frame| {
        println!("Wrote {}", frame.path.display());
    });
    session.stop();

    let written = result.context("capturing frames")?;
    println!("Captured {written} frame(s)");
    Ok(())
}
