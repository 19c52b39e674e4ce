//! Ultrasound stream demo
//!
//! Streams synthetic frames from a mock device through the full pipeline and
//! logs throughput.
//!
//! ```bash
//! cargo run --features mock-device -- [CONFIG] [--seconds N] [--fps N] [--log-dir DIR]
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ultrasound_stream::backend::MockDevice;
use ultrasound_stream::{
    FrameRecord, StateChange, StreamConfig, StreamSubscriber, UltrasoundStream,
};

/// Log every N-th frame
const LOG_EVERY: u64 = 30;

#[derive(Debug)]
struct Args {
    config: Option<PathBuf>,
    seconds: u64,
    fps: f64,
    log_dir: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Args {
            config: None,
            seconds: 5,
            fps: 30.0,
            log_dir: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--seconds" => args.seconds = next_value(&mut iter, &arg)?.parse()?,
                "--fps" => args.fps = next_value(&mut iter, &arg)?.parse()?,
                "--log-dir" => args.log_dir = Some(next_value(&mut iter, &arg)?.into()),
                other if other.starts_with("--") => anyhow::bail!("unknown option {}", other),
                path => args.config = Some(path.into()),
            }
        }
        Ok(args)
    }
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    iter.next()
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}

/// Logs a summary of every N-th frame
#[derive(Default)]
struct FrameLogger {
    seen: AtomicU64,
}

impl StreamSubscriber for FrameLogger {
    fn name(&self) -> &str {
        "frame-logger"
    }

    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if n % LOG_EVERY == 0 {
            tracing::info!(
                "Frame {}: {}x{}x{}, depth {:.1} mm, geometry {:?}, {} IMU samples",
                n,
                frame.image.width(),
                frame.image.height(),
                frame.image.channels(),
                frame.ultrasound.end_depth_mm,
                frame.geometry,
                frame.inertial_samples.len()
            );
        }
        Ok(())
    }

    fn on_button_pressed(&self, button: i32) {
        tracing::info!("Button {} pressed", button);
    }

    fn on_state_changed(&self, change: StateChange) {
        tracing::debug!("Subscriber saw {} -> {}", change.from, change.to);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;

    // Initialize logging
    let (file_layer, _log_guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ultrasound-stream.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ultrasound_stream=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting ultrasound stream demo");

    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::load_or_default(),
    };
    if !config.has_address() {
        config.server_address = "127.0.0.1".to_string();
    }
    let resolution = config.imaging.resolution.unwrap_or_default();

    let device = MockDevice::new();
    let handle = device.handle();
    let stream = UltrasoundStream::connect(config, Box::new(device))?;
    stream.subscribe(Arc::new(FrameLogger::default()));
    stream.start()?;

    let mut generator = handle.spawn_generator(args.fps, resolution)?;
    let started = Instant::now();
    let run_for = Duration::from_secs(args.seconds);
    while started.elapsed() < run_for {
        std::thread::sleep(Duration::from_secs(1));
        let stats = stream.stats();
        tracing::info!(
            "received {} accepted {} emitted {} lost {} queue {} ({:.1} fps)",
            stats.frames_received,
            stats.frames_accepted,
            stats.frames_emitted,
            stats.frames_lost(),
            stats.queue_depth,
            stats.emitted_fps
        );
    }

    tracing::info!("Shutting down...");
    generator.stop();
    stream.close()?;

    let stats = stream.stats();
    tracing::info!(
        "Done: {} frames emitted, {} geometry detections, {} overflow events",
        stats.frames_emitted,
        stats.geometry_detections,
        stats.overflow_events
    );
    Ok(())
}
