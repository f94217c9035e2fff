//! MJPEG streaming server CLI

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mjpeg_stream_server::config::{viewer_url, Config};
use mjpeg_stream_server::{
    AspectRatio, CaptureWorker, FrameEncoder, FramePublisher, FrameSlot, ServerStats,
    StreamingServer, TestPatternSource,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(name = "mjpeg-server")]
#[command(about = "Serve the latest captured frame as an MJPEG stream over HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file (config.toml is used when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind_ip: Option<String>,

    /// Output aspect ratio, e.g. 1:1, 2:1, 4:3, 16:9
    #[arg(short, long)]
    aspect_ratio: Option<AspectRatio>,

    /// Capture resolution preset
    #[arg(short, long, value_enum)]
    resolution: Option<Resolution>,

    /// Capture frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// JPEG quality (1-100)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Resolution {
    #[value(name = "360p")]
    P360,
    #[value(name = "480p")]
    P480,
    #[value(name = "720p")]
    P720,
    #[value(name = "1080p")]
    P1080,
}

impl Resolution {
    fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P360 => (480, 480),
            Resolution::P480 => (640, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("failed to load config from {}", DEFAULT_CONFIG_PATH))?,
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind_ip) = &cli.bind_ip {
        config.server.bind_ip = bind_ip.clone();
    }
    if let Some(ratio) = cli.aspect_ratio {
        config.capture.aspect_ratio = ratio;
    }
    if let Some(resolution) = cli.resolution {
        let (width, height) = resolution.dimensions();
        config.capture.width = width;
        config.capture.height = height;
    }
    if let Some(fps) = cli.fps {
        config.capture.fps = fps;
    }
    if let Some(quality) = cli.quality {
        config.capture.quality = quality;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MJPEG server starting");
    let config = load_config(&cli)?;

    info!(
        port = %config.server.port,
        capture_enabled = %config.capture.enabled,
        width = %config.capture.width,
        height = %config.capture.height,
        fps = %config.capture.fps,
        aspect_ratio = %config.capture.aspect_ratio,
        "Configuration loaded"
    );

    let slot = FrameSlot::new();
    let mut server = StreamingServer::new(slot.clone());
    let addr = server.start(config.server.clone()).await?;
    info!(url = %viewer_url(addr.port()), "Open the viewer in a browser");

    let mut capture = if config.capture.enabled {
        let publisher = FramePublisher::new(
            slot.clone(),
            FrameEncoder::new(config.capture.quality),
            Some(config.capture.aspect_ratio),
        );
        let source = TestPatternSource::new(config.capture.width, config.capture.height);
        Some(CaptureWorker::spawn(source, publisher, config.capture.frame_interval())?)
    } else {
        info!("Capture disabled, serving frames pushed by other producers only");
        None
    };

    info!("Streaming started, press Ctrl+C to stop");
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = log_stats(&server, capture.as_ref(), config.server.stats_interval_seconds) => {}
    }
    info!("Shutting down");

    if let Some(worker) = capture.as_mut() {
        worker.stop();
    }
    server.stop().await;

    Ok(())
}

/// Log throughput every `interval_secs`; never returns unless disabled
async fn log_stats(server: &StreamingServer, capture: Option<&CaptureWorker>, interval_secs: u64) {
    if interval_secs == 0 {
        std::future::pending::<()>().await;
        return;
    }

    let stats = server.stats_handle();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.tick().await;

    let mut previous = ServerStats::default();
    let mut last = Instant::now();

    loop {
        ticker.tick().await;

        let current = stats.snapshot();
        let elapsed = last.elapsed().as_secs_f64();
        last = Instant::now();

        let capture_stats = capture.map(|worker| worker.get_stats()).unwrap_or_default();

        info!(
            clients = %current.active_clients,
            captured = %capture_stats.frames_captured,
            published = %capture_stats.frames_published,
            encode_failures = %capture_stats.encode_failures,
            parts_per_sec = %format!("{:.1}", current.calculate_part_rate(&previous, elapsed)),
            bitrate_kbps = %format!("{:.0}", current.calculate_bitrate_kbps(&previous, elapsed)),
            write_timeouts = %current.write_timeouts,
            "Stats"
        );

        previous = current;
    }
}
