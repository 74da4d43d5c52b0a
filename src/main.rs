use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use visage::{
    save_snapshot, ClipOptions, DirectCaptureSource, Engine, EngineConfig, EngineSource,
    FrameSource, FrameSourceChain, JpegSequenceWriter,
};

#[derive(Parser, Debug)]
#[command(name = "visage")]
#[command(about = "Camera frame acquisition and motion analysis engine")]
#[command(version)]
#[command(long_about = "Continuously captures frames from a camera, keeps the latest frame \
available to readers, watches for motion and renders a status overlay. Survives device \
disconnects by reopening the camera in the background.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "visage.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Save one frame as JPEG and exit
    #[arg(long, value_name = "PATH", conflicts_with = "record")]
    snapshot: Option<PathBuf>,

    /// Record a clip into this directory and exit
    #[arg(long, value_name = "DIR")]
    record: Option<PathBuf>,

    /// Clip length in seconds for --record
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Seconds between stats log lines while running
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting visage v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = EngineConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(path) = &args.snapshot {
        return snapshot(config, path).await;
    }

    let engine = Engine::start(config.clone())
        .await
        .context("Failed to start engine")?;

    let result = match &args.record {
        Some(dir) => record(&engine, &config, dir, Duration::from_secs(args.duration)).await,
        None => run(&engine, Duration::from_secs(args.stats_interval.max(1))).await,
    };

    engine.stop().await;
    result
}

async fn snapshot(config: EngineConfig, path: &Path) -> Result<()> {
    let engine = match Engine::start(config.clone()).await {
        Ok(engine) => Some(engine),
        Err(e) => {
            warn!("Engine unavailable for snapshot: {}", e);
            None
        }
    };

    let mut chain = FrameSourceChain::new();
    if let Some(engine) = &engine {
        chain = chain.with(EngineSource::new(engine.clone()));
    }
    chain = chain.with(DirectCaptureSource::from_config(&config));

    let frame = chain.fetch(true).await;
    if let Some(engine) = &engine {
        engine.stop().await;
    }

    let frame = frame.context("No frame available from any source")?;
    save_snapshot(&frame, path, config.recording.jpeg_quality).await?;
    println!("{}", path.display());
    Ok(())
}

async fn record(
    engine: &Engine,
    config: &EngineConfig,
    dir: &Path,
    duration: Duration,
) -> Result<()> {
    let mut writer = JpegSequenceWriter::create(dir, config.recording.jpeg_quality).await?;
    let options = ClipOptions::from_config(&config.recording, duration);

    let summary = tokio::select! {
        summary = engine.record_clip(&options, &mut writer) => summary?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Recording interrupted");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Run until Ctrl-C, logging stats periodically and events as they arrive
async fn run(engine: &Engine, stats_interval: Duration) -> Result<()> {
    let mut events = engine.subscribe();
    let mut ticker = tokio::time::interval(stats_interval);
    ticker.tick().await;

    info!("Engine running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                info!("Stats: {}", engine.get_stats().summary());
            }
            event = events.recv() => match event {
                Ok(event) => info!(event = event.event_type(), "{}", event.description()),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} engine events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("visage={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "visage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# visage configuration file");
    println!("# Every key can also be set through VISAGE_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", toml::to_string_pretty(&EngineConfig::default())?);
    Ok(())
}
