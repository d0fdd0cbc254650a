//! greatfet-logic
//!
//! Captures raw logic analyzer samples from a GreatFET running libgreat
//! firmware and writes them to a file.

use analyzer::config::{self, AnalyzerConfig};
use analyzer::{DiscardSink, FileSink, LibusbTransport, LogicAnalyzer, SharedSink};
use anyhow::{Context, Result, bail};
use clap::Parser;
use common::setup_logging;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Longest a single event loop pass may block while streaming
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "greatfet-logic")]
#[command(
    author,
    version,
    about = "Capture logic analyzer samples from a GreatFET"
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print firmware version and serial number and exit
    #[arg(long)]
    info: bool,

    /// Sample rate in Hz (overrides the configuration)
    #[arg(short = 'r', long, value_name = "HZ")]
    sample_rate: Option<u64>,

    /// Number of channels to capture (overrides the configuration)
    #[arg(short = 'n', long, value_name = "COUNT")]
    channels: Option<u8>,

    /// Capture length in seconds
    #[arg(short, long, value_name = "SECS", default_value_t = 1.0)]
    duration: f64,

    /// Write raw samples to this file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = AnalyzerConfig::default();
        let path = AnalyzerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        AnalyzerConfig::load_or_default()
    };
    if let Some(rate) = args.sample_rate {
        config.acquisition.sample_rate_hz = rate;
    }
    if let Some(channels) = args.channels {
        config.acquisition.num_channels = channels;
    }
    config
        .acquisition
        .validate()
        .context("Invalid acquisition settings")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("greatfet-logic v{}", env!("CARGO_PKG_VERSION"));

    let transport = LibusbTransport::open(config.device.vendor_id, config.device.product_id)
        .with_context(|| {
            format!(
                "Failed to open GreatFET {:04x}:{:04x}",
                config.device.vendor_id, config.device.product_id
            )
        })?;
    let transport = Arc::new(transport);

    if args.info {
        print_info(transport, &config);
        return Ok(());
    }

    let duration = Duration::try_from_secs_f64(args.duration).context("Invalid --duration")?;
    capture(transport, &config, duration, args.output.as_deref())
}

fn print_info(transport: Arc<LibusbTransport>, config: &AnalyzerConfig) {
    let mut analyzer = LogicAnalyzer::new(
        transport,
        config.acquisition.clone(),
        Arc::new(Mutex::new(DiscardSink)),
    );
    let version = analyzer.version();
    let serial = analyzer.serial_number();
    println!(
        "Firmware version: {}",
        version.as_deref().unwrap_or("unknown")
    );
    println!("Serial number:    {}", serial.as_deref().unwrap_or("unknown"));
}

fn capture(
    transport: Arc<LibusbTransport>,
    config: &AnalyzerConfig,
    duration: Duration,
    output: Option<&Path>,
) -> Result<()> {
    let file_sink = output
        .map(FileSink::create)
        .transpose()
        .context("Failed to create output file")?
        .map(|sink| Arc::new(Mutex::new(sink)));
    let sink: SharedSink = match &file_sink {
        Some(sink) => sink.clone(),
        None => Arc::new(Mutex::new(DiscardSink)),
    };

    let mut analyzer = LogicAnalyzer::new(transport, config.acquisition.clone(), sink);
    analyzer
        .allocate_transfers()
        .context("Failed to allocate streaming transfers")?;
    analyzer.acquire().context("Failed to start acquisition")?;

    let result = stream_until(&analyzer, Instant::now() + duration);

    if let Err(e) = analyzer.cancel() {
        warn!("Failed to stop acquisition cleanly: {}", e);
    }
    analyzer.teardown();

    let stats = analyzer.stats();
    info!(
        "Captured {} bytes in {} transfers ({} failed)",
        stats.bytes, stats.transfers, stats.errors
    );
    drop(analyzer);

    if let Some(file_sink) = file_sink {
        let written = file_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish()
            .context("Failed to write samples")?;
        println!("Wrote {} bytes of samples", written);
    }

    result
}

fn stream_until(analyzer: &LogicAnalyzer<LibusbTransport>, deadline: Instant) -> Result<()> {
    while Instant::now() < deadline {
        if !analyzer.is_streaming() {
            bail!("Sample stream ended unexpectedly");
        }
        analyzer
            .poll(POLL_INTERVAL)
            .context("USB event handling failed")?;
    }
    Ok(())
}
