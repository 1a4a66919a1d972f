//! # Rover Bridge
//!
//! Drive a six-wheel rover with a gamepad.
//!
//! This application reads stick and button events from a gamepad, ramps them
//! into motor duty cycles and sends them to the motor microcontroller over
//! serial (or drives local GPIO PWM).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use rover_bridge::config::{Config, LoggingConfig};
use rover_bridge::session::ControlSession;

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "rover-bridge", version, about = "Drive a rover with a gamepad")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level filter, overriding the config file (RUST_LOG wins over both)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Load the configuration file.
///
/// A missing file at the default path means "use built-in defaults"; a missing
/// file the operator named explicitly is an error.
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        let config = Config::from_toml_str("").context("Built-in defaults are invalid")?;
        return Ok((config, false));
    }
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((config, true))
}

/// Install the terminal logger, plus a file mirror when `logging.file` is set.
///
/// The returned guard flushes the file writer on drop and must outlive the
/// session.
fn init_logging(logging: &LoggingConfig, level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    if logging.file.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    }

    let path = Path::new(&logging.file);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file '{}' has no file name", logging.file))?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

/// Main entry point for Rover Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate configuration (fatal on error)
///    - Set up logging
///    - Claim GPIO (PWM sink, status LED) and install signal handlers
///
/// 2. **Main Loop**
///    - Wait for the gamepad, then the motor controller
///    - Route stick and button events to the motors
///    - Re-acquire the gamepad if it disconnects
///
/// 3. **Graceful Shutdown**
///    - Triggered by Ctrl+C, SIGTERM, the menu button or emergency stop
///    - All motors to neutral, reset and release the motor controller
///    - Exit 0
///
/// # Examples
///
/// ```bash
/// cargo run --release -- --config config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO rover_bridge: Rover Bridge v0.1.0 starting...
/// WARN rover_bridge::session: Gamepad not connected (...), retrying in 2s
/// INFO rover_bridge::controller::gamepad: Gamepad connected: Xbox Wireless Controller at /dev/input/event4
/// INFO rover_bridge::link: Motor controller connection established
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, from_file) = load_config(&args.config)?;
    let _log_guard = init_logging(&config.logging, args.log_level.as_deref())?;

    info!("Rover Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!("Configuration loaded from {}", args.config.display());
    } else {
        warn!("{} not found, using built-in defaults", args.config.display());
    }

    if args.check {
        info!("Configuration OK ({} channels, {:?} output)", config.channels.len(), config.drive.sink);
        return Ok(());
    }

    let mut session = ControlSession::from_config(&config).context("Failed to set up rover hardware")?;
    let _signals = session
        .shutdown_signal()
        .listen_for_os_signals()
        .context("Failed to install signal handlers")?;

    info!("Press Ctrl+C or the menu button to exit");
    let reason = session.run().await.context("Control session failed")?;
    info!("Rover Bridge stopped ({})", reason);
    Ok(())
}
