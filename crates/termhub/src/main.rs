//! termhub - headless terminal session host
//!
//! Speaks JSON lines on stdin/stdout and logs to stderr.

mod bridge;
mod protocol;

use anyhow::{Context, Result};
use clap::Parser;
use once_cell::sync::Lazy;
use session::remote::Ssh2Options;
use session::{
    ChannelSink, PtyDriver, SessionConfig, SessionRegistry, ShutdownCoordinator, Ssh2Driver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

use crate::bridge::{Bridge, Flow};

/// Application startup time for performance monitoring
static STARTUP_TIME: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Parser)]
#[command(name = "termhub")]
#[command(about = "Headless terminal session host speaking JSON lines on stdio")]
#[command(version)]
struct Args {
    /// Config file to load instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the maximum number of active sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Override the shutdown deadline in milliseconds
    #[arg(long, value_name = "MS")]
    shutdown_deadline_ms: Option<u64>,

    /// Disable local process sampling
    #[arg(long)]
    no_metrics: bool,

    /// Enable trace logging (same as TERMHUB_DEBUG=1)
    #[arg(long)]
    debug: bool,
}

/// Initialize required directories.
fn init_paths() -> Result<()> {
    let config_dir = termhub_paths::config_dir();
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
    debug!("Initialized paths - config: {:?}", config_dir);
    Ok(())
}

/// Check if debug mode is enabled via flag or environment variable.
fn is_debug_mode(args: &Args) -> bool {
    args.debug || std::env::var("TERMHUB_DEBUG").is_ok()
}

/// Initialize the logging system. Stdout carries the protocol, so logs go
/// to stderr.
fn init_logging(debug_mode: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if debug_mode {
        "termhub=trace,session=trace,settings=debug,info"
    } else {
        "termhub=info,session=info,warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    if debug_mode {
        info!(
            "termhub v{} starting up (DEBUG MODE ENABLED)",
            env!("CARGO_PKG_VERSION")
        );
        info!("Set RUST_LOG for custom log levels, e.g. RUST_LOG=session=trace");
    } else {
        info!("termhub v{} starting up", env!("CARGO_PKG_VERSION"));
    }
}

/// Load the config file and apply command line overrides.
fn load_config(args: &Args) -> settings::Config {
    let mut config = match &args.config {
        Some(path) => settings::load_config_from(path),
        None => {
            settings::ensure_config_file();
            settings::load_config()
        }
    };
    if let Some(max) = args.max_sessions {
        config.max_sessions = max.max(1);
    }
    if let Some(ms) = args.shutdown_deadline_ms {
        config.shutdown_deadline_ms = ms;
    }
    if args.no_metrics {
        config.metrics.enabled = false;
    }
    config
}

async fn run(config: settings::Config) -> Result<()> {
    let (sink, mut events) = ChannelSink::new();
    let registry = SessionRegistry::new(
        SessionConfig::from(&config),
        Arc::new(sink),
        Arc::new(PtyDriver),
        Arc::new(Ssh2Driver::new(Ssh2Options::from_settings(&config.ssh))),
    );
    let coordinator = ShutdownCoordinator::from_settings(&config);
    let mut bridge = Bridge::new(registry, config, std::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Ready in {:?}", STARTUP_TIME.elapsed());
    let request_id = loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if let Flow::Shutdown { request_id } = bridge.handle_line(&line)? {
                        info!("Shutdown requested");
                        break request_id;
                    }
                }
                None => {
                    info!("stdin closed, shutting down");
                    break None;
                }
            },
            Some(event) = events.recv() => bridge.forward_event(event)?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break None;
            }
        }
    };

    let report = bridge.shutdown(coordinator, &mut events, request_id).await?;
    debug!(
        "Shutdown finished: {} closed, {} abandoned",
        report.closed.len(),
        report.abandoned.len()
    );
    Ok(())
}

fn main() -> Result<()> {
    let _ = *STARTUP_TIME;
    let args = Args::parse();

    init_logging(is_debug_mode(&args));

    if let Err(e) = init_paths() {
        error!("Failed to initialize paths: {}", e);
    }
    let config = load_config(&args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("termhub-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(run(config));
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_apply() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max-sessions = 3\nterm = \"screen-256color\"\n")
            .expect("should write config");
        let args = Args::parse_from([
            "termhub",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--shutdown-deadline-ms",
            "250",
            "--no-metrics",
        ]);

        let config = load_config(&args);

        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.term, "screen-256color");
        assert_eq!(config.shutdown_deadline(), Duration::from_millis(250));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn zero_max_sessions_is_raised_to_one() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("missing.toml");
        let args = Args::parse_from([
            "termhub",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--max-sessions",
            "0",
        ]);

        assert_eq!(load_config(&args).max_sessions, 1);
    }

    #[test]
    fn args_default_to_config_values() {
        let args = Args::parse_from(["termhub"]);
        assert!(args.config.is_none());
        assert!(args.max_sessions.is_none());
        assert!(!args.no_metrics);
        assert!(!args.debug);
    }
}
