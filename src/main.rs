//! Binary entrypoint for drowsed.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use drowsed::manager::PowerManager;

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "drowsed", about = "Session power and idle-state daemon")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("drowsed={}", level).parse()?)
        .add_directive("zbus=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = if cli.config.exists() {
        drowsed::config::from_yaml_file(&cli.config)
            .with_context(|| format!("loading config from {}", cli.config.display()))?
    } else {
        info!(path = %cli.config.display(), "no config file, using defaults");
        drowsed::config::Config::default()
    };
    cfg.validate().context("validating configuration")?;

    let (tx, rx) = mpsc::channel(64);
    let platform = drowsed::platform::connect(&cfg, tx.clone())
        .await
        .context("connecting to the host system")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    // SIGHUP reloads the config file; a broken file keeps the old policy.
    let reload_tx = tx.clone();
    let reload_path = cli.config.clone();
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match drowsed::config::from_yaml_file(&reload_path)
                .and_then(|cfg| cfg.validate().map(|()| cfg))
            {
                Ok(cfg) => {
                    let _ = reload_tx
                        .send(drowsed::events::Event::ConfigChanged(cfg))
                        .await;
                }
                Err(err) => {
                    warn!(path = %reload_path.display(), error = %err, "config reload failed")
                }
            }
        }
    });

    PowerManager::new(cfg, platform, tx).run(rx, cancel).await
}
