// rspy - React Runtime Spy
//
// Binary entry point. The instrumentation core lives in the library; this
// wires up configuration, logging, and the demo runner that exercises the
// whole pipeline against a simulated page.
//
// Logging precedence: RUST_LOG env var > config file > default "info".
// With file logging enabled, JSON logs go to rotating files in addition to
// stdout; the appender guard must live until exit so buffered lines flush.

mod cli;
mod demo;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rspy::config::{Config, LogRotation};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Config subcommands print and exit before logging spins up.
    if let Some(command) = &args.command {
        if cli::handle_config_command(command) {
            return Ok(());
        }
    }

    let mut config = Config::load();
    if let Some(Commands::Demo { export: true }) = &args.command {
        config.export.enabled = true;
    }

    let default_filter = format!("rspy={}", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // Keep the non-blocking writer guard alive for the whole run.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard> = if config
        .logging
        .file_enabled
    {
        match std::fs::create_dir_all(&config.logging.file_dir) {
            Ok(()) => {
                let appender = match config.logging.file_rotation {
                    LogRotation::Hourly => tracing_appender::rolling::hourly(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                    LogRotation::Daily => tracing_appender::rolling::daily(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                    LogRotation::Never => tracing_appender::rolling::never(
                        &config.logging.file_dir,
                        &config.logging.file_prefix,
                    ),
                };
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking)
                            .with_ansi(false),
                    )
                    .init();
                Some(guard)
            }
            Err(e) => {
                eprintln!(
                    "Warning: could not create log directory {:?}: {}",
                    config.logging.file_dir, e
                );
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                None
            }
        }
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        None
    };

    tracing::debug!("configuration loaded: {config:?}");
    demo::run_demo(config).await
}
