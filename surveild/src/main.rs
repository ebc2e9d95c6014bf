//! Entry point for the `surveild` filesystem surveillance daemon.

mod cli;
mod pidfile;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::prelude::*;

use surveild_core::config::{Config, WatchGroup};
use surveild_core::{Engine, ProcessExecutor};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::CliArgs::parse_validated()?;

    if args.kill {
        pidfile::kill_running()?;
        return Ok(());
    }

    init_logging(&args);

    let mut config = Config::load_chain(&args.config_files)?;
    for path in &args.paths {
        config.watch.push(WatchGroup {
            path: canonicalize_watch_arg(path)?,
            exec: String::new(),
            idle_secs: None,
            rescan_secs: None,
            retry_cap: None,
        });
    }
    config.validate()?;

    if config.watch.is_empty() {
        anyhow::bail!("no watch roots configured: pass paths on the command line or a config file with [[watch]] entries");
    }

    pidfile::write()?;
    let result = run_daemon(config).await;
    pidfile::remove();
    result
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let executor = Arc::new(ProcessExecutor);
    let engine = Engine::build(&config, executor)?;

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    engine.run(shutdown_rx).await?;
    Ok(())
}

fn canonicalize_watch_arg(path: &std::path::Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).map_err(Into::into)
    }
}

fn init_logging(args: &cli::CliArgs) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_filter_directive()));

    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}
