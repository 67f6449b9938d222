#![recursion_limit = "256"]
//! # Main Entry Point
//!
//! Wires the layers together:
//! - Domain: configuration, types and the gateway/store traits
//! - Infrastructure: Matrix gateway, JSON store, logging
//! - Application: the forwarding engine and its parts
//! - Interface: command line and console reports
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::sync::Arc;
use tokio::sync::watch;

use crate::application::engine::ForwardingEngine;
use crate::application::shutdown::Shutdown;
use crate::domain::config::AppConfig;
use crate::domain::traits::{ConfigStore, FeedGateway};
use crate::domain::types::Mode;
use crate::infrastructure::logging::init_tracing;
use crate::infrastructure::matrix::MatrixGateway;
use crate::infrastructure::store::JsonConfigStore;
use crate::interface::cli::{Cli, Command};
use crate::interface::report;
use crate::strings::logs;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load static configuration
    let config_content = fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;
    let config: AppConfig = serde_yaml::from_str(&config_content)
        .with_context(|| format!("Failed to parse {}", cli.config.display()))?;

    // 2. Logging
    let _guard = init_tracing(&config.logging)?;

    // 3. Forwarding configuration
    let store = Arc::new(
        JsonConfigStore::open(&config.store.path)
            .with_context(|| format!("Failed to open forwarding store {}", config.store.path))?,
    );

    match cli.command() {
        Command::Status => {
            println!("{}", report::status(&store.snapshot()?));
            Ok(())
        }
        Command::Check => {
            let summary = report::check(&store.snapshot()?, chrono::Utc::now())
                .context("Configuration check failed")?;
            println!("{}", summary);
            Ok(())
        }
        Command::Run { once } => run(&config, store, cli.mode, once).await,
    }
}

async fn run(
    config: &AppConfig,
    store: Arc<JsonConfigStore>,
    mode_override: Option<Mode>,
    once: bool,
) -> Result<()> {
    // The mode is fixed for the lifetime of the process.
    let mode = match mode_override {
        Some(mode) => mode,
        None => store.snapshot()?.mode(),
    };

    let gateway = Arc::new(MatrixGateway::new(&config.services.matrix).await?);
    gateway.connect().await.context("Failed to connect to Matrix")?;

    let (shutdown_tx, shutdown) = Shutdown::channel();
    spawn_signal_listener(shutdown_tx);

    let engine = ForwardingEngine::new(gateway, store, shutdown);
    if once {
        let outcome = engine.run_incremental_cycle().await;
        tracing::info!(?outcome, "Single cycle finished");
        return Ok(());
    }

    engine.run(mode).await;
    Ok(())
}

fn spawn_signal_listener(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!("{}", logs::shutdown_fail(&e.to_string()));
            return;
        }
        tracing::info!("{}", logs::SHUTDOWN);
        let _ = tx.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
