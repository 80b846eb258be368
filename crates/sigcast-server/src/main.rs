// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sigcast server
//!
//! Standalone signal publish/subscribe server. Listens for subscribers,
//! serves each a snapshot of the signal table filtered by the requested
//! kinds, then streams updates until disconnect.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (5000), all IPv4 interfaces
//! sigcast-server
//!
//! # Custom port and config
//! sigcast-server --port 5100 --config server.json
//!
//! # Generate random demo updates
//! sigcast-server --emulate
//! ```

use anyhow::Context;
use clap::Parser;
use sigcast::{producer, ServerConfig, Signal, SignalServer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Signal publish/subscribe server
#[derive(Parser, Debug)]
#[command(name = "sigcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate random demo updates for the seeded signals
    #[arg(long, default_value = "false")]
    emulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(config_path) = args.config {
        info!("loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        ServerConfig {
            bind_address: args.bind.parse().context("invalid bind address")?,
            port: args.port,
            ..Default::default()
        }
    };

    info!(
        bind = %config.bind_address,
        port = config.port,
        signals = config.seed_signals.len(),
        emulate = args.emulate,
        "sigcast server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = SignalServer::new(config.clone())?;

    // Seed the signal population before the first subscriber arrives.
    let seed: Vec<Signal> = config
        .seed_signals
        .iter()
        .map(|s| Signal::stamped(s.id, s.kind, s.value))
        .collect();
    server.set_signals(seed);

    if args.emulate {
        tokio::spawn(producer::run_emulation(server.clone()));
    }

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping server...");
        server_handle.stop();
    });

    server.run().await?;

    info!("sigcast server stopped");
    Ok(())
}
