// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sigcast-echo - print signal updates from a sigcast server.
//!
//! Subscribes with the given kind filter and prints every record as it
//! arrives. Reconnects automatically when the server closes the
//! connection (for instance after a signal-population change).
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1 5000, both kinds
//! sigcast-echo
//!
//! # Analog signals only from a remote server
//! sigcast-echo 10.0.0.5 5000 2
//! ```

use clap::Parser;
use sigcast::{ClientConfig, ClientEvent, SignalClient, SignalFilter};
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Echo signal updates from a sigcast server
#[derive(Parser, Debug)]
#[command(name = "sigcast-echo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server TCP port
    #[arg(default_value = "5000")]
    port: u16,

    /// Kind filter bitmask: 1 = discrete, 2 = analog, 3 = both
    #[arg(default_value = "3")]
    filter: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
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
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        filter: SignalFilter::from_bits(args.filter),
        ..Default::default()
    };

    let client = SignalClient::new(config)?;
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(events_tx).await })
    };

    let stopper = client.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        stopper.stop();
    });

    while let Some(event) = events_rx.recv().await {
        match event {
            ClientEvent::Connected { server } => {
                println!("# connected to {server}");
            }
            ClientEvent::Updates(records) => {
                for r in records {
                    println!("id={} kind={} value={}", r.id, r.kind, r.value);
                }
            }
            ClientEvent::Alive => {}
            ClientEvent::Disconnected { reason } => {
                println!("# disconnected: {reason}");
            }
        }
    }

    runner.await??;
    Ok(())
}
