// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sigcast - signal publish/subscribe over a framed TCP protocol.
//!
//! A server maintains an authoritative in-memory signal table (id-keyed,
//! typed, timestamped scalars) and broadcasts admitted updates to connected
//! subscribers. Each subscriber sends one subscribe frame carrying a kind
//! filter, receives a snapshot of the matching signals, then a stream of
//! updates until disconnect.
//!
//! # Example
//!
//! ```no_run
//! use sigcast::{ServerConfig, Signal, SignalKind, SignalServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = SignalServer::new(ServerConfig::default())?;
//!     server.set_signals(vec![
//!         Signal::stamped(1, SignalKind::Discrete, 0.0),
//!         Signal::stamped(2, SignalKind::Analog, 1.5),
//!     ]);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod producer;
pub mod protocol;
pub mod server;

pub use client::{ClientError, ClientEvent, SignalClient};
pub use config::{ClientConfig, ConfigError, ServerConfig, SignalSeed};
pub use protocol::{Signal, SignalFilter, SignalKind, SignalRecord};
pub use server::{ServerError, SignalServer};
