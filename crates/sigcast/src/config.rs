// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server and client configuration.

use crate::protocol::{SignalFilter, SignalKind, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Signal server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 5000; 0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted frame payload size (bytes)
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    /// Update queue capacity; the oldest entry is dropped on overflow
    #[serde(default = "default_queue_capacity")]
    pub update_queue_capacity: usize,

    /// Enable TCP_NODELAY on subscriber sockets
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Initial signal population loaded at startup
    #[serde(default = "default_seed_signals")]
    pub seed_signals: Vec<SignalSeed>,
}

/// One entry of the initial signal population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSeed {
    pub id: u32,
    pub kind: SignalKind,
    #[serde(default)]
    pub value: f64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    5000
}

fn default_max_payload_size() -> usize {
    MAX_PAYLOAD_LEN
}

fn default_queue_capacity() -> usize {
    65_536
}

fn default_true() -> bool {
    true
}

fn default_seed_signals() -> Vec<SignalSeed> {
    vec![
        SignalSeed {
            id: 1,
            kind: SignalKind::Discrete,
            value: 0.0,
        },
        SignalSeed {
            id: 2,
            kind: SignalKind::Discrete,
            value: 0.0,
        },
        SignalSeed {
            id: 3,
            kind: SignalKind::Analog,
            value: 0.0,
        },
        SignalSeed {
            id: 4,
            kind: SignalKind::Analog,
            value: 0.0,
        },
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_payload_size: default_max_payload_size(),
            update_queue_capacity: default_queue_capacity(),
            tcp_nodelay: true,
            seed_signals: default_seed_signals(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        Ok(std::fs::write(path, content)?)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_payload_size cannot be 0".into(),
            ));
        }
        if self.update_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "update_queue_capacity cannot be 0".into(),
            ));
        }
        let mut ids: Vec<u32> = self.seed_signals.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.seed_signals.len() {
            return Err(ConfigError::InvalidValue(
                "seed_signals contains duplicate ids".into(),
            ));
        }
        Ok(())
    }
}

/// Signal client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server TCP port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Kind filter sent in the subscribe frame
    #[serde(default)]
    pub filter: SignalFilter,

    /// Delay before reconnecting after a failure (milliseconds)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum accepted frame payload size (bytes)
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            filter: SignalFilter::ALL,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl ClientConfig {
    /// Get the reconnect delay as a Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_payload_size cannot be 0".into(),
            ));
        }
        Ok(())
    }
}
