// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal client.
//!
//! Mirror of the server-side session: resolve, connect, send one subscribe
//! frame, then decode the snapshot and update stream. Any failure or peer
//! close tears the socket down and retries from resolve after a cancellable
//! delay; the snapshot received on reconnect is the sole recovery
//! mechanism, so no state is carried across connections.

use crate::config::{ClientConfig, ConfigError};
use crate::protocol::{
    decode_records, encode_subscribe, read_frame, FrameKind, ProtocolError, SignalRecord,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Client error types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resolve failed for {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected frame kind from server: {0:?}")]
    UnexpectedFrame(FrameKind),

    #[error("event channel closed")]
    EventChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events emitted to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connected and subscribed; the next data frame is the snapshot.
    Connected { server: SocketAddr },

    /// One decoded data frame: the snapshot or a batch of updates.
    Updates(Vec<SignalRecord>),

    /// Server keep-alive.
    Alive,

    /// Connection lost; a reconnect attempt follows.
    Disconnected { reason: String },
}

/// Auto-reconnecting subscriber client.
#[derive(Clone)]
pub struct SignalClient {
    config: ClientConfig,
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl SignalClient {
    /// Create a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the client: cancels the reconnect timer and any pending socket
    /// operation. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
            debug!("client stop requested");
        }
    }

    /// Run the connect/stream/reconnect loop until [`stop`](Self::stop) is
    /// called or the event receiver is dropped.
    pub async fn run(&self, events: mpsc::Sender<ClientEvent>) -> Result<(), ClientError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            filter = %self.config.filter,
            "client started"
        );

        loop {
            if self.is_stopped() {
                break;
            }

            let reason = match self.stream_once(&events).await {
                Ok(()) => "server closed connection".to_string(),
                Err(ClientError::EventChannelClosed) => break,
                Err(e) => e.to_string(),
            };

            if self.is_stopped() {
                break;
            }

            warn!(reason = %reason, "disconnected, retrying");
            if events
                .send(ClientEvent::Disconnected { reason })
                .await
                .is_err()
            {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!("client stopped");
        Ok(())
    }

    /// One connection attempt: resolve, connect, subscribe, stream.
    ///
    /// Returns `Ok(())` on a graceful server close or a stop request; any
    /// other exit is an error the caller retries after the backoff delay.
    async fn stream_once(&self, events: &mpsc::Sender<ClientEvent>) -> Result<(), ClientError> {
        let host = self.config.host.clone();

        let addr = tokio::select! {
            result = tokio::net::lookup_host((self.config.host.as_str(), self.config.port)) => {
                result
                    .map_err(|source| ClientError::Resolve { host: host.clone(), source })?
                    .next()
                    .ok_or(ClientError::NoAddress(host))?
            }
            _ = self.shutdown.notified() => return Ok(()),
        };

        let mut stream = tokio::select! {
            result = TcpStream::connect(addr) => result?,
            _ = self.shutdown.notified() => return Ok(()),
        };
        let _ = stream.set_nodelay(true);

        stream
            .write_all(&encode_subscribe(self.config.filter))
            .await?;
        info!(server = %addr, "connected and subscribed");

        if events
            .send(ClientEvent::Connected { server: addr })
            .await
            .is_err()
        {
            return Err(ClientError::EventChannelClosed);
        }

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut stream, self.config.max_payload_size) => result?,
                _ = self.shutdown.notified() => return Ok(()),
            };

            let Some((header, payload)) = frame else {
                return Ok(());
            };

            match header.kind {
                FrameKind::Data => {
                    let records = decode_records(&payload)?;
                    debug!(records = records.len(), "data frame");
                    if events.send(ClientEvent::Updates(records)).await.is_err() {
                        return Err(ClientError::EventChannelClosed);
                    }
                }
                FrameKind::Alive => {
                    debug!("alive frame");
                    if events.send(ClientEvent::Alive).await.is_err() {
                        return Err(ClientError::EventChannelClosed);
                    }
                }
                FrameKind::Subscribe => {
                    return Err(ClientError::UnexpectedFrame(header.kind));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalFilter;

    #[test]
    fn test_client_creation() {
        let client = SignalClient::new(ClientConfig::default()).unwrap();
        assert!(!client.is_stopped());
        assert_eq!(client.config().filter, SignalFilter::ALL);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            SignalClient::new(config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let client = SignalClient::new(ClientConfig::default()).unwrap();
        client.stop();
        client.stop();
        assert!(client.is_stopped());
    }

    #[tokio::test]
    async fn test_run_exits_when_stopped() {
        let client = SignalClient::new(ClientConfig {
            // Nothing listens here; the client cycles through reconnects.
            host: "127.0.0.1".into(),
            port: 1,
            reconnect_delay_ms: 10,
            ..Default::default()
        })
        .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx).await })
        };

        // At least one failed attempt is reported before we stop.
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ClientEvent::Disconnected { .. }));

        client.stop();
        runner.await.unwrap().unwrap();
    }
}
