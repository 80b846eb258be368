// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection subscriber session.
//!
//! Each accepted connection runs one session task. The task is the
//! session's serialization domain: every socket write happens here, so at
//! most one write is ever outstanding and outbound frames are strictly
//! FIFO. Work arrives over the session's command channel, which doubles as
//! the pending-frame queue.
//!
//! Lifecycle: read the single subscribe frame, register with the
//! subscriber registry, send the initial snapshot, then stream deliveries
//! until the peer closes, a protocol violation occurs, or the server
//! forces a close. The push protocol admits exactly one inbound frame; the
//! session keeps reading only to observe peer close, and any second frame
//! terminates the connection.

use crate::protocol::{encode_data, read_frame, FrameKind, Signal, SignalFilter};
use crate::server::registry::{SessionCommand, SubscriberHandle};
use crate::server::ServerShared;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) async fn run_session(stream: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>) {
    if shared.config.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    let max_payload = shared.config.max_payload_size;
    let (mut reader, mut writer) = stream.into_split();

    // AWAIT_SUBSCRIBE: the first frame must be a valid subscribe.
    let filter = match read_frame(&mut reader, max_payload).await {
        Ok(Some((header, payload))) => {
            if header.kind != FrameKind::Subscribe {
                warn!(%peer, kind = ?header.kind, "expected subscribe frame, closing");
                return;
            }
            if payload.is_empty() {
                warn!(%peer, "subscribe payload empty, closing");
                return;
            }
            SignalFilter::from_bits(payload[0])
        }
        Ok(None) => {
            debug!(%peer, "peer closed before subscribing");
            return;
        }
        Err(e) => {
            warn!(%peer, error = %e, "rejecting connection");
            return;
        }
    };

    // REGISTERED: visible to the dispatcher from here on. Registering
    // before taking the snapshot means no update can fall between the two;
    // an update admitted in that window is at worst seen twice with equal
    // values, never missed.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = shared.registry.lock().register(SubscriberHandle::new(tx));
    info!(%peer, session_id, %filter, "client subscribed");

    let mut last_send = Instant::now();

    let snapshot = shared.table.lock().snapshot(filter);
    if !snapshot.is_empty() {
        let frame = encode_data(&snapshot);
        if let Err(e) = writer.write_all(&frame).await {
            warn!(%peer, error = %e, "snapshot write failed");
            shared.registry.lock().remove(session_id);
            return;
        }
        last_send = Instant::now();
    }

    // DELIVERING: concurrent reads (peer-close watch) and ordered writes.
    let reason = loop {
        tokio::select! {
            frame = read_frame(&mut reader, max_payload) => {
                match frame {
                    Ok(None) => {
                        debug!(%peer, "peer closed connection");
                        break "peer closed";
                    }
                    Ok(Some(_)) => {
                        warn!(%peer, "client sent a second frame, closing");
                        break "second frame";
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "read error");
                        break "read error";
                    }
                }
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(SessionCommand::Deliver(batch)) => {
                        let selected: Vec<&Signal> = batch
                            .iter()
                            .filter(|s| filter.matches(s.kind))
                            .collect();
                        if selected.is_empty() {
                            continue;
                        }
                        let frame = encode_data(selected);
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!(%peer, error = %e, "write error");
                            break "write error";
                        }
                        last_send = Instant::now();
                    }
                    Some(SessionCommand::Close) => {
                        debug!(%peer, "forced close");
                        break "forced close";
                    }
                    None => break "registry dropped",
                }
            }
        }
    };

    // CLOSING: shut both directions down and drop the registry entry. The
    // registry's back-reference also expires with this task, so a late
    // dispatcher sweep prunes it even if remove raced.
    let _ = writer.shutdown().await;
    shared.registry.lock().remove(session_id);
    debug!(
        %peer,
        session_id,
        reason,
        idle_ms = last_send.elapsed().as_millis() as u64,
        "session closed"
    );
}
