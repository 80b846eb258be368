// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber registry.
//!
//! Holds non-owning back-references to live sessions. Each session is owned
//! by its connection task; the registry only keeps the sending half of the
//! session's command channel. When the task exits, the receiver drops, the
//! sender reports closed, and the entry is pruned on the next sweep.

use crate::protocol::Signal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session identifier, unique for the lifetime of the server.
pub type SessionId = u64;

/// Commands posted onto a session's serialization domain.
///
/// The channel doubles as the session's pending-work FIFO: deliveries and a
/// close arrive in the order they were issued.
#[derive(Debug)]
pub enum SessionCommand {
    /// Fan out a batch of admitted updates.
    Deliver(Arc<[Signal]>),
    /// Server-initiated termination; the session closes its socket.
    Close,
}

/// Back-reference to a live session.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SubscriberHandle {
    pub fn new(tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Post a batch to the session. Returns `false` when the session task
    /// has already exited.
    pub fn deliver(&self, batch: Arc<[Signal]>) -> bool {
        self.tx.send(SessionCommand::Deliver(batch)).is_ok()
    }

    /// Ask the session to close. A no-op if the task already exited.
    pub fn force_close(&self) {
        let _ = self.tx.send(SessionCommand::Close);
    }

    /// True when the owning task has dropped its receiver.
    pub fn is_expired(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry of live subscriber sessions.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    sessions: HashMap<SessionId, SubscriberHandle>,
    next_id: SessionId,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its id.
    pub fn register(&mut self, handle: SubscriberHandle) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(id, handle);
        id
    }

    /// Remove a session entry (normal session teardown).
    pub fn remove(&mut self, id: SessionId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Deliver a batch to every live session, pruning expired entries.
    ///
    /// Returns `(delivered, pruned)`. Sends are non-blocking posts; the
    /// caller may hold the registry lock without stalling on any session.
    pub fn deliver_all(&mut self, batch: &Arc<[Signal]>) -> (usize, usize) {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| handle.deliver(batch.clone()));
        let after = self.sessions.len();
        (after, before - after)
    }

    /// Force-close every registered session and drop expired entries.
    pub fn force_close_all(&mut self) -> usize {
        let mut closed = 0;
        self.sessions.retain(|_, handle| {
            if handle.is_expired() {
                return false;
            }
            handle.force_close();
            closed += 1;
            true
        });
        closed
    }

    /// Drop entries whose session task has exited.
    pub fn prune_expired(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !handle.is_expired());
        before - self.sessions.len()
    }
}
