// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal server core.
//!
//! Owns the authoritative signal table, the update queue, the subscriber
//! registry, and the listening socket. Producers publish through
//! [`SignalServer::push_signal`]; the dispatcher fans admitted updates out
//! to per-connection session tasks.
//!
//! Locking discipline: the table and queue locks are never held across a
//! socket operation, and when both are needed the order is table first,
//! then queue. The registry lock is always acquired alone; delivery into
//! sessions is a non-blocking post.

use crate::config::{ConfigError, ServerConfig};
use crate::protocol::{Signal, SignalFilter};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod session;
pub mod table;

pub use queue::UpdateQueue;
pub use registry::{SessionId, SubscriberRegistry};
pub use table::SignalTable;

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared between the acceptor, dispatcher, and session tasks.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) table: Mutex<SignalTable>,
    pub(crate) queue: UpdateQueue,
    pub(crate) registry: Mutex<SubscriberRegistry>,
    pub(crate) shutdown: Notify,
    stopping: AtomicBool,
    running: AtomicBool,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl ServerShared {
    pub(crate) fn new(config: ServerConfig) -> Self {
        let queue = UpdateQueue::new(config.update_queue_capacity);
        let (bound, _) = watch::channel(None);
        Self {
            table: Mutex::new(SignalTable::new()),
            queue,
            registry: Mutex::new(SubscriberRegistry::new()),
            shutdown: Notify::new(),
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            bound,
            config,
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// First caller flips the flag and wakes the dispatcher and acceptor.
    pub(crate) fn request_stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.queue.wake();
        self.shutdown.notify_waiters();
        true
    }
}

/// Signal publish/subscribe server.
#[derive(Clone)]
pub struct SignalServer {
    shared: Arc<ServerShared>,
}

impl SignalServer {
    /// Create a server from a validated configuration.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(ServerShared::new(config)),
        })
    }

    /// Run the server: bind, spawn the dispatcher, and accept subscribers
    /// until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.shared.config.bind_address, self.shared.config.port);
        let listener = bind_listener(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener.local_addr()?;
        let _ = self.shared.bound.send(Some(local));
        info!(%local, "signal server listening");

        let dispatcher = tokio::spawn(dispatcher::run_dispatcher(self.shared.clone()));

        let mut accepting = true;
        loop {
            if self.shared.is_stopping() {
                break;
            }
            tokio::select! {
                result = listener.accept(), if accepting => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            tokio::spawn(session::run_session(stream, peer, self.shared.clone()));
                        }
                        Err(e) if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                        ) => {
                            warn!(error = %e, "transient accept error");
                        }
                        Err(e) => {
                            // A poisoned acceptor never recovers. Existing
                            // sessions keep running; only accepting stops.
                            error!(error = %e, "fatal accept error, no longer accepting");
                            accepting = false;
                        }
                    }
                }
                _ = self.shared.shutdown.notified() => {
                    debug!("acceptor shutting down");
                    break;
                }
            }
        }

        drop(listener);
        let _ = dispatcher.await;
        self.shared.running.store(false, Ordering::SeqCst);
        info!("signal server stopped");
        Ok(())
    }

    /// Stop the server: cease accepting, force-close every session, and
    /// wake the dispatcher so it drains and exits. Idempotent.
    pub fn stop(&self) {
        if !self.shared.request_stop() {
            return;
        }
        let closed = self.shared.registry.lock().force_close_all();
        info!(sessions = closed, "server stopping");
    }

    /// Atomically replace the signal population.
    ///
    /// Every connected subscriber is force-closed first: a population
    /// change would silently strand clients on a stale snapshot, so the
    /// reset converts the invalidation into the ordinary
    /// reconnect-and-snapshot path.
    pub fn set_signals(&self, signals: Vec<Signal>) {
        let closed = self.shared.registry.lock().force_close_all();

        let mut table = self.shared.table.lock();
        table.replace_all(signals);
        info!(
            signals = table.len(),
            closed_sessions = closed,
            "signal population replaced"
        );
    }

    /// Publish a signal update.
    ///
    /// Returns `true` when the update passed the monotonic-timestamp
    /// admission check and was queued for fan-out; stale writes are
    /// dropped and `false` is returned. Callable from any task or thread.
    pub fn push_signal(&self, s: Signal) -> bool {
        // Admission and enqueue form one critical section (table lock,
        // then queue lock) so queue order equals admission order.
        let mut table = self.shared.table.lock();
        if !table.admit(s) {
            return false;
        }
        self.shared.queue.push(s);
        true
    }

    /// Point lookup in the signal table.
    pub fn get_signal(&self, id: u32) -> Option<Signal> {
        self.shared.table.lock().get(id)
    }

    /// Copy out every signal whose kind passes the filter.
    pub fn get_snapshot(&self, filter: SignalFilter) -> Vec<Signal> {
        self.shared.table.lock().snapshot(filter)
    }

    /// Number of registered subscriber sessions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Updates lost to queue overflow since startup.
    pub fn dropped_updates(&self) -> u64 {
        self.shared.queue.dropped()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The bound listen address, once [`run`](Self::run) has bound it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.bound.borrow()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_bound(&self) -> SocketAddr {
        let mut rx = self.shared.bound.subscribe();
        loop {
            if let Some(addr) = *rx.borrow_and_update() {
                return addr;
            }
            rx.changed()
                .await
                .expect("bound-address sender lives in shared state");
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ServerShared> {
        &self.shared
    }
}

/// Bind a listener with SO_REUSEADDR so restarts do not trip over sockets
/// lingering in TIME_WAIT.
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalKind;
    use crate::server::registry::{SessionCommand, SubscriberHandle};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sig(id: u32, secs: u64) -> Signal {
        Signal::new(id, SignalKind::Analog, 1.5, Duration::from_secs(secs))
    }

    fn server() -> SignalServer {
        SignalServer::new(ServerConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            update_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            SignalServer::new(config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_push_signal_admits_and_enqueues() {
        let server = server();
        assert!(server.push_signal(sig(1, 5)));
        assert_eq!(server.shared.queue.len(), 1);
        assert_eq!(server.get_signal(1).unwrap().ts, Duration::from_secs(5));
    }

    #[test]
    fn test_stale_push_not_enqueued() {
        let server = server();
        assert!(server.push_signal(sig(1, 5)));
        assert!(!server.push_signal(sig(1, 3)));
        // Only the first push reached the queue.
        assert_eq!(server.shared.queue.len(), 1);
        assert_eq!(server.get_signal(1).unwrap().ts, Duration::from_secs(5));
    }

    #[test]
    fn test_snapshot_by_filter() {
        let server = server();
        server.set_signals(vec![
            Signal::new(1, SignalKind::Discrete, 0.0, Duration::ZERO),
            Signal::new(2, SignalKind::Analog, 1.5, Duration::ZERO),
        ]);
        let snap = server.get_snapshot(SignalFilter::ANALOG);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, 2);
    }

    #[tokio::test]
    async fn test_set_signals_force_closes_sessions() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server
            .shared
            .registry
            .lock()
            .register(SubscriberHandle::new(tx));

        server.set_signals(vec![sig(7, 0)]);

        assert!(matches!(rx.recv().await, Some(SessionCommand::Close)));
        assert_eq!(server.get_signal(7).unwrap().id, 7);
        assert!(server.get_signal(1).is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let server = server();
        server.stop();
        server.stop();
        assert!(server.shared.is_stopping());
    }
}
