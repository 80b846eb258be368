// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Update queue between producers and the dispatcher.
//!
//! Admitted signals wait here in admission order until the dispatcher
//! drains them for fan-out. Multiple producers push; exactly one consumer
//! drains. The queue is capped: on overflow the oldest entry is dropped and
//! counted, keeping the stream biased toward the latest values.

use crate::protocol::Signal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// FIFO of admitted updates awaiting fan-out.
#[derive(Debug)]
pub struct UpdateQueue {
    inner: Mutex<VecDeque<Signal>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an admitted signal and wake the dispatcher.
    pub fn push(&self, s: Signal) {
        {
            let mut q = self.inner.lock();
            if q.len() >= self.capacity {
                q.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, capacity = self.capacity, "update queue full, dropped oldest");
            }
            q.push_back(s);
        }
        self.notify.notify_one();
    }

    /// Move every queued signal into `out`, preserving admission order.
    pub fn drain_into(&self, out: &mut Vec<Signal>) {
        let mut q = self.inner.lock();
        out.extend(q.drain(..));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total updates lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until woken by a push or an explicit wake.
    ///
    /// A push between drain and this call leaves a stored permit, so the
    /// single consumer cannot miss it. The caller re-checks queue state
    /// after waking.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake the consumer without enqueuing anything (shutdown path).
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
