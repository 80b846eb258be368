// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Update dispatcher.
//!
//! The single consumer of the update queue. Each round drains the whole
//! queue into one batch and posts it to every live session; the batch is
//! shared so the fan-out cost is one clone of an `Arc` per session. The
//! registry lock is held only for the non-blocking posts, never across a
//! socket operation.
//!
//! Ordering: within one session, updates arrive in admission order. Across
//! sessions only batch boundaries are shared, and two sessions may observe
//! different boundaries.

use crate::protocol::Signal;
use crate::server::ServerShared;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) async fn run_dispatcher(shared: Arc<ServerShared>) {
    let mut batch: Vec<Signal> = Vec::new();

    loop {
        shared.queue.drain_into(&mut batch);

        if batch.is_empty() {
            if shared.is_stopping() {
                break;
            }
            shared.queue.wait().await;
            continue;
        }

        let shared_batch: Arc<[Signal]> = batch.drain(..).collect();
        let (delivered, pruned) = shared.registry.lock().deliver_all(&shared_batch);
        trace!(
            updates = shared_batch.len(),
            delivered,
            pruned,
            "dispatched batch"
        );
    }

    debug!("dispatcher stopped");
}
