// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Demo update producer.
//!
//! Periodically rewrites a random subset of the signal table with fresh
//! values so a server can be exercised without real producers: discrete
//! signals flip between 0 and 1, analog signals take a random walk. Every
//! write goes through the ordinary publish path and is subject to the same
//! admission rule as any external producer.

use crate::protocol::{Signal, SignalFilter, SignalKind};
use crate::server::SignalServer;
use std::time::Duration;
use tracing::{debug, trace};

/// Lower bound of the pause between rounds.
const MIN_PAUSE_MS: u64 = 700;
/// Random extra pause added on top of the lower bound.
const PAUSE_JITTER_MS: u64 = 800;

/// Run the emulation loop until the server stops.
pub async fn run_emulation(server: SignalServer) {
    debug!("signal emulation started");
    let shared = server.shared().clone();

    loop {
        let pause = Duration::from_millis(MIN_PAUSE_MS + fastrand::u64(..PAUSE_JITTER_MS));
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shared.shutdown.notified() => break,
        }
        if shared.is_stopping() {
            break;
        }

        let population = server.get_snapshot(SignalFilter::ALL);
        if population.is_empty() {
            continue;
        }

        let count = 1 + fastrand::usize(..population.len());
        for _ in 0..count {
            let current = population[fastrand::usize(..population.len())];
            let value = match current.kind {
                SignalKind::Discrete => fastrand::u8(..2) as f64,
                SignalKind::Analog => current.value + fastrand::f64() - 0.5,
            };
            let update = Signal::stamped(current.id, current.kind, value);
            let admitted = server.push_signal(update);
            trace!(id = update.id, value, admitted, "emulated update");
        }
    }

    debug!("signal emulation stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::monotonic_now;

    #[test]
    fn test_emulated_updates_pass_admission() {
        let server = SignalServer::new(ServerConfig::default()).unwrap();
        server.set_signals(vec![
            Signal::new(1, SignalKind::Discrete, 0.0, monotonic_now()),
            Signal::new(2, SignalKind::Analog, 1.5, monotonic_now()),
        ]);

        // A freshly stamped update always beats the seeded timestamp.
        let update = Signal::stamped(2, SignalKind::Analog, 2.0);
        assert!(server.push_signal(update));
        assert_eq!(server.get_signal(2).unwrap().value, 2.0);
    }
}
