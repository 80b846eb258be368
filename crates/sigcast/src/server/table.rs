// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authoritative signal table.
//!
//! Maps signal id to the latest admitted [`Signal`]. The table is the only
//! long-lived shared mutable state in the server; the owner wraps it in a
//! mutex and keeps critical sections short.

use crate::protocol::{Signal, SignalFilter};
use std::collections::HashMap;

/// Id-keyed map of the latest known signal values.
///
/// Invariant: the stored signal for any id carries the highest timestamp
/// ever admitted for that id.
#[derive(Debug, Default)]
pub struct SignalTable {
    signals: HashMap<u32, Signal>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Replace the entire signal population.
    ///
    /// Observed as a single transition by every other operation because the
    /// caller holds the table lock for the duration.
    pub fn replace_all<I>(&mut self, signals: I)
    where
        I: IntoIterator<Item = Signal>,
    {
        self.signals.clear();
        for s in signals {
            self.signals.insert(s.id, s);
        }
    }

    /// Admit a write under the monotonic-timestamp rule.
    ///
    /// A write for a known id is accepted when its timestamp is not older
    /// than the stored one; equal timestamps are accepted so racing
    /// producers may reorder at the same instant without moving a signal
    /// backwards in time. A write for an unknown id is always accepted.
    /// Returns `false` for a stale write, which the caller drops silently.
    pub fn admit(&mut self, s: Signal) -> bool {
        match self.signals.get_mut(&s.id) {
            Some(stored) => {
                if s.ts >= stored.ts {
                    *stored = s;
                    true
                } else {
                    false
                }
            }
            None => {
                self.signals.insert(s.id, s);
                true
            }
        }
    }

    /// Point lookup by id.
    pub fn get(&self, id: u32) -> Option<Signal> {
        self.signals.get(&id).copied()
    }

    /// Copy out every signal whose kind passes the filter. Order is
    /// unspecified.
    pub fn snapshot(&self, filter: SignalFilter) -> Vec<Signal> {
        self.signals
            .values()
            .filter(|s| filter.matches(s.kind))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalKind;
    use std::time::Duration;

    fn sig(id: u32, kind: SignalKind, value: f64, secs: u64) -> Signal {
        Signal::new(id, kind, value, Duration::from_secs(secs))
    }

    #[test]
    fn test_admit_unknown_id() {
        let mut table = SignalTable::new();
        assert!(table.admit(sig(1, SignalKind::Discrete, 1.0, 5)));
        assert_eq!(table.get(1).unwrap().value, 1.0);
    }

    #[test]
    fn test_admit_newer_timestamp() {
        let mut table = SignalTable::new();
        table.admit(sig(1, SignalKind::Discrete, 0.0, 1));
        assert!(table.admit(sig(1, SignalKind::Discrete, 1.0, 2)));
        assert_eq!(table.get(1).unwrap().ts, Duration::from_secs(2));
    }

    #[test]
    fn test_admit_equal_timestamp() {
        let mut table = SignalTable::new();
        table.admit(sig(1, SignalKind::Analog, 0.5, 3));
        assert!(table.admit(sig(1, SignalKind::Analog, 0.7, 3)));
        assert_eq!(table.get(1).unwrap().value, 0.7);
    }

    #[test]
    fn test_stale_write_dropped() {
        let mut table = SignalTable::new();
        table.admit(sig(1, SignalKind::Discrete, 1.0, 5));
        assert!(!table.admit(sig(1, SignalKind::Discrete, 0.0, 3)));
        // Table keeps the newer entry untouched.
        let stored = table.get(1).unwrap();
        assert_eq!(stored.ts, Duration::from_secs(5));
        assert_eq!(stored.value, 1.0);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        // Interleaved producers racing on one id: whatever the order of
        // admission decisions, the stored timestamp is non-decreasing.
        let mut table = SignalTable::new();
        let mut last = Duration::ZERO;
        for secs in [3u64, 1, 4, 4, 2, 9, 5] {
            table.admit(sig(7, SignalKind::Analog, secs as f64, secs));
            let stored = table.get(7).unwrap().ts;
            assert!(stored >= last);
            last = stored;
        }
        assert_eq!(last, Duration::from_secs(9));
    }

    #[test]
    fn test_snapshot_filters_by_kind() {
        let mut table = SignalTable::new();
        table.admit(sig(1, SignalKind::Discrete, 0.0, 0));
        table.admit(sig(2, SignalKind::Analog, 1.5, 0));
        table.admit(sig(3, SignalKind::Analog, 2.5, 0));

        let all = table.snapshot(SignalFilter::ALL);
        assert_eq!(all.len(), 3);

        let analog = table.snapshot(SignalFilter::ANALOG);
        assert_eq!(analog.len(), 2);
        assert!(analog.iter().all(|s| s.kind == SignalKind::Analog));

        let none = table.snapshot(SignalFilter::from_bits(0));
        assert!(none.is_empty());
    }

    #[test]
    fn test_replace_all_swaps_population() {
        let mut table = SignalTable::new();
        table.admit(sig(1, SignalKind::Discrete, 0.0, 10));
        table.admit(sig(2, SignalKind::Analog, 1.5, 10));

        table.replace_all(vec![sig(7, SignalKind::Analog, 2.2, 0)]);

        assert_eq!(table.len(), 1);
        assert!(table.get(1).is_none());
        assert_eq!(table.get(7).unwrap().value, 2.2);

        // Old ids start fresh: an early timestamp is admissible again.
        assert!(table.admit(sig(1, SignalKind::Discrete, 1.0, 0)));
    }
}
