// crates/core/src/metrics.rs
//! Protocol counters.
//!
//! - Lock-free increments (atomics) after first-time registration.
//! - Stable CSV order: keys are sorted lexicographically.
//! - Injected, not global: each role instance holds an `Arc<Metrics>`, so two
//!   roles in one process can share a registry or keep separate ones.
//!
//! Intended use:
//!   let m = Arc::new(Metrics::new());
//!   m.inc(OUTBOUND_MESSAGES, 1);
//!   let csv = m.snapshot_csv(); // header + single row

use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};

/// Signed messages handed to the transport. Never decremented.
pub const OUTBOUND_MESSAGES: &str = "teep_outbound_messages";
/// Inbound messages that authenticated and decoded.
pub const INBOUND_ACCEPTED: &str = "teep_inbound_accepted";
/// Inbound messages dropped without a reply.
pub const INBOUND_DROPPED: &str = "teep_inbound_dropped";
/// Signed Error messages sent in reply to bad authenticated input.
pub const ERRORS_SENT: &str = "teep_errors_sent";

/// Counter registry. Registration takes a short write lock; increments don't.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: RwLock<BTreeMap<&'static str, Arc<AtomicU64>>>,
}

impl Metrics {
    /// Registry with the protocol counters pre-registered at zero, so the CSV
    /// schema doesn't depend on which paths have run.
    pub fn new() -> Self {
        let m = Self::default();
        for key in [OUTBOUND_MESSAGES, INBOUND_ACCEPTED, INBOUND_DROPPED, ERRORS_SENT] {
            m.cell(key);
        }
        m
    }

    fn cell(&self, key: &'static str) -> Arc<AtomicU64> {
        // Drop the read guard before taking the write path.
        let existing = {
            let r = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            r.get(key).cloned()
        };
        existing.unwrap_or_else(|| {
            let mut w = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            w.entry(key).or_insert_with(|| Arc::new(AtomicU64::new(0))).clone()
        })
    }

    /// Increment a counter by `by` (counter is created if missing).
    pub fn inc(&self, key: &'static str, by: u64) {
        self.cell(key).fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn outbound_messages(&self) -> u64 {
        self.get(OUTBOUND_MESSAGES)
    }

    /// Produce a 2-line CSV string: header + single row, keys sorted.
    pub fn snapshot_csv(&self) -> String {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let (header, row): (Vec<&str>, Vec<String>) = counters
            .iter()
            .map(|(k, v)| (*k, v.load(Ordering::Relaxed).to_string()))
            .unzip();
        format!("{}\n{}", header.join(","), row.join(","))
    }
}
