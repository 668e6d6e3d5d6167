//! Process-wide run counters.
//!
//! Counters only ever increase during a run. Anomaly totals are not kept
//! here; they are derived from the evidence store.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MonitorStats {
    passes_completed: AtomicU64,
    polls: AtomicU64,
    transport_errors: AtomicU64,
    alerts_raised: AtomicU64,
    packages_generated: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub passes_completed: u64,
    pub polls: u64,
    pub transport_errors: u64,
    pub alerts_raised: u64,
    pub packages_generated: u64,
}

impl MonitorStats {
    pub fn record_pass(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_package(&self) {
        self.packages_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            packages_generated: self.packages_generated.load(Ordering::Relaxed),
        }
    }
}
