//! Dispatch counters for event buses.
//!
//! Counters are plain atomics updated on the dispatch path; reading them
//! through [`EventBus::metrics`](crate::EventBus::metrics) takes a consistent
//! enough [`MetricsSnapshot`] for monitoring, not an atomic cut.
//!
//! # Examples
//!
//! ```rust
//! use clusterbus::{EventBus, EventTag, Payload};
//!
//! let bus = EventBus::new();
//! bus.fire_payload(Payload::empty(EventTag::new("pkg", "Ping"))).unwrap();
//!
//! let snapshot = bus.metrics();
//! assert_eq!(snapshot.fired_payload, 1);
//! assert_eq!(snapshot.undelivered, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic dispatch counters shared by a bus and its in-flight deliveries.
#[derive(Debug)]
pub struct DispatchMetrics {
    fired_typed: AtomicU64,
    fired_payload: AtomicU64,
    deliveries_submitted: AtomicU64,
    deliveries_completed: AtomicU64,
    deliveries_rejected: AtomicU64,
    callback_failures: AtomicU64,
    undelivered: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Typed events fired.
    pub fired_typed: u64,
    /// Payload events fired.
    pub fired_payload: u64,
    /// Deliveries handed to the executor.
    pub deliveries_submitted: u64,
    /// Deliveries that ran to completion, successfully or not.
    pub deliveries_completed: u64,
    /// Deliveries the executor refused; their callbacks never ran.
    pub deliveries_rejected: u64,
    /// Deliveries whose callback returned an error or panicked.
    pub callback_failures: u64,
    /// Fires that matched no listener and no handler.
    pub undelivered: u64,
    /// Time since the counters were created.
    pub uptime: Duration,
}

impl DispatchMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self {
            fired_typed: AtomicU64::new(0),
            fired_payload: AtomicU64::new(0),
            deliveries_submitted: AtomicU64::new(0),
            deliveries_completed: AtomicU64::new(0),
            deliveries_rejected: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn record_fire(&self, remote: bool, deliveries: usize) {
        if remote {
            self.fired_payload.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fired_typed.fetch_add(1, Ordering::Relaxed);
        }
        if deliveries == 0 {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.deliveries_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.deliveries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, failed: bool) {
        if failed {
            self.callback_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.deliveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fired_typed: self.fired_typed.load(Ordering::Relaxed),
            fired_payload: self.fired_payload.load(Ordering::Relaxed),
            deliveries_submitted: self.deliveries_submitted.load(Ordering::Relaxed),
            deliveries_completed: self.deliveries_completed.load(Ordering::Relaxed),
            deliveries_rejected: self.deliveries_rejected.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Total events fired in either representation.
    pub fn total_fired(&self) -> u64 {
        self.fired_typed + self.fired_payload
    }

    /// Deliveries submitted but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.deliveries_submitted
            .saturating_sub(self.deliveries_completed)
    }

    /// Average fire rate since the counters were created.
    pub fn events_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds > 0.0 {
            self.total_fired() as f64 / seconds
        } else {
            0.0
        }
    }
}
