//! Listener throughput counters.
//!
//! Lightweight in-process metrics: total advertisements seen, samples
//! accepted, samples skipped per reason, plus a per-device accepted count.
//! Snapshots are serializable for exposure by hosting code.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Thread-safe counters maintained by the sample listener.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    received: AtomicU64,
    accepted: AtomicU64,
    skipped_decode: AtomicU64,
    skipped_format: AtomicU64,
    skipped_unknown_device: AtomicU64,
    per_device: Mutex<HashMap<String, u64>>,
}

impl ListenerMetrics {
    /// Create new empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received raw advertisement, accepted or not.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample that passed all filters, tagged by device MAC.
    pub fn record_accepted(&self, mac: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        let mut per_device = self.per_device.lock().expect("metrics lock poisoned");
        *per_device.entry(mac.to_string()).or_insert(0) += 1;
    }

    /// Record an advertisement dropped because it failed to decode.
    pub fn record_skipped_decode(&self) {
        self.skipped_decode.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample dropped by the format-policy filter.
    pub fn record_skipped_format(&self) {
        self.skipped_format.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample dropped because its device is not registered.
    pub fn record_skipped_unknown_device(&self) {
        self.skipped_unknown_device.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> ListenerMetricsSnapshot {
        let per_device = self
            .per_device
            .lock()
            .expect("metrics lock poisoned")
            .clone();
        ListenerMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            skipped_decode: self.skipped_decode.load(Ordering::Relaxed),
            skipped_format: self.skipped_format.load(Ordering::Relaxed),
            skipped_unknown_device: self.skipped_unknown_device.load(Ordering::Relaxed),
            per_device,
        }
    }
}

/// Serializable snapshot of listener counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerMetricsSnapshot {
    /// Total raw advertisements received.
    pub received: u64,
    /// Samples that passed all filters.
    pub accepted: u64,
    /// Advertisements dropped because decoding failed.
    pub skipped_decode: u64,
    /// Samples dropped by the format-policy filter.
    pub skipped_format: u64,
    /// Samples dropped because the device is unregistered.
    pub skipped_unknown_device: u64,
    /// Accepted sample count per device MAC.
    pub per_device: HashMap<String, u64>,
}
