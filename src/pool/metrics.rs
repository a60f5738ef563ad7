// ABOUTME: Metrics and observability for provider connection pools
//
// Tracks:
// - Connections: created, creation failures
// - Checkouts: acquired, reused, waited, timed out, released
// - Health check cycles

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-pool counters (lock-free)
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connections_created: AtomicU64,
    pub creation_failures: AtomicU64,
    pub acquired: AtomicU64,
    pub reused: AtomicU64,
    pub waited: AtomicU64,
    pub timeouts: AtomicU64,
    pub released: AtomicU64,
    pub health_checks: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn creation_failed(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wait_started(&self) {
        self.waited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wait_timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn health_check_run(&self) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of acquisitions served without creating a connection
    pub fn reuse_rate(&self) -> f64 {
        let acquired = self.acquired.load(Ordering::Relaxed);
        if acquired == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.reused.load(Ordering::Relaxed) as f64 / acquired as f64;
        rate
    }
}
