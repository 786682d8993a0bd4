use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for the lending engine
#[derive(Clone)]
pub struct Metrics {
    pub lendings_created: Arc<AtomicU64>,
    pub lendings_returned: Arc<AtomicU64>,
    pub consumptions: Arc<AtomicU64>,
    pub stock_adjustments: Arc<AtomicU64>,
    pub rejected_operations: Arc<AtomicU64>,
    pub repair_runs: Arc<AtomicU64>,
    pub issues_repaired: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            lendings_created: Arc::new(AtomicU64::new(0)),
            lendings_returned: Arc::new(AtomicU64::new(0)),
            consumptions: Arc::new(AtomicU64::new(0)),
            stock_adjustments: Arc::new(AtomicU64::new(0)),
            rejected_operations: Arc::new(AtomicU64::new(0)),
            repair_runs: Arc::new(AtomicU64::new(0)),
            issues_repaired: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_lendings_created(&self) {
        self.lendings_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lendings_returned(&self) {
        self.lendings_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_consumptions(&self) {
        self.consumptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stock_adjustments(&self) {
        self.stock_adjustments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repair(&self, fixed: u64) {
        self.repair_runs.fetch_add(1, Ordering::Relaxed);
        self.issues_repaired.fetch_add(fixed, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lendings_created: self.lendings_created.load(Ordering::Relaxed),
            lendings_returned: self.lendings_returned.load(Ordering::Relaxed),
            consumptions: self.consumptions.load(Ordering::Relaxed),
            stock_adjustments: self.stock_adjustments.load(Ordering::Relaxed),
            rejected_operations: self.rejected_operations.load(Ordering::Relaxed),
            repair_runs: self.repair_runs.load(Ordering::Relaxed),
            issues_repaired: self.issues_repaired.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub lendings_created: u64,
    pub lendings_returned: u64,
    pub consumptions: u64,
    pub stock_adjustments: u64,
    pub rejected_operations: u64,
    pub repair_runs: u64,
    pub issues_repaired: u64,
    pub uptime_seconds: u64,
}
