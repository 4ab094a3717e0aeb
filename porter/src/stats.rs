use crate::metrics_defs::{
    ANALYZE_DURATION, ANALYZE_QUEUE, ANALYZE_TOTAL, FUSING_TOTAL, RECEIVE_INVALID_TOTAL,
    RECEIVE_SHARDING_TOTAL, RECEIVE_TIMEOUT_TOTAL, RECEIVE_TOTAL, porter_metric_name,
};
use metrics::{Counter, Gauge, Histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time copy of a porter's counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub invalid: u64,
    pub sharded: u64,
    pub timed_out: u64,
    pub analyze_success: u64,
    pub analyze_failed: u64,
    pub fused: u64,
    pub analyze_count: u64,
    pub analyze_seconds_total: f64,
}

impl StatsSnapshot {
    pub fn mean_analyze_seconds(&self) -> f64 {
        if self.analyze_count == 0 {
            0.0
        } else {
            self.analyze_seconds_total / self.analyze_count as f64
        }
    }
}

/// Process-lifetime counters for one porter.
///
/// Every update goes both to the in-process atomics and to the metrics
/// recorder under the porter's namespaced names.
pub struct PorterStats {
    received: AtomicU64,
    invalid: AtomicU64,
    sharded: AtomicU64,
    timed_out: AtomicU64,
    analyze_success: AtomicU64,
    analyze_failed: AtomicU64,
    fused: AtomicU64,
    analyze_count: AtomicU64,
    analyze_micros: AtomicU64,

    received_counter: Counter,
    invalid_counter: Counter,
    sharded_counter: Counter,
    timed_out_counter: Counter,
    success_counter: Counter,
    failed_counter: Counter,
    fused_counter: Counter,
    duration: Histogram,
    queue: Gauge,
}

impl PorterStats {
    pub fn new(porter: &str) -> Self {
        let analyze_total = porter_metric_name(porter, &ANALYZE_TOTAL);
        PorterStats {
            received: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            sharded: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            analyze_success: AtomicU64::new(0),
            analyze_failed: AtomicU64::new(0),
            fused: AtomicU64::new(0),
            analyze_count: AtomicU64::new(0),
            analyze_micros: AtomicU64::new(0),

            received_counter: metrics::counter!(porter_metric_name(porter, &RECEIVE_TOTAL)),
            invalid_counter: metrics::counter!(porter_metric_name(porter, &RECEIVE_INVALID_TOTAL)),
            sharded_counter: metrics::counter!(porter_metric_name(porter, &RECEIVE_SHARDING_TOTAL)),
            timed_out_counter: metrics::counter!(porter_metric_name(porter, &RECEIVE_TIMEOUT_TOTAL)),
            success_counter: metrics::counter!(analyze_total.clone(), "status" => "success"),
            failed_counter: metrics::counter!(analyze_total, "status" => "failed"),
            fused_counter: metrics::counter!(porter_metric_name(porter, &FUSING_TOTAL)),
            duration: metrics::histogram!(porter_metric_name(porter, &ANALYZE_DURATION)),
            queue: metrics::gauge!(porter_metric_name(porter, &ANALYZE_QUEUE)),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.received_counter.increment(1);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
        self.invalid_counter.increment(1);
    }

    pub fn record_sharded(&self) {
        self.sharded.fetch_add(1, Ordering::Relaxed);
        self.sharded_counter.increment(1);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.timed_out_counter.increment(1);
    }

    pub fn record_fused(&self, n: u64) {
        self.fused.fetch_add(n, Ordering::Relaxed);
        self.fused_counter.increment(n);
    }

    pub fn record_analyze(&self, success: bool, elapsed: Duration) {
        if success {
            self.analyze_success.fetch_add(1, Ordering::Relaxed);
            self.success_counter.increment(1);
        } else {
            self.analyze_failed.fetch_add(1, Ordering::Relaxed);
            self.failed_counter.increment(1);
        }
        self.analyze_count.fetch_add(1, Ordering::Relaxed);
        self.analyze_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.duration.record(elapsed.as_secs_f64());
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue.set(len as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            sharded: self.sharded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            analyze_success: self.analyze_success.load(Ordering::Relaxed),
            analyze_failed: self.analyze_failed.load(Ordering::Relaxed),
            fused: self.fused.load(Ordering::Relaxed),
            analyze_count: self.analyze_count.load(Ordering::Relaxed),
            analyze_seconds_total: self.analyze_micros.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}
