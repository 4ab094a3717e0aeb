//! Metrics definitions for the membership ring.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RING_REFRESH_FAILED: MetricDef = MetricDef {
    name: "membership.refresh.failed",
    metric_type: MetricType::Counter,
    description: "Number of ring refreshes that failed to query service discovery",
};

pub const RING_REFRESH_DURATION: MetricDef = MetricDef {
    name: "membership.refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to query discovery and reconcile the ring in seconds",
};

pub const RING_NODES: MetricDef = MetricDef {
    name: "membership.nodes",
    metric_type: MetricType::Gauge,
    description: "Number of nodes currently on the ring",
};

pub const RING_CHANGES: MetricDef = MetricDef {
    name: "membership.changes",
    metric_type: MetricType::Counter,
    description: "Number of nodes added to or removed from the ring",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RING_REFRESH_FAILED,
    RING_REFRESH_DURATION,
    RING_NODES,
    RING_CHANGES,
];
