//! Metrics definitions for the host snapshot analyzer.

use shared::metrics_defs::{MetricDef, MetricType};

pub const NEGATIVE_CACHE_HIT: MetricDef = MetricDef {
    name: "hostsnap.negative_cache.hit",
    metric_type: MetricType::Counter,
    description: "Candidate IPs skipped because a recent lookup found no host",
};

pub const NEGATIVE_CACHE_MISS: MetricDef = MetricDef {
    name: "hostsnap.negative_cache.miss",
    metric_type: MetricType::Counter,
    description: "Candidate IPs not present in the negative cache",
};

pub const HOST_NOT_FOUND: MetricDef = MetricDef {
    name: "hostsnap.host.not_found",
    metric_type: MetricType::Counter,
    description: "Snapshots that resolved to no inventory host",
};

pub const HOST_UNCHANGED: MetricDef = MetricDef {
    name: "hostsnap.host.unchanged",
    metric_type: MetricType::Counter,
    description: "Snapshots whose tracked fields match the stored host",
};

pub const HOST_UPDATED: MetricDef = MetricDef {
    name: "hostsnap.host.updated",
    metric_type: MetricType::Counter,
    description: "Hosts updated from a snapshot",
};

pub const ALL_METRICS: &[MetricDef] = &[
    NEGATIVE_CACHE_HIT,
    NEGATIVE_CACHE_MISS,
    HOST_NOT_FOUND,
    HOST_UNCHANGED,
    HOST_UPDATED,
];
