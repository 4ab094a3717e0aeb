//! Per-porter metric definitions.
//!
//! Names here are suffixes. The emitted name is
//! `<NAMESPACE>_<porter name>_<suffix>`, see [`porter_metric_name`].

use shared::metrics_defs::{MetricDef, MetricType};

pub const NAMESPACE: &str = "cmdb_collector";

pub const RECEIVE_TOTAL: MetricDef = MetricDef {
    name: "receive_total",
    metric_type: MetricType::Counter,
    description: "Total number of received messages",
};

pub const RECEIVE_INVALID_TOTAL: MetricDef = MetricDef {
    name: "receive_invalid_total",
    metric_type: MetricType::Counter,
    description: "Received messages that were empty or had no usable sharding key",
};

pub const RECEIVE_SHARDING_TOTAL: MetricDef = MetricDef {
    name: "receive_sharding_total",
    metric_type: MetricType::Counter,
    description: "Received messages owned by this node",
};

pub const RECEIVE_TIMEOUT_TOTAL: MetricDef = MetricDef {
    name: "receive_timeout_total",
    metric_type: MetricType::Counter,
    description: "Owned messages dropped after timing out on the analyze queue",
};

pub const ANALYZE_TOTAL: MetricDef = MetricDef {
    name: "analyze_total",
    metric_type: MetricType::Counter,
    description: "Analyzed messages. Tagged with status (success, failed).",
};

pub const ANALYZE_DURATION: MetricDef = MetricDef {
    name: "analyze_duration",
    metric_type: MetricType::Histogram,
    description: "Analyze duration of each message in seconds",
};

pub const FUSING_TOTAL: MetricDef = MetricDef {
    name: "fusing_total",
    metric_type: MetricType::Counter,
    description: "Queued messages discarded by the fusing controller",
};

pub const ANALYZE_QUEUE: MetricDef = MetricDef {
    name: "analyze_queue",
    metric_type: MetricType::Gauge,
    description: "Current number of messages waiting in the analyze queue",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RECEIVE_TOTAL,
    RECEIVE_INVALID_TOTAL,
    RECEIVE_SHARDING_TOTAL,
    RECEIVE_TIMEOUT_TOTAL,
    ANALYZE_TOTAL,
    ANALYZE_DURATION,
    FUSING_TOTAL,
    ANALYZE_QUEUE,
];

pub fn porter_metric_name(porter: &str, def: &MetricDef) -> String {
    format!("{NAMESPACE}_{porter}_{}", def.name)
}

/// Registers descriptions for one porter's metrics with the installed recorder.
pub fn describe_porter(porter: &str) {
    for def in ALL_METRICS {
        let name = porter_metric_name(porter, def);
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(name, def.description),
        }
    }
}
