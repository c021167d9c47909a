use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status, handler.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const SHARD_REQUESTS: MetricDef = MetricDef {
    name: "shard.requests",
    metric_type: MetricType::Counter,
    description: "Shard requests sent to the querier. Tagged with kind (live, blocks), outcome.",
};

pub const SHARD_FAILED_BLOCKS: MetricDef = MetricDef {
    name: "shard.failed_blocks",
    metric_type: MetricType::Histogram,
    description: "Failed block queries reported by block shards, summed per trace lookup",
};

pub const FAILED_BLOCK_LIMIT_EXCEEDED: MetricDef = MetricDef {
    name: "trace_lookup.failed_block_limit_exceeded",
    metric_type: MetricType::Counter,
    description: "Trace lookups rejected because too many block queries failed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    SHARD_REQUESTS,
    SHARD_FAILED_BLOCKS,
    FAILED_BLOCK_LIMIT_EXCEEDED,
];
