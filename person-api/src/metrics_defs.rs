use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, method, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const AUDIT_LOG_FAILURES: MetricDef = MetricDef {
    name: "audit_log.failures",
    metric_type: MetricType::Counter,
    description: "Audit records that could not be written",
};

pub const API_KEY_REJECTIONS: MetricDef = MetricDef {
    name: "api_key.rejections",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the API key check. Tagged with error_code.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    AUDIT_LOG_FAILURES,
    API_KEY_REJECTIONS,
];
