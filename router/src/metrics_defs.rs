//! Metrics definitions for the router.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ROUTE_MATCHED: MetricDef = MetricDef {
    name: "route.matched",
    metric_type: MetricType::Counter,
    description: "Number of requests addressed to the router",
};

pub const ROUTE_NO_MATCH: MetricDef = MetricDef {
    name: "route.no_match",
    metric_type: MetricType::Counter,
    description: "Number of requests that did not carry the router's scheme",
};

pub const REGISTRY_BUILD: MetricDef = MetricDef {
    name: "registry.build",
    metric_type: MetricType::Counter,
    description: "Number of registry builds, tagged by outcome",
};

pub const REGISTRY_BACKENDS: MetricDef = MetricDef {
    name: "registry.backends",
    metric_type: MetricType::Gauge,
    description: "Number of backends in the most recently built registry",
};

pub const BACKEND_LOAD_ATTEMPT: MetricDef = MetricDef {
    name: "backend.load.attempt",
    metric_type: MetricType::Counter,
    description: "Number of times a backend load path was entered",
};

pub const BACKEND_LOAD_FAILURE: MetricDef = MetricDef {
    name: "backend.load.failure",
    metric_type: MetricType::Counter,
    description: "Number of backend loads that failed",
};

pub const BACKEND_LOAD_DURATION: MetricDef = MetricDef {
    name: "backend.load.duration",
    metric_type: MetricType::Histogram,
    description: "Time to open and instantiate a backend in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ROUTE_MATCHED,
    ROUTE_NO_MATCH,
    REGISTRY_BUILD,
    REGISTRY_BACKENDS,
    BACKEND_LOAD_ATTEMPT,
    BACKEND_LOAD_FAILURE,
    BACKEND_LOAD_DURATION,
];
