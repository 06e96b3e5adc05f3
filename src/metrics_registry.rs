//! Ambient observability: named counters/gauges via the `metrics` facade,
//! exported as Prometheus text from `/metrics`.
//! This is this service's own exposition, distinct from component E which
//! *consumes* an upstream Prometheus server.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

pub mod names {
    pub const RATE_LIMIT_OUTCOME: &str = "locate_rate_limit_outcome_total";
    pub const NEAREST_REQUESTS: &str = "locate_nearest_requests_total";
    pub const NEAREST_CANDIDATES: &str = "locate_nearest_candidates";
    pub const HEARTBEAT_CONNECTIONS: &str = "locate_heartbeat_connections";
    pub const ORG_MISMATCH_ERRORS: &str = "locate_org_mismatch_errors_total";
    pub const STREAM_DECODE_ERRORS: &str = "locate_stream_decode_errors_total";
    pub const STORE_ERRORS: &str = "locate_store_errors_total";
    pub const TOKENS_SIGNED: &str = "locate_tokens_signed_total";
    pub const EXPERIMENT_HEALTHY_INSTANCES: &str = "locate_experiment_healthy_instances";
}
