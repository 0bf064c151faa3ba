//! Prometheus metrics for the memory fabric
//!
//! Exposes operational metrics for monitoring and alerting: ingest/recall
//! rates and latencies, per-port fan-out outcomes, circuit-breaker
//! transitions, and consolidator task counters.
//!
//! NOTE: user_id never appears in metric labels to prevent high-cardinality
//! explosion. Port names are bounded by the registry and are safe labels.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "memfabric_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memfabric_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Ingest metrics
    // ============================================================================

    /// Ingest operations by outcome (created / duplicate / quarantined / blocked)
    pub static ref INGEST_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memfabric_ingest_total", "Total ingest operations"),
        &["outcome"]
    ).unwrap();

    /// Ingest operation duration
    pub static ref INGEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "memfabric_ingest_duration_seconds",
            "Ingest operation duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5])
    ).unwrap();

    // ============================================================================
    // Recall metrics
    // ============================================================================

    /// Recall operations by result
    pub static ref RECALL_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memfabric_recall_total", "Total recall operations"),
        &["result"]
    ).unwrap();

    /// Recall fan-out duration end to end
    pub static ref RECALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "memfabric_recall_duration_seconds",
            "Recall fan-out duration"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 3.0])
    ).unwrap();

    /// Per-port search outcomes (ok / timeout / error / skipped_open)
    pub static ref PORT_SEARCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memfabric_port_search_total", "Port search outcomes"),
        &["port", "outcome"]
    ).unwrap();

    /// Per-port search duration
    pub static ref PORT_SEARCH_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "memfabric_port_search_duration_seconds",
            "Per-port search duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0]),
        &["port"]
    ).unwrap();

    /// Circuit-breaker state transitions
    pub static ref BREAKER_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "memfabric_breaker_transitions_total",
            "Circuit breaker state transitions"
        ),
        &["port", "to_state"]
    ).unwrap();

    // ============================================================================
    // Maintenance metrics
    // ============================================================================

    /// Consolidator task outcomes per task
    pub static ref CONSOLIDATOR_TASKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "memfabric_consolidator_tasks_total",
            "Consolidator task outcomes"
        ),
        &["task", "status"]
    ).unwrap();

    /// Atoms suppressed by the decay pass in the last run
    pub static ref DECAY_SUPPRESSED_LAST_RUN: IntGauge = IntGauge::new(
        "memfabric_decay_suppressed_last_run",
        "Atoms suppressed by the most recent decay pass"
    ).unwrap();

    /// GDPR deletions by overall result
    pub static ref DELETION_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memfabric_deletion_total", "GDPR deletion requests"),
        &["result"]
    ).unwrap();
}

/// Register all metrics with the global registry. Call once at startup.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(INGEST_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(INGEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(RECALL_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(RECALL_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(PORT_SEARCH_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(PORT_SEARCH_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(BREAKER_TRANSITIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CONSOLIDATOR_TASKS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(DECAY_SUPPRESSED_LAST_RUN.clone()))?;
    METRICS_REGISTRY.register(Box::new(DELETION_TOTAL.clone()))?;
    Ok(())
}
