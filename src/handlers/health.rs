//! Health and infrastructure handlers
//!
//! Kubernetes probes, Prometheus metrics and port-registry health.

use axum::{http::StatusCode, response::Json};
use axum::extract::State;
use prometheus::Encoder;
use serde::Serialize;

use crate::planner::CoverageReport;
use crate::ports::PortHealth;

use super::router::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub atom_count: u64,
    pub ports: Vec<PortHealth>,
    pub coverage: CoverageReport,
}

/// Main health check: ledger size, per-port breaker state and the
/// current capability coverage picture
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let coverage = state.coverage();
    let status = if coverage.satisfied() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        atom_count: state.store().atom_count(),
        ports: state.registry().health_snapshot(),
        coverage,
    })
}

/// Liveness probe - always 200 if the process is reachable
pub async fn health_live() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Readiness probe - 503 while a strict deployment has a required
/// capability uncovered, since recall/consolidate would refuse anyway
pub async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let coverage = state.coverage();
    let ready = !state.config().strict_coverage || coverage.satisfied();

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "version": env!("CARGO_PKG_VERSION"),
            "missing_required": coverage.missing_required,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Prometheus metrics in text exposition format
pub async fn metrics_endpoint() -> (StatusCode, String) {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = crate::metrics::METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("metrics encoding produced invalid UTF-8: {e}"),
            ),
        },
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        ),
    }
}
