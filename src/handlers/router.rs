//! Router configuration - centralized route definitions
//!
//! Routes are split into public (health checks, metrics - always
//! reachable for probes and scraping) and API routes (rate-limited and
//! concurrency-limited by the caller).

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::fabric::MemoryFabric;

use super::{events, governance, health, maintenance, recall, reflect};

/// Application state type alias
pub type AppState = Arc<MemoryFabric>;

/// Public routes: Kubernetes probes and Prometheus scraping must always
/// be reachable, so no rate limiting is applied here.
pub fn build_public_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::health_live))
        .route("/health/ready", get(health::health_ready))
        .route("/metrics", get(health::metrics_endpoint))
        .with_state(state)
}

/// Control-plane API routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/events", post(events::ingest_event))
        .route("/api/recall", post(recall::recall))
        .route("/api/consolidate", post(maintenance::consolidate))
        .route("/api/benchmark", post(maintenance::benchmark))
        .route("/api/reflect", post(reflect::reflect))
        .route("/api/delete_user", post(governance::delete_user))
        .route("/api/trace/{memory_id}", get(governance::trace))
        .with_state(state)
}

/// Combined router without the global layers (tests use this directly;
/// main.rs applies rate limiting, CORS and concurrency limits on top)
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(build_public_routes(state.clone()))
        .merge(build_api_routes(state))
}
