//! Consolidation and benchmarking endpoints

use axum::{extract::State, response::Json};
use serde::Deserialize;

use crate::errors::FabricError;
use crate::fabric::{BenchmarkOutcome, BenchmarkRequest, ConsolidateOutcome};

use super::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ConsolidateRequest {
    /// Scope to one user (synchronous pass) or omit to run the full
    /// nightly task list
    #[serde(default)]
    pub user_id: Option<String>,
    /// Compute without persisting
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /api/consolidate
#[tracing::instrument(skip(state, req), fields(scoped = req.user_id.is_some(), dry_run = req.dry_run))]
pub async fn consolidate(
    State(state): State<AppState>,
    Json(req): Json<ConsolidateRequest>,
) -> Result<Json<ConsolidateOutcome>, FabricError> {
    let outcome = state.consolidate(req.user_id, req.dry_run).await?;
    Ok(Json(outcome))
}

/// POST /api/benchmark - external runner when configured, otherwise a
/// clearly-labeled proxy estimate
#[tracing::instrument(skip(state, req))]
pub async fn benchmark(
    State(state): State<AppState>,
    Json(req): Json<BenchmarkRequest>,
) -> Result<Json<BenchmarkOutcome>, FabricError> {
    let outcome = state.benchmark(req).await?;
    Ok(Json(outcome))
}
