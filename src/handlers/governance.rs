//! GDPR deletion and audit-trace endpoints

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::errors::FabricError;
use crate::fabric::{DeletionOutcome, TraceOutcome};

use super::router::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub user_id: String,
}

/// POST /api/delete_user - orchestrated delete across every backend,
/// returning the per-backend report and the hashed deletion proof
#[tracing::instrument(skip(state, req))]
pub async fn delete_user(
    State(state): State<AppState>,
    Json(req): Json<DeleteUserRequest>,
) -> Result<Json<DeletionOutcome>, FabricError> {
    let outcome = state.delete_user(&req.user_id).await?;
    Ok(Json(outcome))
}

/// Requester identity comes from the (out-of-scope) auth layer upstream;
/// this boundary trusts the forwarded fields.
#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    pub user_id: String,
    #[serde(default)]
    pub admin: bool,
}

/// GET /api/trace/{memory_id} - the atom plus its full audit chain.
/// Denied unless the requester owns the atom or is an admin.
#[tracing::instrument(skip(state, query))]
pub async fn trace(
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<TraceOutcome>, FabricError> {
    let outcome = state.trace(&memory_id, &query.user_id, query.admin).await?;
    Ok(Json(outcome))
}
