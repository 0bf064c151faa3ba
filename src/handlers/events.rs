//! Event ingest endpoint

use axum::{extract::State, response::Json};

use crate::errors::FabricError;
use crate::fabric::{IngestOutcome, IngestRequest};

use super::router::AppState;

/// POST /api/events - ingest one memory atom
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id, source = %req.source))]
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, FabricError> {
    let outcome = state.ingest(req).await?;
    Ok(Json(outcome))
}
