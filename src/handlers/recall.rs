//! Recall endpoint

use axum::{extract::State, response::Json};

use crate::errors::FabricError;
use crate::fabric::{RecallOutcome, RecallRequest};

use super::router::AppState;

/// POST /api/recall - plan, fan out and assemble the context pack
#[tracing::instrument(skip(state, req), fields(top_k = req.top_k))]
pub async fn recall(
    State(state): State<AppState>,
    Json(req): Json<RecallRequest>,
) -> Result<Json<RecallOutcome>, FabricError> {
    let outcome = state.recall(req).await?;
    Ok(Json(outcome))
}
