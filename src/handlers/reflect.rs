//! Reflect endpoint - durable behavior rules

use axum::{extract::State, response::Json};

use crate::atom::BehaviorRule;
use crate::errors::FabricError;
use crate::fabric::ReflectRequest;

use super::router::AppState;

/// POST /api/reflect - upsert a behavioral rule / persona fact
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn reflect(
    State(state): State<AppState>,
    Json(req): Json<ReflectRequest>,
) -> Result<Json<BehaviorRule>, FabricError> {
    let rule = state.reflect(req).await?;
    Ok(Json(rule))
}
