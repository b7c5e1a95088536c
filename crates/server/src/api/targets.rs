//! Target API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use mediarelay_core::{ConnectionCheck, TargetStatus};

use super::items::{engine_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ListTargetsResponse {
    pub targets: Vec<TargetStatus>,
}

/// List configured targets with their live transfer load.
pub async fn list_targets(State(state): State<Arc<AppState>>) -> Json<ListTargetsResponse> {
    Json(ListTargetsResponse {
        targets: state.engine().targets(),
    })
}

/// Connect to a target without transferring anything.
///
/// An unreachable target is still a 200; the body carries the failure.
pub async fn test_target(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionCheck>, ApiError> {
    let check = state.engine().test_target(&name).await.map_err(engine_error)?;
    Ok(Json(check))
}
