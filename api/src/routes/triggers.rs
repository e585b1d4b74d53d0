use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;

use crate::runs::RunRecord;
use crate::state::AppState;
use crate::workflows;

/// Both triggers are fire-and-forget: outcomes are observed later through the
/// connection status and suggestion rows, not through this response.
#[derive(Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub run_id: String,
}

pub async fn start_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<TriggerResponse>) {
    let run_id = workflows::spawn_sync(&state, id);
    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            accepted: true,
            run_id,
        }),
    )
}

pub async fn start_suggestion_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<TriggerResponse>) {
    let run_id = workflows::spawn_suggestions(&state, id);
    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            accepted: true,
            run_id,
        }),
    )
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, StatusCode> {
    state.runs.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}
