//! Internal-only enqueue endpoint (spec.md §1 Non-goals: no HTTP CRUD/auth
//! surface here). This is the one write path the API plane exposes, meant
//! for operators and tests to push a task onto the durable queue without a
//! full REST surface in front of it.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub task_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: i64,
}

pub async fn enqueue_handler(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, StatusCode> {
    let job_id = state
        .jobs
        .enqueue(&request.task_name, request.args)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(EnqueueResponse { job_id }))
}
