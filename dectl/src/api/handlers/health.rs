//! Liveness and observability handlers.

use axum::{extract::State, response::Json};
use serde_json::json;
use tracing::instrument;

use conductor::RouterStateView;

use crate::{errors::Result, AppState};

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is alive"))
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Router counts and per-provider queue snapshots.
#[utoipa::path(
    get,
    path = "/state",
    tag = "health",
    responses((status = 200, description = "Router state"))
)]
#[instrument(skip_all)]
pub async fn state(State(app): State<AppState>) -> Result<Json<RouterStateView>> {
    let view = app.router.state().await?;
    Ok(Json(view))
}
