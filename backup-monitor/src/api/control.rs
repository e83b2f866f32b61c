//! Status and control endpoints.

use super::AppState;
use crate::config::MonitorPaths;
use crate::status::StatusReport;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub report: StatusReport,
    pub paths: MonitorPaths,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: String,
}

fn accepted() -> (StatusCode, Json<AcceptedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
        }),
    )
}

/// GET /status - Latest published status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        report: state.handle.status(),
        paths: (*state.paths).clone(),
    })
}

/// POST /run - Start a backup as soon as possible
pub async fn run(State(state): State<AppState>) -> (StatusCode, Json<AcceptedResponse>) {
    tracing::info!("Run requested over HTTP");
    state.handle.request_run();
    accepted()
}

/// POST /stop - Kill the running backup
pub async fn stop(State(state): State<AppState>) -> (StatusCode, Json<AcceptedResponse>) {
    tracing::info!("Stop requested over HTTP");
    state.handle.request_stop();
    accepted()
}

/// POST /pause - Pause, or resume if already paused
pub async fn toggle_pause(State(state): State<AppState>) -> (StatusCode, Json<AcceptedResponse>) {
    tracing::info!("Pause toggle requested over HTTP");
    state.handle.toggle_pause();
    accepted()
}

/// POST /shutdown - Stop the monitor, optionally relaunching it
pub async fn shutdown(
    State(state): State<AppState>,
    body: Option<Json<ShutdownRequest>>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let Json(req) = body.unwrap_or_default();
    tracing::info!(restart = req.restart, "Shutdown requested over HTTP");
    state.handle.request_shutdown(req.restart);
    accepted()
}
