//! Health check endpoint.

use super::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

/// GET /health - Liveness and version
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.handle.shutdown_token().is_cancelled() {
        "stopping"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "hostname": &*state.hostname,
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, body_json, get};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let test = app();

        let response = test.router.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptime_secs"].is_u64());
    }
}
