//! HTTP control surface for the backup monitor.
//!
//! Bound to localhost only. Every handler is a thin presentation layer over
//! [`MonitorHandle`]: reads come from the published status, writes are
//! submitted as commands and answered with `202 Accepted`.

pub mod control;
pub mod health;

use crate::config::MonitorPaths;
use crate::schedule::command::MonitorHandle;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handle: MonitorHandle,
    pub paths: Arc<MonitorPaths>,
    pub hostname: Arc<str>,
    pub started: Instant,
}

impl AppState {
    pub fn new(handle: MonitorHandle, paths: MonitorPaths) -> Self {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            handle,
            paths: Arc::new(paths),
            hostname: hostname.into(),
            started: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(control::status))
        .route("/run", post(control::run))
        .route("/stop", post(control::stop))
        .route("/pause", post(control::toggle_pause))
        .route("/shutdown", post(control::shutdown))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::schedule::command::{self, CommandReceiver};
    use crate::status::StatusReport;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::PathBuf;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    pub struct TestApp {
        pub router: Router,
        pub commands: CommandReceiver,
        pub status: watch::Sender<StatusReport>,
    }

    pub fn app() -> TestApp {
        let (handle, commands, status) = command::channel(CancellationToken::new());
        let paths = MonitorPaths {
            app_dir: PathBuf::from("/data/bm"),
            app_log_path: PathBuf::from("/data/bm/logs/backup-monitor.log"),
            run_log_path: PathBuf::from("/data/bm/logs/restic-last.log"),
        };
        TestApp {
            router: create_router(AppState::new(handle, paths)),
            commands,
            status,
        }
    }

    pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }
}
