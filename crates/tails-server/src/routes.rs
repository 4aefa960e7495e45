//! HTTP routes: the event stream, the status report and the web page assets.

use std::path::PathBuf;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use serde::Serialize;
use tails_core::{Broker, BrokerStats, SourceStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;

use crate::session::{self, StreamConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub source_status: watch::Receiver<SourceStatus>,
    pub stream: StreamConfig,
    /// Directory holding `index.html`, `styles.css` and `app.js`.
    pub assets_dir: PathBuf,
    /// The file being tailed.
    pub path: PathBuf,
    /// Cancelled on server shutdown; ends every open stream.
    pub shutdown: CancellationToken,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub path: String,
    pub broker: BrokerStats,
    pub source: SourceStatus,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let assets = state.assets_dir.clone();
    Router::new()
        .route("/sse", get(session::stream))
        .route("/status", get(status))
        .route_service("/", ServeFile::new(assets.join("index.html")))
        .route_service("/html/styles.css", ServeFile::new(assets.join("styles.css")))
        .route_service("/html/app.js", ServeFile::new(assets.join("app.js")))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /status`: broker counters and source health.
async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, StatusCode> {
    let broker = state
        .broker
        .stats()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let source = state.source_status.borrow().clone();

    Ok(Json(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        path: state.path.display().to_string(),
        broker,
        source,
    }))
}
