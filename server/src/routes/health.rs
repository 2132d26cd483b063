//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use liquidata_engine::Version;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether the record cache finished its initial load
    pub loaded: bool,
    pub snapshot_version: Version,
    pub records: usize,
    pub connections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (loaded, snapshot) = state
        .session
        .with_cache(|c| (c.is_initialized(), c.snapshot()));

    Json(HealthResponse {
        status: (if loaded { "ok" } else { "loading" }).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        loaded,
        snapshot_version: snapshot.version(),
        records: snapshot.len(),
        connections: state.conn_manager.connection_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Liquidata Server"
}
