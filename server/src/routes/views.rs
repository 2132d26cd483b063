//! Map and dashboard routes.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{handle_map, handle_stats, MapQuery, MapResponse, StatsResponse};
use crate::AppState;

/// Create view routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/map", get(map_handler))
        .route("/api/stats", get(stats_handler))
}

/// GET /api/map - Geolocated markers.
async fn map_handler(
    State(state): State<AppState>,
    Query(query): Query<MapQuery>,
) -> Result<Json<MapResponse>> {
    let snapshot = state.ready_snapshot()?;
    Ok(Json(handle_map(&snapshot, &query)))
}

/// GET /api/stats - Dashboard statistics.
async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let snapshot = state.ready_snapshot()?;
    Ok(Json(handle_stats(&snapshot)))
}
