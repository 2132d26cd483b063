//! Record listing and mutation routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use liquidata_engine::{Record, RecordId};

use crate::error::Result;
use crate::handlers::{
    handle_bulk_delete, handle_bulk_favorite, handle_delete, handle_listing, handle_record,
    handle_toggle_favorite, BulkDeleteRequest, BulkFavoriteRequest, ListingQuery,
    ListingResponse, MutationResponse,
};
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/records", get(listing_handler))
        .route("/api/records/{id}", get(record_handler).delete(delete_handler))
        .route("/api/records/{id}/favorite", post(toggle_handler))
        .route("/api/records/bulk/favorite", post(bulk_favorite_handler))
        .route("/api/records/bulk/delete", post(bulk_delete_handler))
}

/// GET /api/records - One page of the filtered, sorted listing.
async fn listing_handler(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ListingResponse>> {
    let snapshot = state.ready_snapshot()?;
    let response = handle_listing(&snapshot, &query, state.config.page_size)?;
    Ok(Json(response))
}

/// GET /api/records/{id} - One record.
async fn record_handler(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<Json<Record>> {
    let snapshot = state.ready_snapshot()?;
    Ok(Json(handle_record(&snapshot, id)?))
}

/// POST /api/records/{id}/favorite - Toggle the favorite flag.
async fn toggle_handler(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<Json<MutationResponse>> {
    state.ready_snapshot()?;
    let response = handle_toggle_favorite(&state.session, id).await?;
    Ok(Json(response))
}

/// DELETE /api/records/{id} - Delete one record.
async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<Json<MutationResponse>> {
    state.ready_snapshot()?;
    let response = handle_delete(&state.session, id).await?;
    Ok(Json(response))
}

/// POST /api/records/bulk/favorite - Set the favorite flag of several records.
async fn bulk_favorite_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkFavoriteRequest>,
) -> Result<Json<MutationResponse>> {
    state.ready_snapshot()?;
    let response = handle_bulk_favorite(&state.session, request).await?;
    Ok(Json(response))
}

/// POST /api/records/bulk/delete - Delete several records.
async fn bulk_delete_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<MutationResponse>> {
    state.ready_snapshot()?;
    let response = handle_bulk_delete(&state.session, request).await?;
    Ok(Json(response))
}
