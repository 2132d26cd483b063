//! Mutation handlers - optimistic favorite and delete round trips.

use crate::error::{AppError, Result};
use crate::SharedSession;
use liquidata_engine::{RecordId, Snapshot, Version};
use serde::{Deserialize, Serialize};

/// Request body for a bulk favorite update.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFavoriteRequest {
    pub ids: Vec<RecordId>,
    pub value: bool,
}

/// Request body for a bulk delete.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    pub ids: Vec<RecordId>,
}

/// Outcome of a confirmed mutation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    /// Version of the snapshot after the mutation was confirmed
    pub version: Version,
    pub total: usize,
}

impl From<Snapshot> for MutationResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            version: snapshot.version(),
            total: snapshot.len(),
        }
    }
}

fn require_ids(ids: &[RecordId]) -> Result<()> {
    if ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".to_string()));
    }
    Ok(())
}

pub async fn handle_toggle_favorite(
    session: &SharedSession,
    id: RecordId,
) -> Result<MutationResponse> {
    let snapshot = session.toggle_favorite(id).await?;
    tracing::info!(record_id = id, version = snapshot.version(), "Favorite toggled");
    Ok(snapshot.into())
}

pub async fn handle_delete(session: &SharedSession, id: RecordId) -> Result<MutationResponse> {
    let snapshot = session.delete(id).await?;
    tracing::info!(record_id = id, version = snapshot.version(), "Record deleted");
    Ok(snapshot.into())
}

pub async fn handle_bulk_favorite(
    session: &SharedSession,
    request: BulkFavoriteRequest,
) -> Result<MutationResponse> {
    require_ids(&request.ids)?;
    let snapshot = session.set_favorite(&request.ids, request.value).await?;
    tracing::info!(
        count = request.ids.len(),
        favori = request.value,
        version = snapshot.version(),
        "Favorites updated"
    );
    Ok(snapshot.into())
}

pub async fn handle_bulk_delete(
    session: &SharedSession,
    request: BulkDeleteRequest,
) -> Result<MutationResponse> {
    require_ids(&request.ids)?;
    let snapshot = session.delete_many(&request.ids).await?;
    tracing::info!(
        count = request.ids.len(),
        version = snapshot.version(),
        "Records deleted"
    );
    Ok(snapshot.into())
}
