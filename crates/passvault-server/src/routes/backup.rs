//! Database backup route: `POST /v1/backup`

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use passvault_core::export::NodeCounts;

use crate::error::AppError;
use crate::routes::export::file_name_of;
use crate::state::AppState;

/// Build the `/v1/backup` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_backup))
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub file: String,
    pub counts: NodeCounts,
    pub tracks: usize,
    pub archive: Option<String>,
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupResponse>, AppError> {
    let outcome = state.backups.backup(&state.export_dir).await?;
    Ok(Json(BackupResponse {
        file: outcome.file.file_name(),
        counts: outcome.counts,
        tracks: outcome.tracks,
        archive: outcome.archive.as_deref().and_then(file_name_of),
    }))
}
