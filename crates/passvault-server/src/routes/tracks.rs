//! Track administration routes: `/v1/sys/tracks/*`
//!
//! List, unlock, delete and clear recorded attempts.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use passvault_storage::{TrackFilter, TrackRecord};

use crate::error::AppError;
use crate::state::AppState;

/// Hard cap on rows returned by one listing.
const MAX_LIMIT: usize = 1000;

/// Build the `/v1/sys/tracks` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tracks))
        .route("/clear", post(clear_tracks))
        .route("/{id}/unlock", post(unlock_track))
        .route("/{id}", delete(delete_track))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TrackListQuery {
    /// Only rows still counting towards throttling.
    #[serde(default)]
    pub active: bool,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TrackView {
    pub id: i64,
    pub user_id: Option<i64>,
    pub source: String,
    pub address: Option<String>,
    pub tracked_at: Option<DateTime<Utc>>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl From<TrackRecord> for TrackView {
    fn from(track: TrackRecord) -> Self {
        Self {
            active: track.is_active(),
            address: track.address().map(|ip| ip.to_string()),
            tracked_at: DateTime::from_timestamp(track.time, 0),
            unlocked_at: track.time_unlock.and_then(|t| DateTime::from_timestamp(t, 0)),
            id: track.id,
            user_id: track.user_id,
            source: track.source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrackListResponse {
    pub tracks: Vec<TrackView>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_tracks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrackListQuery>,
) -> Result<Json<TrackListResponse>, AppError> {
    let filter = TrackFilter {
        source: query.source.filter(|s| !s.is_empty()),
        active_only: query.active,
        limit: Some(query.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)),
    };

    let tracks = state.tracks.list(&filter).await?;
    Ok(Json(TrackListResponse {
        tracks: tracks.into_iter().map(TrackView::from).collect(),
    }))
}

async fn clear_tracks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearResponse>, AppError> {
    let removed = state.tracks.clear().await?;
    Ok(Json(ClearResponse { removed }))
}

async fn unlock_track(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.tracks.unlock(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_track(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.tracks.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
