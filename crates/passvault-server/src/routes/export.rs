//! Export routes: `/v1/export/*`
//!
//! Create, verify, import and download XML exports. Files are addressed by
//! bare name inside the configured export directory. A wrong password on
//! verify or import is recorded under the `export` throttle source.

use std::net::IpAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower::limit::GlobalConcurrencyLimitLayer;
use tracing::warn;

use passvault_core::backup_file::is_plain_file_name;
use passvault_core::error::ExportError;
use passvault_core::export::{ExportProtection, ImportSummary, NodeCounts, VerifyResult};

use crate::error::AppError;
use crate::middleware::ClientAddr;
use crate::state::AppState;

/// Throttle source for wrong export passwords.
pub const EXPORT_SOURCE: &str = "export";

/// Build the `/v1/export` router. Every route draws on the one `permits`
/// budget.
pub fn router(permits: Arc<Semaphore>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_export))
        .route("/verify", post(verify_export))
        .route("/import", post(import_export))
        .route("/files/{name}", get(download_file))
        .layer(GlobalConcurrencyLimitLayer::with_semaphore(permits))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/export`.
#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// Encrypt the sections with a key derived from this password.
    pub password: Option<String>,
}

/// Request body for verify and import.
#[derive(Debug, Deserialize)]
pub struct FileRequest {
    /// Bare file name inside the export directory.
    pub file: String,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub file: String,
    pub encrypted: bool,
    pub counts: NodeCounts,
    pub archive: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_export(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, AppError> {
    let password = body.password.as_deref().filter(|p| !p.is_empty());
    let protection = ExportProtection::from_password(password)?;

    let outcome = state.exporter.export(&state.export_dir, &protection).await?;
    Ok(Json(ExportResponse {
        file: outcome.file.file_name(),
        encrypted: outcome.encrypted,
        counts: outcome.counts,
        archive: outcome.archive.as_deref().and_then(file_name_of),
    }))
}

async fn verify_export(
    State(state): State<Arc<AppState>>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    Json(body): Json<FileRequest>,
) -> Result<Json<VerifyResult>, AppError> {
    let path = resolve(&state, &body.file).await?;
    let result = state.verifier.verify(&path, body.password.as_deref()).await;
    Ok(Json(track_wrong_password(&state, address, result).await?))
}

async fn import_export(
    State(state): State<Arc<AppState>>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    Json(body): Json<FileRequest>,
) -> Result<Json<ImportSummary>, AppError> {
    let path = resolve(&state, &body.file).await?;
    let result = state.importer.import(&path, body.password.as_deref()).await;
    Ok(Json(track_wrong_password(&state, address, result).await?))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let path = resolve(&state, &name).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Internal(format!("failed to read {name}: {e}")))?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => "application/xml",
        Some("json") => "application/json",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    };
    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| AppError::BadRequest("file name is not a valid header value".to_owned()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Map a bare file name onto an existing file in the export directory.
async fn resolve(state: &AppState, name: &str) -> Result<PathBuf, AppError> {
    if !is_plain_file_name(name) {
        return Err(AppError::BadRequest(format!("invalid file name '{name}'")));
    }

    let path = state.export_dir.join(name);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => Err(AppError::NotFound(format!("no export file named '{name}'"))),
    }
}

/// Record a wrong-password attempt before surfacing the error.
async fn track_wrong_password<T>(
    state: &AppState,
    address: Option<IpAddr>,
    result: Result<T, ExportError>,
) -> Result<T, AppError> {
    if let Err(ExportError::WrongPassword { .. }) = &result {
        let request = state.tracks.request(EXPORT_SOURCE, address);
        if let Err(e) = state.tracks.add(&request).await {
            warn!(error = %e, "failed to record wrong export password");
        }
    }
    result.map_err(AppError::from)
}

/// Bare file name of a path, for responses that must not leak directories.
pub(crate) fn file_name_of(path: &FsPath) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
}
