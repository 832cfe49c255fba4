//! Shared application state for `PassVault` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use passvault_core::archive::{ArchiveHandler, GzipArchiver};
use passvault_core::backup::DatabaseBackupService;
use passvault_core::events::EventDispatcher;
use passvault_core::export::{XmlExportService, XmlImportService, XmlVerifyService};
use passvault_core::track::TrackService;
use passvault_storage::{CatalogRepository, TrackRepository};
use tokio::sync::Semaphore;

use crate::config::ServerConfig;

/// Export, verify, import and download requests served at once.
pub const EXPORT_CONCURRENCY: usize = 4;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Attempt tracking and throttling.
    pub tracks: Arc<TrackService>,
    /// XML export writer.
    pub exporter: XmlExportService,
    /// XML export reader.
    pub verifier: XmlVerifyService,
    /// Loads a verified export back into the catalog.
    pub importer: XmlImportService,
    /// JSON database dumps.
    pub backups: DatabaseBackupService,
    /// Event fan-out shared with the services.
    pub events: Arc<EventDispatcher>,
    /// Directory exports and backups are written to and served from.
    pub export_dir: PathBuf,
    /// Admin API token. `None` rejects every guarded request.
    pub admin_token: Option<String>,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Shared budget for every `/v1/export` route.
    pub export_permits: Arc<Semaphore>,
}

impl AppState {
    /// Wire every service onto the given repositories.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        track_repo: Arc<dyn TrackRepository>,
        catalog: Arc<dyn CatalogRepository>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let archiver: Arc<dyn ArchiveHandler> = Arc::new(GzipArchiver::default());

        Self {
            tracks: Arc::new(TrackService::new(
                Arc::clone(&track_repo),
                config.track,
                Arc::clone(&events),
            )),
            exporter: XmlExportService::new(
                Arc::clone(&catalog),
                Arc::clone(&archiver),
                Arc::clone(&events),
                config.app_name.clone(),
            ),
            verifier: XmlVerifyService::new(Arc::clone(&events)),
            importer: XmlImportService::new(Arc::clone(&catalog), Arc::clone(&events)),
            backups: DatabaseBackupService::new(
                catalog,
                track_repo,
                archiver,
                Arc::clone(&events),
                config.app_name.clone(),
            ),
            events,
            export_dir: config.export_dir.clone(),
            admin_token: config.admin_token.clone(),
            trust_proxy: config.trust_proxy,
            export_permits: Arc::new(Semaphore::new(EXPORT_CONCURRENCY)),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("export_dir", &self.export_dir)
            .field("trust_proxy", &self.trust_proxy)
            .finish_non_exhaustive()
    }
}
