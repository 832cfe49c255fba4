//! Database backup.
//!
//! Dumps the catalog and track tables as one JSON document into
//! `<app>_db-<hash>.json`, then runs the same archive step as exports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use passvault_storage::{
    AccountRecord, CatalogRepository, CategoryRecord, ClientRecord, TagRecord, TrackFilter,
    TrackRecord, TrackRepository,
};
use serde::Serialize;
use tracing::info;

use crate::archive::ArchiveHandler;
use crate::backup_file::{BackupFile, BackupType};
use crate::error::ExportError;
use crate::events::{Event, EventDispatcher};
use crate::export::{
    GENERATOR, NodeCounts, archive_output, ensure_writable_dir, report_failure, write_output,
};

#[derive(Serialize)]
struct DatabaseDump {
    generator: &'static str,
    version: &'static str,
    time: i64,
    categories: Vec<CategoryRecord>,
    clients: Vec<ClientRecord>,
    tags: Vec<TagRecord>,
    accounts: Vec<AccountRecord>,
    tracks: Vec<TrackRecord>,
}

/// Result of a successful backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub file: BackupFile,
    pub counts: NodeCounts,
    pub tracks: usize,
    pub archive: Option<PathBuf>,
}

pub struct DatabaseBackupService {
    catalog: Arc<dyn CatalogRepository>,
    tracks: Arc<dyn TrackRepository>,
    archiver: Arc<dyn ArchiveHandler>,
    events: Arc<EventDispatcher>,
    app_name: String,
}

impl DatabaseBackupService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        tracks: Arc<dyn TrackRepository>,
        archiver: Arc<dyn ArchiveHandler>,
        events: Arc<EventDispatcher>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            tracks,
            archiver,
            events,
            app_name: app_name.into(),
        }
    }

    /// Write a JSON dump into `dir`.
    ///
    /// # Errors
    ///
    /// - [`ExportError::DirectoryNotWritable`] if `dir` cannot be used.
    /// - [`ExportError::Io`] if the file cannot be written.
    /// - [`ExportError::Serialization`] if the dump cannot be encoded.
    /// - [`ExportError::Storage`] if a table cannot be read.
    ///
    /// Each of these is also dispatched as `backup.failed`.
    pub async fn backup(&self, dir: &Path) -> Result<BackupOutcome, ExportError> {
        let result = self.write_dump(dir).await;
        if let Err(e) = &result {
            report_failure(&self.events, "backup", "backup", dir, e).await;
        }
        result
    }

    async fn write_dump(&self, dir: &Path) -> Result<BackupOutcome, ExportError> {
        ensure_writable_dir(dir).await?;

        let dump = DatabaseDump {
            generator: GENERATOR,
            version: env!("CARGO_PKG_VERSION"),
            time: Utc::now().timestamp(),
            categories: self.catalog.categories().await?,
            clients: self.catalog.clients().await?,
            tags: self.catalog.tags().await?,
            accounts: self.catalog.accounts().await?,
            tracks: self.tracks.list(&TrackFilter::default()).await?,
        };
        let counts = NodeCounts {
            accounts: dump.accounts.len(),
            categories: dump.categories.len(),
            clients: dump.clients.len(),
            tags: dump.tags.len(),
        };
        let tracks = dump.tracks.len();

        let json = serde_json::to_vec_pretty(&dump).map_err(|e| ExportError::Serialization {
            reason: e.to_string(),
        })?;

        let file = BackupFile::new(BackupType::Db, dir, "json", self.app_name.as_str());
        let path = file.path();
        write_output(&path, &json).await?;

        info!(file = %path.display(), bytes = json.len(), tracks, "database backup written");
        self.events
            .dispatch(
                Event::new("backup.created", "database backup written").with_details(
                    serde_json::json!({
                        "file": file.file_name(),
                        "counts": counts,
                        "tracks": tracks,
                    }),
                ),
            )
            .await;

        let archive = archive_output(&self.archiver, &self.events, &path).await;

        Ok(BackupOutcome {
            file,
            counts,
            tracks,
            archive,
        })
    }
}

impl std::fmt::Debug for DatabaseBackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBackupService")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use passvault_storage::{MemoryStore, NewTrack};

    use super::*;
    use crate::archive::GzipArchiver;
    use crate::events::MemoryEventSink;
    use crate::test_support::UnreachableCatalog;

    #[tokio::test]
    async fn dump_contains_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert_category("Servers", "racks").await.unwrap();
        store
            .insert(&NewTrack {
                user_id: None,
                source: "login".to_owned(),
                ipv4: Some(Ipv4Addr::LOCALHOST),
                ipv6: None,
                time: 1,
            })
            .await
            .unwrap();

        let service = DatabaseBackupService::new(
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(GzipArchiver::default()),
            Arc::new(EventDispatcher::new()),
            "passvault",
        );
        let outcome = service.backup(dir.path()).await.unwrap();

        assert!(outcome.file.file_name().starts_with("passvault_db-"));
        assert!(outcome.file.file_name().ends_with(".json"));
        assert_eq!(outcome.counts.categories, 1);
        assert_eq!(outcome.tracks, 1);
        assert!(outcome.archive.is_some());

        let json: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(outcome.file.path()).await.unwrap()).unwrap();
        assert_eq!(json["generator"], "passvault");
        assert_eq!(json["categories"][0]["name"], "Servers");
        assert_eq!(json["tracks"][0]["source"], "login");
    }

    #[tokio::test]
    async fn catalog_failure_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventDispatcher::new());
        let sink = Arc::new(MemoryEventSink::new());
        events.add_sink(sink.clone()).await;
        let service = DatabaseBackupService::new(
            Arc::new(UnreachableCatalog),
            Arc::new(MemoryStore::new()),
            Arc::new(GzipArchiver::default()),
            events,
            "passvault",
        );

        let result = service.backup(dir.path()).await;
        assert!(matches!(result, Err(ExportError::Storage(_))));

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        let event = events.first().unwrap();
        assert_eq!(event.action, "backup.failed");
        assert_eq!(event.details["operation"], "backup");
        assert_eq!(
            event.details["path"],
            dir.path().display().to_string().as_str()
        );
    }
}
