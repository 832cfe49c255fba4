use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use passvault_storage::CatalogRepository;
use serde::Serialize;
use tracing::info;

use super::document::{self, ExportSections};
use super::{
    ExportProtection, NodeCounts, archive_output, ensure_writable_dir, report_failure,
    write_output,
};
use crate::archive::ArchiveHandler;
use crate::backup_file::{BackupFile, BackupType};
use crate::error::ExportError;
use crate::events::{Event, EventDispatcher};

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub file: BackupFile,
    pub encrypted: bool,
    pub counts: NodeCounts,
    /// The gzip copy, `None` if the archive step failed.
    pub archive: Option<PathBuf>,
}

/// Writes the catalog to an XML file.
pub struct XmlExportService {
    catalog: Arc<dyn CatalogRepository>,
    archiver: Arc<dyn ArchiveHandler>,
    events: Arc<EventDispatcher>,
    app_name: String,
}

impl XmlExportService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        archiver: Arc<dyn ArchiveHandler>,
        events: Arc<EventDispatcher>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            archiver,
            events,
            app_name: app_name.into(),
        }
    }

    /// Export the catalog into `dir` as `<app>_export-<hash>.xml`.
    ///
    /// A failed archive step is logged and dispatched but does not fail
    /// the export.
    ///
    /// # Errors
    ///
    /// - [`ExportError::DirectoryNotWritable`] if `dir` cannot be used.
    /// - [`ExportError::Io`] if the file cannot be written.
    /// - [`ExportError::Storage`] if the catalog cannot be read.
    ///
    /// Each of these is also dispatched as `export.failed`.
    pub async fn export(
        &self,
        dir: &Path,
        protection: &ExportProtection,
    ) -> Result<ExportOutcome, ExportError> {
        let result = self.write_export(dir, protection).await;
        if let Err(e) = &result {
            report_failure(&self.events, "export", "export", dir, e).await;
        }
        result
    }

    async fn write_export(
        &self,
        dir: &Path,
        protection: &ExportProtection,
    ) -> Result<ExportOutcome, ExportError> {
        ensure_writable_dir(dir).await?;

        let categories = self.catalog.categories().await?;
        let clients = self.catalog.clients().await?;
        let tags = self.catalog.tags().await?;
        let accounts = self.catalog.accounts().await?;

        let sections = ExportSections::from_records(&categories, &clients, &tags, &accounts);
        let counts = sections.counts();
        let xml = document::render(&sections, protection, Utc::now().timestamp())?;

        let file = BackupFile::new(BackupType::Export, dir, "xml", self.app_name.as_str());
        let path = file.path();
        write_output(&path, xml.as_bytes()).await?;

        info!(
            file = %path.display(),
            encrypted = protection.is_encrypted(),
            accounts = counts.accounts,
            categories = counts.categories,
            clients = counts.clients,
            tags = counts.tags,
            "export written"
        );
        self.events
            .dispatch(
                Event::new("export.created", "catalog exported").with_details(serde_json::json!({
                    "file": file.file_name(),
                    "encrypted": protection.is_encrypted(),
                    "counts": counts,
                })),
            )
            .await;

        let archive = archive_output(&self.archiver, &self.events, &path).await;

        Ok(ExportOutcome {
            file,
            encrypted: protection.is_encrypted(),
            counts,
            archive,
        })
    }
}

impl std::fmt::Debug for XmlExportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlExportService")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}
