use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::document::{self, ExportSections};
use super::{NodeCounts, report_failure};
use crate::error::ExportError;
use crate::events::EventDispatcher;

/// What a verification pass found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub encrypted: bool,
    pub counts: NodeCounts,
    /// `Meta/Version` of the generator that wrote the file.
    pub version: String,
    /// `Meta/Time`, unix seconds.
    pub generated_at: i64,
}

/// Parses, decrypts and counts export files.
#[derive(Debug, Clone)]
pub struct XmlVerifyService {
    events: Arc<EventDispatcher>,
}

impl XmlVerifyService {
    #[must_use]
    pub fn new(events: Arc<EventDispatcher>) -> Self {
        Self { events }
    }

    /// Verify an export file.
    ///
    /// # Errors
    ///
    /// - [`ExportError::Io`] if the file cannot be read.
    /// - [`ExportError::Corrupt`] if the document is malformed.
    /// - [`ExportError::PasswordRequired`] if it is encrypted and no
    ///   password was given.
    /// - [`ExportError::WrongPassword`] if decryption fails.
    /// - [`ExportError::IntegrityMismatch`] if `Meta/Hash` does not match.
    ///
    /// A read failure is also dispatched as `export.failed`.
    pub async fn verify(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<VerifyResult, ExportError> {
        match self.read(path, password).await {
            Ok((result, _)) => Ok(result),
            Err(e) => {
                report_failure(&self.events, "export", "verify", path, &e).await;
                Err(e)
            }
        }
    }

    /// Verify and return the decoded sections.
    pub(crate) async fn read(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<(VerifyResult, ExportSections), ExportError> {
        let xml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExportError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let document = document::parse(&xml, path)?;
        let encrypted = document.is_encrypted();
        let version = document.meta.version.clone();
        let generated_at = document.meta.time;

        let sections = document::open(document, password, path).inspect_err(|e| {
            warn!(file = %path.display(), error = %e, "export verification failed");
        })?;

        let result = VerifyResult {
            encrypted,
            counts: sections.counts(),
            version,
            generated_at,
        };
        info!(
            file = %path.display(),
            encrypted,
            accounts = result.counts.accounts,
            categories = result.counts.categories,
            clients = result.counts.clients,
            tags = result.counts.tags,
            "export verified"
        );
        Ok((result, sections))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;

    async fn verifier() -> (XmlVerifyService, Arc<MemoryEventSink>) {
        let events = Arc::new(EventDispatcher::new());
        let sink = Arc::new(MemoryEventSink::new());
        events.add_sink(sink.clone()).await;
        (XmlVerifyService::new(events), sink)
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, sink) = verifier().await;
        let path = dir.path().join("absent.xml");

        let result = verifier.verify(&path, None).await;
        assert!(matches!(result, Err(ExportError::Io { .. })));

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        let event = events.first().unwrap();
        assert_eq!(event.action, "export.failed");
        assert_eq!(event.details["operation"], "verify");
        assert_eq!(event.details["path"], path.display().to_string().as_str());
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xml");
        tokio::fs::write(&path, "<Root><Meta>").await.unwrap();
        let (verifier, sink) = verifier().await;

        let result = verifier.verify(&path, None).await;
        assert!(matches!(result, Err(ExportError::Corrupt { .. })));
        assert!(sink.events().await.is_empty());
    }
}
