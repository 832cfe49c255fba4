//! XML export, verification and import of the account catalog.
//!
//! An export is a single XML document with a `Meta` header and four
//! sections (categories, clients, tags, accounts). With a password the
//! sections are encrypted individually under an Argon2id-derived key and
//! the document carries only the salt and the ciphertexts.
//!
//! - [`XmlExportService`] writes documents (and archives them)
//! - [`XmlVerifyService`] parses, decrypts and counts them
//! - [`XmlImportService`] loads them back into a catalog

mod document;
mod import;
mod service;
mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::archive::ArchiveHandler;
use crate::crypto::{self, EncryptionKey, SALT_LEN};
use crate::error::{CryptoError, ExportError};
use crate::events::{Event, EventDispatcher};

pub use document::{
    AccountNode, AccountTags, CategoryNode, ClientNode, ExportSections, TagNode, TagRef,
};
pub use import::{ImportSummary, XmlImportService};
pub use service::{ExportOutcome, XmlExportService};
pub use verify::{VerifyResult, XmlVerifyService};

/// Name written to `Meta/Generator`.
pub const GENERATOR: &str = "passvault";

/// A password-derived key together with the salt it was derived with.
#[derive(Debug, Clone)]
pub struct ExportKey {
    key: EncryptionKey,
    salt: [u8; SALT_LEN],
}

impl ExportKey {
    /// Derive a key for `password` with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if Argon2id fails.
    pub fn generate(password: &str) -> Result<Self, CryptoError> {
        Self::derive(password, &crypto::generate_salt())
    }

    /// Derive the key for `password` under an existing salt.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if the salt is malformed or
    /// Argon2id fails.
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| CryptoError::KeyDerivation {
            reason: format!("salt must be {SALT_LEN} bytes, got {}", salt.len()),
        })?;
        let key = crypto::derive_password_key(password.as_bytes(), &salt)?;
        Ok(Self { key, salt })
    }

    #[must_use]
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub(crate) fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

/// How an export is protected.
#[derive(Debug, Clone)]
pub enum ExportProtection {
    Plain,
    Encrypted(ExportKey),
}

impl ExportProtection {
    /// `None` or an empty password means a plain export.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if the key cannot be derived.
    pub fn from_password(password: Option<&str>) -> Result<Self, CryptoError> {
        match password.filter(|p| !p.is_empty()) {
            Some(password) => Ok(Self::Encrypted(ExportKey::generate(password)?)),
            None => Ok(Self::Plain),
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// Number of nodes per section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub accounts: usize,
    pub categories: usize,
    pub clients: usize,
    pub tags: usize,
}

/// Create `dir` if needed and make sure files can be written into it.
pub(crate) async fn ensure_writable_dir(dir: &Path) -> Result<(), ExportError> {
    let not_writable = |reason: String| ExportError::DirectoryNotWritable {
        path: dir.to_path_buf(),
        reason,
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| not_writable(e.to_string()))?;

    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|e| not_writable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(not_writable("not a directory".to_owned()));
    }
    if metadata.permissions().readonly() {
        return Err(not_writable("directory is read-only".to_owned()));
    }
    Ok(())
}

/// Write `contents` to `path`.
pub(crate) async fn write_output(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| ExportError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Run the archive step. Failures are reported, never returned.
pub(crate) async fn archive_output(
    archiver: &Arc<dyn ArchiveHandler>,
    events: &EventDispatcher,
    path: &Path,
) -> Option<PathBuf> {
    match archiver.archive(path).await {
        Ok(archive) => Some(archive),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "archive step failed");
            events
                .dispatch(
                    Event::new("archive.failed", e.to_string()).with_details(serde_json::json!({
                        "file": path.display().to_string(),
                    })),
                )
                .await;
            None
        }
    }
}

/// Dispatch `<subsystem>.failed` when `error` is a system failure. Bad
/// input (corrupt files, wrong passwords) is left to the caller.
pub(crate) async fn report_failure(
    events: &EventDispatcher,
    subsystem: &str,
    operation: &str,
    path: &Path,
    error: &ExportError,
) {
    if !error.is_system_failure() {
        return;
    }
    warn!(operation, file = %path.display(), error = %error, "{subsystem} failed");
    events
        .dispatch(Event::failure(
            subsystem,
            operation,
            error,
            serde_json::json!({ "path": path.display().to_string() }),
        ))
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_is_plain() {
        assert!(!ExportProtection::from_password(None).unwrap().is_encrypted());
        assert!(!ExportProtection::from_password(Some("")).unwrap().is_encrypted());
        assert!(
            ExportProtection::from_password(Some("pw"))
                .unwrap()
                .is_encrypted()
        );
    }

    #[test]
    fn derive_rejects_wrong_salt_length() {
        let result = ExportKey::derive("pw", b"short");
        assert!(matches!(result, Err(CryptoError::KeyDerivation { .. })));
    }

    #[test]
    fn derive_reproduces_generated_key() {
        let generated = ExportKey::generate("pw").unwrap();
        let derived = ExportKey::derive("pw", generated.salt()).unwrap();
        assert_eq!(generated.key().as_bytes(), derived.key().as_bytes());
    }

    #[tokio::test]
    async fn file_in_place_of_directory_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("backup");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let result = ensure_writable_dir(&blocker).await;
        assert!(matches!(
            result,
            Err(ExportError::DirectoryNotWritable { .. })
        ));
    }

    #[tokio::test]
    async fn only_system_failures_are_reported() {
        let events = EventDispatcher::new();
        let sink = Arc::new(crate::events::MemoryEventSink::new());
        events.add_sink(sink.clone()).await;
        let path = Path::new("/srv/backup/passvault_export-1.xml");

        let wrong_password = ExportError::WrongPassword {
            path: path.to_path_buf(),
        };
        report_failure(&events, "export", "verify", path, &wrong_password).await;
        assert!(sink.events().await.is_empty());

        let io = ExportError::Io {
            path: path.to_path_buf(),
            reason: "permission denied".to_owned(),
        };
        report_failure(&events, "export", "verify", path, &io).await;
        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        let event = events.first().unwrap();
        assert_eq!(event.action, "export.failed");
        assert_eq!(event.details["operation"], "verify");
        assert_eq!(event.details["path"], "/srv/backup/passvault_export-1.xml");
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
