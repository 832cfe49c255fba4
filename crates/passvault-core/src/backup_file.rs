//! Naming of export and backup files.
//!
//! Files are named `<app>_<type>-<hash>.<ext>` where `hash` is 32 random hex
//! digits, so concurrent exports never collide.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a backup file contains.
///
/// There is no `app` kind. An application-tree tarball has no counterpart
/// for a single compiled binary, so only database dumps and catalog exports
/// are produced, and `"app"` does not deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// JSON dump of the database tables.
    Db,
    /// XML export of the catalog.
    Export,
}

impl BackupType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Db => "db",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a backup file's location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    kind: BackupType,
    hash: String,
    directory: PathBuf,
    extension: String,
    app_name: String,
}

impl BackupFile {
    /// New file description with a fresh random hash.
    #[must_use]
    pub fn new(
        kind: BackupType,
        directory: impl Into<PathBuf>,
        extension: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            hash: random_hash(),
            directory: directory.into(),
            extension: extension.into(),
            app_name: app_name.into(),
        }
    }

    /// Same file in another directory.
    #[must_use]
    pub fn with_path(&self, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..self.clone()
        }
    }

    /// Same file with another hash.
    #[must_use]
    pub fn with_hash(&self, hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackupType {
        self.kind
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// `<app>_<type>-<hash>.<ext>`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}-{}.{}",
            self.app_name, self.kind, self.hash, self.extension
        )
    }

    /// Full path: the directory joined with [`Self::file_name`].
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }
}

fn random_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Whether `name` is a bare file name safe to join onto an export directory.
///
/// Rejects empty names, path separators and dot segments.
#[must_use]
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_layout() {
        let file = BackupFile::new(BackupType::Export, "/var/backup", "xml", "passvault")
            .with_hash("0123456789abcdef0123456789abcdef");
        assert_eq!(
            file.file_name(),
            "passvault_export-0123456789abcdef0123456789abcdef.xml"
        );
        assert_eq!(
            file.path(),
            Path::new("/var/backup/passvault_export-0123456789abcdef0123456789abcdef.xml")
        );
    }

    #[test]
    fn generated_hash_is_32_hex_digits() {
        let file = BackupFile::new(BackupType::Db, ".", "json", "passvault");
        assert_eq!(file.hash().len(), 32);
        assert!(file.hash().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn with_methods_leave_original_untouched() {
        let original = BackupFile::new(BackupType::Db, "/a", "json", "passvault");
        let moved = original.with_path("/b");
        assert_eq!(original.directory(), Path::new("/a"));
        assert_eq!(moved.directory(), Path::new("/b"));
        assert_eq!(moved.hash(), original.hash());
    }

    #[test]
    fn only_db_and_export_kinds_exist() {
        assert_eq!(
            serde_json::from_str::<BackupType>("\"db\"").ok(),
            Some(BackupType::Db)
        );
        assert_eq!(
            serde_json::from_str::<BackupType>("\"export\"").ok(),
            Some(BackupType::Export)
        );
        assert!(serde_json::from_str::<BackupType>("\"app\"").is_err());
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("passvault_export-abc.xml.gz"));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("a\\b"));
    }
}
