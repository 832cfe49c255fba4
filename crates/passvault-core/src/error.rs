//! Error types for `passvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material or passwords, only
//! operation descriptions.

use std::path::PathBuf;

use passvault_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Argon2id password key derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors from the tracking/throttle service.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The request carries neither an IPv4 nor an IPv6 client address.
    #[error("invalid client address for source '{source_name}'")]
    InvalidAddress { source_name: String },

    /// No track row with this id (or nothing left to change on it).
    #[error("track {id} not found")]
    NotFound { id: i64 },

    /// The underlying storage backend returned an error.
    #[error("track storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the export, verify, import and database backup pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The target directory could not be created or is not writable.
    #[error("directory '{}' is not writable: {reason}", path.display())]
    DirectoryNotWritable { path: PathBuf, reason: String },

    /// Reading or writing an export file failed.
    #[error("i/o error on '{}': {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    /// The document is not a well-formed export.
    #[error("corrupt export '{}': {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The document is encrypted and no password was supplied.
    #[error("export '{}' is encrypted: a password is required", path.display())]
    PasswordRequired { path: PathBuf },

    /// Decryption with the supplied password failed.
    #[error("wrong password for export '{}'", path.display())]
    WrongPassword { path: PathBuf },

    /// The content hash in `Meta` does not match the decoded sections.
    #[error("integrity check failed for '{}': expected {expected}, got {actual}", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Serializing the document failed.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// A cryptographic operation failed while building the document.
    #[error("export crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("export storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ExportError {
    /// Storage, file system, encoding and crypto failures, as opposed to a
    /// bad file or password supplied by the caller.
    #[must_use]
    pub fn is_system_failure(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotWritable { .. }
                | Self::Io { .. }
                | Self::Serialization { .. }
                | Self::Crypto(_)
                | Self::Storage(_)
        )
    }
}

/// Errors from the archive step.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The source file could not be read or the archive could not be written.
    #[error("failed to archive '{}': {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    /// The blocking compression task did not complete.
    #[error("archive task failed: {reason}")]
    Task { reason: String },
}

/// Errors from event sinks.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A sink failed to persist an event.
    #[error("event sink '{name}' failed: {reason}")]
    SinkFailure { name: String, reason: String },

    /// The event could not be serialized.
    #[error("event serialization failed: {reason}")]
    Serialization { reason: String },
}
