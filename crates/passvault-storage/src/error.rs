//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger: the table or record involved and the backend reason.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to (or migrate) the storage backend.
    #[error("failed to open storage at '{location}': {reason}")]
    Open { location: String, reason: String },

    /// A query against a table failed.
    #[error("query on '{table}' failed: {reason}")]
    Query { table: &'static str, reason: String },

    /// An insert was rejected by a constraint (duplicate key, foreign key).
    #[error("constraint violated on '{table}': {reason}")]
    Constraint { table: &'static str, reason: String },

    /// A stored row could not be mapped back into a record.
    #[error("corrupt row in '{table}': {reason}")]
    CorruptRow { table: &'static str, reason: String },
}
