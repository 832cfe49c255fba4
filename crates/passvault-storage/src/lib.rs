//! Storage layer for `PassVault`.
//!
//! This crate defines the repository traits the core services are written
//! against and knows nothing about throttling rules or export formats:
//!
//! - [`TrackRepository`]: append-only log of request attempts
//! - [`CatalogRepository`]: categories, clients, tags, and accounts
//!
//! Two implementations are provided:
//!
//! - [`PostgresStore`]: production store backed by `sqlx` (feature `postgres-backend`)
//! - [`MemoryStore`]: in-memory, for development and tests

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_store;
mod records;

pub use error::StorageError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres-backend")]
pub use postgres_store::PostgresStore;
pub use records::{
    AccountRecord, CategoryRecord, ClientRecord, NewAccount, NewTrack, TagRecord, TrackFilter,
    TrackQuery, TrackRecord,
};

/// Persistence for tracked request attempts.
///
/// Each method is a standalone statement. No method spans a transaction,
/// so a count followed by an insert is not atomic.
#[async_trait::async_trait]
pub trait TrackRepository: Send + Sync + 'static {
    /// Insert a new track row and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn insert(&self, track: &NewTrack) -> Result<i64, StorageError>;

    /// Count active rows matching the query's source and client address
    /// with `time >= query.since`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn count_since(&self, query: &TrackQuery) -> Result<u64, StorageError>;

    /// List rows newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn list(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, StorageError>;

    /// Mark an active row as unlocked at `at`. Returns the number of rows
    /// affected (0 if the row is missing or already unlocked).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn unlock(&self, id: i64, at: i64) -> Result<u64, StorageError>;

    /// Delete a row. Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn delete(&self, id: i64) -> Result<u64, StorageError>;

    /// Remove every row. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn clear(&self) -> Result<u64, StorageError>;
}

/// Persistence for the account catalog read by export and written by import.
#[async_trait::async_trait]
pub trait CatalogRepository: Send + Sync + 'static {
    /// All categories ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn categories(&self) -> Result<Vec<CategoryRecord>, StorageError>;

    /// All clients ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn clients(&self) -> Result<Vec<ClientRecord>, StorageError>;

    /// All tags ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn tags(&self) -> Result<Vec<TagRecord>, StorageError>;

    /// All accounts ordered by id, with their tag ids.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the backend fails.
    async fn accounts(&self) -> Result<Vec<AccountRecord>, StorageError>;

    /// Insert a category and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Constraint`] if the name is taken.
    async fn insert_category(&self, name: &str, description: &str) -> Result<i64, StorageError>;

    /// Insert a client and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Constraint`] if the name is taken.
    async fn insert_client(
        &self,
        name: &str,
        description: &str,
        is_global: bool,
    ) -> Result<i64, StorageError>;

    /// Insert a tag and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Constraint`] if the name is taken.
    async fn insert_tag(&self, name: &str) -> Result<i64, StorageError>;

    /// Insert an account (and its tag links) and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Constraint`] if a referenced row is missing.
    async fn insert_account(&self, account: &NewAccount) -> Result<i64, StorageError>;
}
