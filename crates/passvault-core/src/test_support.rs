//! Shared fixtures for unit tests.

use passvault_storage::{
    AccountRecord, CatalogRepository, CategoryRecord, ClientRecord, NewAccount, StorageError,
    TagRecord,
};

/// A catalog whose backend is down.
pub(crate) struct UnreachableCatalog;

fn unreachable(table: &'static str) -> StorageError {
    StorageError::Query {
        table,
        reason: "connection refused".to_owned(),
    }
}

#[async_trait::async_trait]
impl CatalogRepository for UnreachableCatalog {
    async fn categories(&self) -> Result<Vec<CategoryRecord>, StorageError> {
        Err(unreachable("categories"))
    }

    async fn clients(&self) -> Result<Vec<ClientRecord>, StorageError> {
        Err(unreachable("clients"))
    }

    async fn tags(&self) -> Result<Vec<TagRecord>, StorageError> {
        Err(unreachable("tags"))
    }

    async fn accounts(&self) -> Result<Vec<AccountRecord>, StorageError> {
        Err(unreachable("accounts"))
    }

    async fn insert_category(&self, _name: &str, _description: &str) -> Result<i64, StorageError> {
        Err(unreachable("categories"))
    }

    async fn insert_client(
        &self,
        _name: &str,
        _description: &str,
        _is_global: bool,
    ) -> Result<i64, StorageError> {
        Err(unreachable("clients"))
    }

    async fn insert_tag(&self, _name: &str) -> Result<i64, StorageError> {
        Err(unreachable("tags"))
    }

    async fn insert_account(&self, _account: &NewAccount) -> Result<i64, StorageError> {
        Err(unreachable("accounts"))
    }
}
