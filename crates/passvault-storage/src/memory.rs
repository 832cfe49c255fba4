//! In-memory store for development and tests.
//!
//! All tables live in `BTreeMap`s behind a single `RwLock`. Nothing is
//! persisted: all data is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    AccountRecord, CatalogRepository, CategoryRecord, ClientRecord, NewAccount, NewTrack,
    StorageError, TagRecord, TrackFilter, TrackQuery, TrackRecord, TrackRepository,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    tracks: BTreeMap<i64, TrackRecord>,
    categories: BTreeMap<i64, CategoryRecord>,
    clients: BTreeMap<i64, ClientRecord>,
    tags: BTreeMap<i64, TagRecord>,
    accounts: BTreeMap<i64, AccountRecord>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }
}

/// An in-memory implementation of every repository trait.
///
/// Cloning is cheap and clones share state, so the same store can back the
/// track service and the export services at once.
///
/// # Examples
///
/// ```
/// # use passvault_storage::{MemoryStore, CatalogRepository};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// let id = store.insert_tag("production").await.unwrap();
/// assert_eq!(store.tags().await.unwrap()[0].id, id);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed track row, keeping its timestamps.
    ///
    /// Used to seed historical attempts; regular inserts go through
    /// [`TrackRepository::insert`].
    pub async fn seed_track(&self, track: NewTrack, time_unlock: Option<i64>) -> i64 {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.tracks.insert(
            id,
            TrackRecord {
                id,
                user_id: track.user_id,
                source: track.source,
                ipv4: track.ipv4,
                ipv6: track.ipv6,
                time: track.time,
                time_unlock,
            },
        );
        id
    }
}

fn name_taken<'a>(mut names: impl Iterator<Item = &'a str>, name: &str) -> bool {
    names.any(|existing| existing.eq_ignore_ascii_case(name))
}

#[async_trait::async_trait]
impl TrackRepository for MemoryStore {
    async fn insert(&self, track: &NewTrack) -> Result<i64, StorageError> {
        Ok(self.seed_track(track.clone(), None).await)
    }

    async fn count_since(&self, query: &TrackQuery) -> Result<u64, StorageError> {
        let tables = self.tables.read().await;
        let count = tables
            .tracks
            .values()
            .filter(|t| {
                t.is_active()
                    && t.source == query.source
                    && t.time >= query.since
                    && t.matches_address(query.ipv4, query.ipv6)
            })
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn list(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, StorageError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<TrackRecord> = tables
            .tracks
            .values()
            .filter(|t| filter.accepts(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn unlock(&self, id: i64, at: i64) -> Result<u64, StorageError> {
        let mut tables = self.tables.write().await;
        match tables.tracks.get_mut(&id) {
            Some(track) if track.is_active() => {
                track.time_unlock = Some(at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let mut tables = self.tables.write().await;
        Ok(u64::from(tables.tracks.remove(&id).is_some()))
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let mut tables = self.tables.write().await;
        let removed = tables.tracks.len();
        tables.tracks.clear();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

#[async_trait::async_trait]
impl CatalogRepository for MemoryStore {
    async fn categories(&self) -> Result<Vec<CategoryRecord>, StorageError> {
        Ok(self.tables.read().await.categories.values().cloned().collect())
    }

    async fn clients(&self) -> Result<Vec<ClientRecord>, StorageError> {
        Ok(self.tables.read().await.clients.values().cloned().collect())
    }

    async fn tags(&self) -> Result<Vec<TagRecord>, StorageError> {
        Ok(self.tables.read().await.tags.values().cloned().collect())
    }

    async fn accounts(&self) -> Result<Vec<AccountRecord>, StorageError> {
        Ok(self.tables.read().await.accounts.values().cloned().collect())
    }

    async fn insert_category(&self, name: &str, description: &str) -> Result<i64, StorageError> {
        let mut tables = self.tables.write().await;
        if name_taken(tables.categories.values().map(|c| c.name.as_str()), name) {
            return Err(StorageError::Constraint {
                table: "categories",
                reason: format!("duplicate name '{name}'"),
            });
        }
        let id = tables.allocate_id();
        tables.categories.insert(
            id,
            CategoryRecord {
                id,
                name: name.to_owned(),
                description: description.to_owned(),
            },
        );
        Ok(id)
    }

    async fn insert_client(
        &self,
        name: &str,
        description: &str,
        is_global: bool,
    ) -> Result<i64, StorageError> {
        let mut tables = self.tables.write().await;
        if name_taken(tables.clients.values().map(|c| c.name.as_str()), name) {
            return Err(StorageError::Constraint {
                table: "clients",
                reason: format!("duplicate name '{name}'"),
            });
        }
        let id = tables.allocate_id();
        tables.clients.insert(
            id,
            ClientRecord {
                id,
                name: name.to_owned(),
                description: description.to_owned(),
                is_global,
            },
        );
        Ok(id)
    }

    async fn insert_tag(&self, name: &str) -> Result<i64, StorageError> {
        let mut tables = self.tables.write().await;
        if name_taken(tables.tags.values().map(|t| t.name.as_str()), name) {
            return Err(StorageError::Constraint {
                table: "tags",
                reason: format!("duplicate name '{name}'"),
            });
        }
        let id = tables.allocate_id();
        tables.tags.insert(
            id,
            TagRecord {
                id,
                name: name.to_owned(),
            },
        );
        Ok(id)
    }

    async fn insert_account(&self, account: &NewAccount) -> Result<i64, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.categories.contains_key(&account.category_id) {
            return Err(StorageError::Constraint {
                table: "accounts",
                reason: format!("unknown category {}", account.category_id),
            });
        }
        if !tables.clients.contains_key(&account.client_id) {
            return Err(StorageError::Constraint {
                table: "accounts",
                reason: format!("unknown client {}", account.client_id),
            });
        }
        if let Some(tag_id) = account
            .tag_ids
            .iter()
            .find(|id| !tables.tags.contains_key(*id))
        {
            return Err(StorageError::Constraint {
                table: "account_tags",
                reason: format!("unknown tag {tag_id}"),
            });
        }
        let id = tables.allocate_id();
        tables.accounts.insert(
            id,
            AccountRecord {
                id,
                name: account.name.clone(),
                client_id: account.client_id,
                category_id: account.category_id,
                login: account.login.clone(),
                url: account.url.clone(),
                notes: account.notes.clone(),
                pass: account.pass.clone(),
                tag_ids: account.tag_ids.clone(),
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn new_track(source: &str, ip: Ipv4Addr, time: i64) -> NewTrack {
        NewTrack {
            user_id: None,
            source: source.to_owned(),
            ipv4: Some(ip),
            ipv6: None,
            time,
        }
    }

    fn query(source: &str, ip: Ipv4Addr, since: i64) -> TrackQuery {
        TrackQuery {
            source: source.to_owned(),
            ipv4: Some(ip),
            ipv6: None,
            since,
        }
    }

    #[tokio::test]
    async fn count_since_respects_window_source_and_address() {
        let store = MemoryStore::new();
        let ip = Ipv4Addr::new(192, 168, 1, 10);
        let other = Ipv4Addr::new(192, 168, 1, 11);

        store.insert(&new_track("login", ip, 100)).await.unwrap();
        store.insert(&new_track("login", ip, 200)).await.unwrap();
        store.insert(&new_track("login", ip, 300)).await.unwrap();
        store.insert(&new_track("api", ip, 300)).await.unwrap();
        store.insert(&new_track("login", other, 300)).await.unwrap();

        assert_eq!(store.count_since(&query("login", ip, 200)).await.unwrap(), 2);
        assert_eq!(store.count_since(&query("login", ip, 0)).await.unwrap(), 3);
        assert_eq!(store.count_since(&query("api", ip, 0)).await.unwrap(), 1);
        assert_eq!(store.count_since(&query("login", other, 0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn count_since_matches_ipv6() {
        let store = MemoryStore::new();
        let ip = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        store
            .insert(&NewTrack {
                user_id: None,
                source: "login".to_owned(),
                ipv4: None,
                ipv6: Some(ip),
                time: 10,
            })
            .await
            .unwrap();

        let q = TrackQuery {
            source: "login".to_owned(),
            ipv4: None,
            ipv6: Some(ip),
            since: 0,
        };
        assert_eq!(store.count_since(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unlocked_rows_are_not_counted() {
        let store = MemoryStore::new();
        let ip = Ipv4Addr::LOCALHOST;
        let id = store.insert(&new_track("login", ip, 100)).await.unwrap();
        store.insert(&new_track("login", ip, 100)).await.unwrap();

        assert_eq!(store.unlock(id, 150).await.unwrap(), 1);
        assert_eq!(store.count_since(&query("login", ip, 0)).await.unwrap(), 1);

        // Second unlock affects nothing.
        assert_eq!(store.unlock(id, 160).await.unwrap(), 0);
        let rows = store.list(&TrackFilter::default()).await.unwrap();
        let row = rows.iter().find(|t| t.id == id).unwrap();
        assert_eq!(row.time_unlock, Some(150));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let store = MemoryStore::new();
        let ip = Ipv4Addr::LOCALHOST;
        let id = store.insert(&new_track("login", ip, 1)).await.unwrap();
        store.insert(&new_track("login", ip, 2)).await.unwrap();

        assert_eq!(store.delete(id).await.unwrap(), 1);
        assert_eq!(store.delete(id).await.unwrap(), 0);
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.list(&TrackFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        let ip = Ipv4Addr::LOCALHOST;
        for time in [5, 1, 9, 3] {
            store.insert(&new_track("login", ip, time)).await.unwrap();
        }
        let filter = TrackFilter {
            limit: Some(2),
            ..TrackFilter::default()
        };
        let times: Vec<i64> = store
            .list(&filter)
            .await
            .unwrap()
            .iter()
            .map(|t| t.time)
            .collect();
        assert_eq!(times, vec![9, 5]);
    }

    #[tokio::test]
    async fn duplicate_category_name_is_constraint_error() {
        let store = MemoryStore::new();
        store.insert_category("Web", "").await.unwrap();
        let err = store.insert_category("web", "").await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint { table: "categories", .. }));
    }

    #[tokio::test]
    async fn account_requires_existing_references() {
        let store = MemoryStore::new();
        let category = store.insert_category("Web", "").await.unwrap();
        let client = store.insert_client("Acme", "", false).await.unwrap();
        let tag = store.insert_tag("prod").await.unwrap();

        let mut account = NewAccount {
            name: "admin panel".to_owned(),
            client_id: client,
            category_id: category,
            login: "admin".to_owned(),
            url: "https://acme.test".to_owned(),
            notes: String::new(),
            pass: vec![1, 2, 3],
            tag_ids: vec![tag],
        };
        let id = store.insert_account(&account).await.unwrap();
        assert_eq!(store.accounts().await.unwrap()[0].id, id);

        account.tag_ids = vec![9999];
        let err = store.insert_account(&account).await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint { table: "account_tags", .. }));
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.insert_tag("shared").await.unwrap();
        assert_eq!(clone.tags().await.unwrap().len(), 1);
    }
}
