//! `PostgreSQL` store.
//!
//! One table per record type plus `account_tags` for the account/tag link.
//! Addresses are stored as raw octets (`BYTEA`): 4 bytes in `ipv4`, 16 in
//! `ipv6`. Tables are created on connect if missing.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    AccountRecord, CatalogRepository, CategoryRecord, ClientRecord, NewAccount, NewTrack,
    StorageError, TagRecord, TrackFilter, TrackQuery, TrackRecord, TrackRepository,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tracks (\
        id          BIGSERIAL PRIMARY KEY, \
        user_id     BIGINT, \
        source      TEXT   NOT NULL, \
        ipv4        BYTEA, \
        ipv6        BYTEA, \
        tracked_at  BIGINT NOT NULL, \
        unlocked_at BIGINT\
    )",
    "CREATE INDEX IF NOT EXISTS idx_tracks_window \
     ON tracks (source, tracked_at) WHERE unlocked_at IS NULL",
    "CREATE TABLE IF NOT EXISTS categories (\
        id          BIGSERIAL PRIMARY KEY, \
        name        TEXT NOT NULL, \
        description TEXT NOT NULL DEFAULT ''\
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name ON categories (lower(name))",
    "CREATE TABLE IF NOT EXISTS clients (\
        id          BIGSERIAL PRIMARY KEY, \
        name        TEXT    NOT NULL, \
        description TEXT    NOT NULL DEFAULT '', \
        is_global   BOOLEAN NOT NULL DEFAULT FALSE\
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_clients_name ON clients (lower(name))",
    "CREATE TABLE IF NOT EXISTS tags (\
        id   BIGSERIAL PRIMARY KEY, \
        name TEXT NOT NULL\
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_name ON tags (lower(name))",
    "CREATE TABLE IF NOT EXISTS accounts (\
        id          BIGSERIAL PRIMARY KEY, \
        name        TEXT   NOT NULL, \
        client_id   BIGINT NOT NULL REFERENCES clients (id), \
        category_id BIGINT NOT NULL REFERENCES categories (id), \
        login       TEXT   NOT NULL DEFAULT '', \
        url         TEXT   NOT NULL DEFAULT '', \
        notes       TEXT   NOT NULL DEFAULT '', \
        pass        BYTEA  NOT NULL\
    )",
    "CREATE TABLE IF NOT EXISTS account_tags (\
        account_id BIGINT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE, \
        tag_id     BIGINT NOT NULL REFERENCES tags (id) ON DELETE CASCADE, \
        PRIMARY KEY (account_id, tag_id)\
    )",
];

/// A store backed by `PostgreSQL`.
///
/// Thread-safe via `PgPool` (connection pool). All operations are fully async.
///
/// # Examples
///
/// ```no_run
/// # use passvault_storage::PostgresStore;
/// # #[tokio::main]
/// # async fn main() {
/// let store = PostgresStore::connect("postgres://localhost/passvault").await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

#[derive(sqlx::FromRow)]
struct TrackRow {
    id: i64,
    user_id: Option<i64>,
    source: String,
    ipv4: Option<Vec<u8>>,
    ipv6: Option<Vec<u8>>,
    tracked_at: i64,
    unlocked_at: Option<i64>,
}

impl TryFrom<TrackRow> for TrackRecord {
    type Error = StorageError;

    fn try_from(row: TrackRow) -> Result<Self, Self::Error> {
        let ipv4 = row
            .ipv4
            .map(|bytes| {
                <[u8; 4]>::try_from(bytes.as_slice())
                    .map(Ipv4Addr::from)
                    .map_err(|_| corrupt_address(row.id, "ipv4", bytes.len()))
            })
            .transpose()?;
        let ipv6 = row
            .ipv6
            .map(|bytes| {
                <[u8; 16]>::try_from(bytes.as_slice())
                    .map(Ipv6Addr::from)
                    .map_err(|_| corrupt_address(row.id, "ipv6", bytes.len()))
            })
            .transpose()?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            source: row.source,
            ipv4,
            ipv6,
            time: row.tracked_at,
            time_unlock: row.unlocked_at,
        })
    }
}

fn corrupt_address(id: i64, column: &str, len: usize) -> StorageError {
    StorageError::CorruptRow {
        table: "tracks",
        reason: format!("row {id}: {column} has {len} bytes"),
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    name: String,
    client_id: i64,
    category_id: i64,
    login: String,
    url: String,
    notes: String,
    pass: Vec<u8>,
}

/// Map a `sqlx` error for `table`, separating constraint violations
/// (`23xxx` SQLSTATE class) from other query failures.
fn map_err(table: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |err| match &err {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref().is_some_and(|c| c.starts_with("23")) =>
        {
            StorageError::Constraint {
                table,
                reason: db_err.to_string(),
            }
        }
        _ => StorageError::Query {
            table,
            reason: err.to_string(),
        },
    }
}

impl PostgresStore {
    /// Connect to `PostgreSQL` and create the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                location: "[redacted database url]".to_owned(),
                reason: e.to_string(),
            })?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Open {
                    location: "[redacted database url]".to_owned(),
                    reason: format!("migration failed: {e}"),
                })?;
        }

        info!(tables = SCHEMA.len(), "postgres schema ready");

        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TrackRepository for PostgresStore {
    async fn insert(&self, track: &NewTrack) -> Result<i64, StorageError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO tracks (user_id, source, ipv4, ipv6, tracked_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(track.user_id)
        .bind(&track.source)
        .bind(track.ipv4.map(|ip| ip.octets().to_vec()))
        .bind(track.ipv6.map(|ip| ip.octets().to_vec()))
        .bind(track.time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err("tracks"))?;

        Ok(id)
    }

    async fn count_since(&self, query: &TrackQuery) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tracks \
             WHERE source = $1 AND tracked_at >= $2 AND unlocked_at IS NULL \
             AND ((ipv4 IS NOT NULL AND ipv4 = $3) OR (ipv6 IS NOT NULL AND ipv6 = $4))",
        )
        .bind(&query.source)
        .bind(query.since)
        .bind(query.ipv4.map(|ip| ip.octets().to_vec()))
        .bind(query.ipv6.map(|ip| ip.octets().to_vec()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_err("tracks"))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn list(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, StorageError> {
        let limit = filter
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(i64::MAX);

        let rows: Vec<TrackRow> = sqlx::query_as(
            "SELECT * FROM tracks \
             WHERE ($1::TEXT IS NULL OR source = $1) \
             AND (NOT $2 OR unlocked_at IS NULL) \
             ORDER BY tracked_at DESC, id DESC \
             LIMIT $3",
        )
        .bind(filter.source.as_deref())
        .bind(filter.active_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err("tracks"))?;

        rows.into_iter().map(TrackRecord::try_from).collect()
    }

    async fn unlock(&self, id: i64, at: i64) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE tracks SET unlocked_at = $2 WHERE id = $1 AND unlocked_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_err("tracks"))?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM tracks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err("tracks"))?;

        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err("tracks"))?;

        sqlx::query("TRUNCATE TABLE tracks")
            .execute(&self.pool)
            .await
            .map_err(map_err("tracks"))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl CatalogRepository for PostgresStore {
    async fn categories(&self) -> Result<Vec<CategoryRecord>, StorageError> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, name, description FROM categories ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_err("categories"))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, description)| CategoryRecord {
                id,
                name,
                description,
            })
            .collect())
    }

    async fn clients(&self) -> Result<Vec<ClientRecord>, StorageError> {
        let rows: Vec<(i64, String, String, bool)> =
            sqlx::query_as("SELECT id, name, description, is_global FROM clients ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_err("clients"))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, description, is_global)| ClientRecord {
                id,
                name,
                description,
                is_global,
            })
            .collect())
    }

    async fn tags(&self) -> Result<Vec<TagRecord>, StorageError> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err("tags"))?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| TagRecord { id, name })
            .collect())
    }

    async fn accounts(&self) -> Result<Vec<AccountRecord>, StorageError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT id, name, client_id, category_id, login, url, notes, pass \
             FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err("accounts"))?;

        let links: Vec<(i64, i64)> =
            sqlx::query_as("SELECT account_id, tag_id FROM account_tags ORDER BY account_id, tag_id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_err("account_tags"))?;

        let mut tags_by_account: HashMap<i64, Vec<i64>> = HashMap::new();
        for (account_id, tag_id) in links {
            tags_by_account.entry(account_id).or_default().push(tag_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| AccountRecord {
                tag_ids: tags_by_account.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                client_id: row.client_id,
                category_id: row.category_id,
                login: row.login,
                url: row.url,
                notes: row.notes,
                pass: row.pass,
            })
            .collect())
    }

    async fn insert_category(&self, name: &str, description: &str) -> Result<i64, StorageError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO categories (name, description) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err("categories"))?;

        Ok(id)
    }

    async fn insert_client(
        &self,
        name: &str,
        description: &str,
        is_global: bool,
    ) -> Result<i64, StorageError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO clients (name, description, is_global) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(description)
        .bind(is_global)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err("clients"))?;

        Ok(id)
    }

    async fn insert_tag(&self, name: &str) -> Result<i64, StorageError> {
        let (id,): (i64,) = sqlx::query_as("INSERT INTO tags (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err("tags"))?;

        Ok(id)
    }

    async fn insert_account(&self, account: &NewAccount) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_err("accounts"))?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO accounts (name, client_id, category_id, login, url, notes, pass) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(&account.name)
        .bind(account.client_id)
        .bind(account.category_id)
        .bind(&account.login)
        .bind(&account.url)
        .bind(&account.notes)
        .bind(&account.pass)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err("accounts"))?;

        for tag_id in &account.tag_ids {
            sqlx::query("INSERT INTO account_tags (account_id, tag_id) VALUES ($1, $2)")
                .bind(id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .map_err(map_err("account_tags"))?;
        }

        tx.commit().await.map_err(map_err("accounts"))?;

        Ok(id)
    }
}
