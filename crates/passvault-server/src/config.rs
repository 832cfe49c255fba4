//! Server configuration for `PassVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `PASSVAULT_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use passvault_core::track::TrackConfig;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON-lines event log (optional).
    pub event_log_path: Option<PathBuf>,
    /// Where exports and backups are written.
    pub export_dir: PathBuf,
    /// Prefix of export and backup file names.
    pub app_name: String,
    /// Token required on every admin route. Unset rejects all admin calls.
    pub admin_token: Option<String>,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Throttle tuning.
    pub track: TrackConfig,
}

/// Supported storage backend types.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl std::fmt::Debug for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"[REDACTED]")
                .finish(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("event_log_path", &self.event_log_path)
            .field("export_dir", &self.export_dir)
            .field("app_name", &self.app_name)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("trust_proxy", &self.trust_proxy)
            .field("track", &self.track)
            .finish()
    }
}

const DEFAULT_PORT: u16 = 8300;

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PASSVAULT_BIND_ADDR`: full bind address (default: `127.0.0.1:8300`)
    /// - `PORT`: port to bind on `0.0.0.0` when `PASSVAULT_BIND_ADDR` is unset
    /// - `PASSVAULT_STORAGE`: `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL`: `PostgreSQL` connection string
    /// - `PASSVAULT_LOG_LEVEL`: log filter (default: `info`)
    /// - `PASSVAULT_EVENT_LOG`: path to the JSON-lines event log (optional)
    /// - `PASSVAULT_EXPORT_DIR`: export directory (default: `./backup`)
    /// - `PASSVAULT_APP_NAME`: file name prefix (default: `passvault`)
    /// - `PASSVAULT_ADMIN_TOKEN`: admin API token
    /// - `PASSVAULT_TRUST_PROXY`: honour `X-Forwarded-For` (default: `false`)
    /// - `PASSVAULT_TRACK_WINDOW_SECS`: throttle window (default: `600`)
    /// - `PASSVAULT_TRACK_MAX_ATTEMPTS`: attempts before delays (default: `10`)
    /// - `PASSVAULT_TRACK_SLEEP_MS`: delay per attempt (default: `500`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = if let Some(addr) = lookup("PASSVAULT_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port) = lookup("PORT") {
            SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(DEFAULT_PORT)))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_backend = match lookup("PASSVAULT_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => StorageBackendType::Postgres {
                url: lookup("DATABASE_URL")
                    .unwrap_or_else(|| "postgres://localhost/passvault".to_owned()),
            },
            _ => StorageBackendType::Memory,
        };

        let defaults = TrackConfig::default();
        let track = TrackConfig {
            window: lookup("PASSVAULT_TRACK_WINDOW_SECS")
                .and_then(|v| v.parse().ok())
                .map_or(defaults.window, Duration::from_secs),
            max_attempts: lookup("PASSVAULT_TRACK_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            sleep_unit: lookup("PASSVAULT_TRACK_SLEEP_MS")
                .and_then(|v| v.parse().ok())
                .map_or(defaults.sleep_unit, Duration::from_millis),
        };

        Self {
            bind_addr,
            storage_backend,
            log_level: lookup("PASSVAULT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            event_log_path: lookup("PASSVAULT_EVENT_LOG").map(PathBuf::from),
            export_dir: lookup("PASSVAULT_EXPORT_DIR")
                .map_or_else(|| PathBuf::from("./backup"), PathBuf::from),
            app_name: lookup("PASSVAULT_APP_NAME").unwrap_or_else(|| "passvault".to_owned()),
            admin_token: lookup("PASSVAULT_ADMIN_TOKEN").filter(|t| !t.is_empty()),
            trust_proxy: lookup("PASSVAULT_TRUST_PROXY").is_some_and(|v| v == "true" || v == "1"),
            track,
        }
    }
}
