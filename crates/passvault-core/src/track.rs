//! Request tracking and throttling.
//!
//! Every failed or sensitive request can be recorded as a track row keyed by
//! client address and source. Once a client has accumulated `max_attempts`
//! active rows for a source inside the window, further requests are slowed
//! down by `attempts * sleep_unit` before they are allowed through.
//!
//! Counting and inserting are separate storage calls, so two concurrent
//! requests from one client can both observe the same count. Throttling is
//! approximate under that race.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use passvault_storage::{
    NewTrack, StorageError, TrackFilter, TrackQuery, TrackRecord, TrackRepository,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TrackError;
use crate::events::{Event, EventDispatcher};

/// Throttle tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// How far back attempts are counted.
    pub window: Duration,
    /// Attempts within the window before delays kick in.
    pub max_attempts: u64,
    /// Delay added per counted attempt.
    pub sleep_unit: Duration,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            max_attempts: 10,
            sleep_unit: Duration::from_millis(500),
        }
    }
}

/// One incoming request as seen by the throttle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    /// The throttled action, e.g. `login` or `api`.
    pub source: String,
    /// Client address, `None` when it could not be determined.
    pub address: Option<IpAddr>,
    /// Unix seconds; the lower bound for window counts.
    pub time: i64,
    pub user_id: Option<i64>,
}

impl TrackRequest {
    /// Build a request. IPv4-mapped IPv6 addresses are stored as IPv4.
    #[must_use]
    pub fn new(source: impl Into<String>, address: Option<IpAddr>, time: i64) -> Self {
        Self {
            source: source.into(),
            address: address.map(|ip| ip.to_canonical()),
            time,
            user_id: None,
        }
    }

    /// Build a request from a textual remote address.
    ///
    /// Accepts `ip`, `ip:port` and `[v6]:port`. Anything else yields a
    /// request without an address.
    #[must_use]
    pub fn from_remote_addr(source: impl Into<String>, remote: &str, time: i64) -> Self {
        Self::new(source, parse_remote_addr(remote), time)
    }

    /// Attribute the attempt to a user.
    #[must_use]
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.address {
            Some(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        }
    }

    #[must_use]
    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        match self.address {
            Some(IpAddr::V6(ip)) => Some(ip),
            _ => None,
        }
    }

    fn has_address(&self) -> bool {
        self.address.is_some()
    }
}

/// Parse `ip`, `ip:port`, `[v6]` or `[v6]:port`.
#[must_use]
pub fn parse_remote_addr(remote: &str) -> Option<IpAddr> {
    let remote = remote.trim();
    if let Ok(socket) = remote.parse::<SocketAddr>() {
        return Some(socket.ip());
    }
    if let Ok(ip) = remote.parse::<IpAddr>() {
        return Some(ip);
    }
    remote
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<Ipv6Addr>().ok())
        .map(IpAddr::V6)
}

/// Records attempts and applies the throttle. Storage errors are returned
/// and also dispatched as `track.failed`.
pub struct TrackService {
    repo: Arc<dyn TrackRepository>,
    config: TrackConfig,
    events: Arc<EventDispatcher>,
}

impl TrackService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn TrackRepository>,
        config: TrackConfig,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            repo,
            config,
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Build a request whose window starts `config.window` before now.
    #[must_use]
    pub fn request(&self, source: impl Into<String>, address: Option<IpAddr>) -> TrackRequest {
        let window = i64::try_from(self.config.window.as_secs()).unwrap_or(i64::MAX);
        TrackRequest::new(source, address, now().saturating_sub(window))
    }

    /// Record an attempt at the current time and return the new row id.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidAddress`] if the request has no client address.
    /// - [`TrackError::Storage`] if the insert fails.
    pub async fn add(&self, request: &TrackRequest) -> Result<i64, TrackError> {
        require_address(request)?;

        let track = NewTrack {
            user_id: request.user_id,
            source: request.source.clone(),
            ipv4: request.ipv4(),
            ipv6: request.ipv6(),
            time: now(),
        };
        let context = serde_json::json!({
            "source": request.source,
            "address": request.address.map(|ip| ip.to_string()),
        });
        let id = self
            .reported("add", context, self.repo.insert(&track).await)
            .await?;

        info!(
            track_id = id,
            source = %request.source,
            address = ?request.address,
            "track added"
        );
        Ok(id)
    }

    /// Count active attempts from this client and source since `request.time`.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidAddress`] if the request has no client address.
    /// - [`TrackError::Storage`] if the query fails.
    pub async fn tracks_for_client_from_time(
        &self,
        request: &TrackRequest,
    ) -> Result<u64, TrackError> {
        require_address(request)?;

        let query = TrackQuery {
            source: request.source.clone(),
            ipv4: request.ipv4(),
            ipv6: request.ipv6(),
            since: request.time,
        };
        let context = serde_json::json!({ "source": request.source });
        self.reported("count", context, self.repo.count_since(&query).await)
            .await
    }

    /// Delay the caller if the client is over the threshold.
    ///
    /// Returns `true` when a delay of `attempts * sleep_unit` was applied.
    ///
    /// # Errors
    ///
    /// Same as [`Self::tracks_for_client_from_time`].
    pub async fn check_tracking(&self, request: &TrackRequest) -> Result<bool, TrackError> {
        let attempts = self.tracks_for_client_from_time(request).await?;
        if attempts < self.config.max_attempts {
            debug!(source = %request.source, attempts, "below throttle threshold");
            return Ok(false);
        }

        let factor = u32::try_from(attempts).unwrap_or(u32::MAX);
        let delay = self.config.sleep_unit.saturating_mul(factor);

        warn!(
            source = %request.source,
            address = ?request.address,
            attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "throttling request"
        );
        self.events
            .dispatch(
                Event::new("track.delay", "request throttled").with_details(serde_json::json!({
                    "source": request.source,
                    "address": request.address.map(|ip| ip.to_string()),
                    "attempts": attempts,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                })),
            )
            .await;

        tokio::time::sleep(delay).await;
        Ok(true)
    }

    /// Remove every track row. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Storage`] if the backend fails.
    pub async fn clear(&self) -> Result<u64, TrackError> {
        let removed = self
            .reported("clear", serde_json::Value::Null, self.repo.clear().await)
            .await?;
        info!(removed, "tracks cleared");
        self.events
            .dispatch(
                Event::new("track.clear", "all tracks cleared")
                    .with_details(serde_json::json!({ "removed": removed })),
            )
            .await;
        Ok(removed)
    }

    /// Retire an active row from window counts.
    ///
    /// # Errors
    ///
    /// - [`TrackError::NotFound`] if the row is missing or already unlocked.
    /// - [`TrackError::Storage`] if the backend fails.
    pub async fn unlock(&self, id: i64) -> Result<(), TrackError> {
        let context = serde_json::json!({ "id": id });
        let affected = self
            .reported("unlock", context, self.repo.unlock(id, now()).await)
            .await?;
        if affected == 0 {
            return Err(TrackError::NotFound { id });
        }
        info!(track_id = id, "track unlocked");
        Ok(())
    }

    /// Delete a row.
    ///
    /// # Errors
    ///
    /// - [`TrackError::NotFound`] if the row is missing.
    /// - [`TrackError::Storage`] if the backend fails.
    pub async fn delete(&self, id: i64) -> Result<(), TrackError> {
        let context = serde_json::json!({ "id": id });
        let affected = self
            .reported("delete", context, self.repo.delete(id).await)
            .await?;
        if affected == 0 {
            return Err(TrackError::NotFound { id });
        }
        info!(track_id = id, "track deleted");
        Ok(())
    }

    /// Administrative listing, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Storage`] if the backend fails.
    pub async fn list(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, TrackError> {
        let context = serde_json::json!({ "source": filter.source });
        self.reported("list", context, self.repo.list(filter).await)
            .await
    }

    /// Dispatch `track.failed` for a storage error and hand it back.
    async fn reported<T>(
        &self,
        operation: &str,
        context: serde_json::Value,
        result: Result<T, StorageError>,
    ) -> Result<T, TrackError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let error = TrackError::from(e);
                warn!(operation, error = %error, "track storage failure");
                self.events
                    .dispatch(Event::failure("track", operation, &error, context))
                    .await;
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for TrackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn require_address(request: &TrackRequest) -> Result<(), TrackError> {
    if request.has_address() {
        Ok(())
    } else {
        Err(TrackError::InvalidAddress {
            source_name: request.source.clone(),
        })
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}
