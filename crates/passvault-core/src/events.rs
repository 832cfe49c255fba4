//! Event dispatch for `PassVault`.
//!
//! Services report noteworthy occurrences (throttle delays, exports, storage
//! and archive failures) as [`Event`]s. The [`EventDispatcher`] fans each
//! event out to every registered [`EventSink`]. Dispatch is best-effort: a
//! failing sink is logged at `warn` and never fails the operation that raised
//! the event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::EventError;

/// A single dispatched event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Dotted action name, e.g. `track.delay` or `archive.failed`.
    pub action: String,
    /// Human-readable description.
    pub message: String,
    /// Structured details.
    pub details: serde_json::Value,
}

impl Event {
    /// Build an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.into(),
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// A `<subsystem>.failed` event for an operation that hit a storage or
    /// I/O error. `context` must be a JSON object or `Null`; the operation
    /// name is added to it.
    #[must_use]
    pub fn failure(
        subsystem: &str,
        operation: &str,
        error: &dyn std::fmt::Display,
        context: serde_json::Value,
    ) -> Self {
        let mut details = match context {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        details.insert("operation".to_owned(), operation.into());
        Self::new(format!("{subsystem}.failed"), error.to_string())
            .with_details(serde_json::Value::Object(details))
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for dispatched events.
///
/// Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// The sink's name (for error reporting).
    fn name(&self) -> &str;

    /// Persist or forward one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be delivered.
    async fn publish(&self, event: &Event) -> Result<(), EventError>;
}

/// Fans events out to registered sinks.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Deliver an event to every sink. Returns how many sinks accepted it.
    pub async fn dispatch(&self, event: Event) -> usize {
        let sinks = self.sinks.read().await;

        let mut delivered = 0usize;
        for sink in sinks.iter() {
            match sink.publish(&event).await {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(e) => {
                    warn!(
                        sink = sink.name(),
                        action = %event.action,
                        error = %e,
                        "event sink failed"
                    );
                }
            }
        }
        delivered
    }

    /// Number of registered sinks.
    pub async fn sink_count(&self) -> usize {
        self.sinks.read().await.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

/// In-memory sink, handy for tests and the status endpoint.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl EventSink for MemoryEventSink {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, event: &Event) -> Result<(), EventError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}
