//! Lifecycle notifications emitted by the cache.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::entry::EntityKind;

/// Buffered events per subscriber before slow receivers start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// `remove` was called.
    Explicit,
    /// Dropped to make room for another payload.
    Evicted,
    /// Removed by a region or full purge.
    Purged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// An entry was promoted to resident.
    EntityAdded {
        kind: EntityKind,
        id: String,
        size_in_bytes: u64,
    },
    EntityRemoved {
        kind: EntityKind,
        id: String,
        size_in_bytes: u64,
        reason: RemovalReason,
    },
    /// Admission or post-load eviction could not make room.
    CacheExhausted {
        kind: EntityKind,
        id: String,
        requested_bytes: u64,
        available_bytes: u64,
    },
}

impl CacheEvent {
    pub fn id(&self) -> &str {
        match self {
            CacheEvent::EntityAdded { id, .. }
            | CacheEvent::EntityRemoved { id, .. }
            | CacheEvent::CacheExhausted { id, .. } => id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::EntityAdded { .. } => "entity_added",
            CacheEvent::EntityRemoved { .. } => "entity_removed",
            CacheEvent::CacheExhausted { .. } => "cache_exhausted",
        }
    }
}

/// Broadcast bus owned by a cache instance.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
