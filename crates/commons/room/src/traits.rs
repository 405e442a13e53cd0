use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commons_types::{EventId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RoomResult;

/// One keyed state value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
}

/// One appended timeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: EventId,
    pub room: RoomId,
    pub event_type: String,
    pub sequence: u64,
    pub payload: Value,
    pub origin_ts: DateTime<Utc>,
}

/// Per-room keyed state (latest value wins) plus an append-only timeline.
///
/// Writes are order-tolerant overwrites; there is no compare-and-swap and no
/// locking across calls.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Read the latest value stored under `(event_type, key)`.
    async fn get_state(
        &self,
        room: &RoomId,
        event_type: &str,
        key: &str,
    ) -> RoomResult<Option<Value>>;

    /// Overwrite the value stored under `(event_type, key)`.
    async fn set_state(
        &self,
        room: &RoomId,
        event_type: &str,
        value: Value,
        key: &str,
    ) -> RoomResult<()>;

    /// Append an event to the room timeline.
    async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        payload: Value,
    ) -> RoomResult<EventId>;

    /// All state values of one event type, ordered by key.
    async fn list_state(&self, room: &RoomId, event_type: &str) -> RoomResult<Vec<StateEntry>>;

    /// Timeline events in append order, optionally filtered by event type.
    async fn timeline(
        &self,
        room: &RoomId,
        event_type: Option<&str>,
    ) -> RoomResult<Vec<TimelineEvent>>;
}
