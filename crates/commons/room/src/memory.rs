//! In-memory reference implementation of the room store.
//!
//! Deterministic and test-friendly: state is ordered by key and timelines keep
//! append order. Production deployments put a replicated, encrypted substrate
//! behind the same trait.

use std::collections::{BTreeMap, HashMap};
use async_trait::async_trait;
use chrono::Utc;
use commons_types::{EventId, RoomId};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::traits::{RoomStore, StateEntry, TimelineEvent};
use crate::RoomResult;

type StateKey = (RoomId, String);

/// In-memory room store.
#[derive(Default)]
pub struct InMemoryRoomStore {
    state: RwLock<HashMap<StateKey, BTreeMap<String, Value>>>,
    timelines: RwLock<HashMap<RoomId, Vec<TimelineEvent>>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timeline events across every room.
    pub async fn event_count(&self) -> usize {
        self.timelines.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn get_state(
        &self,
        room: &RoomId,
        event_type: &str,
        key: &str,
    ) -> RoomResult<Option<Value>> {
        let guard = self.state.read().await;
        Ok(guard
            .get(&(room.clone(), event_type.to_string()))
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn set_state(
        &self,
        room: &RoomId,
        event_type: &str,
        value: Value,
        key: &str,
    ) -> RoomResult<()> {
        let mut guard = self.state.write().await;
        guard
            .entry((room.clone(), event_type.to_string()))
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        payload: Value,
    ) -> RoomResult<EventId> {
        let mut guard = self.timelines.write().await;
        let timeline = guard.entry(room.clone()).or_default();
        let event = TimelineEvent {
            event_id: EventId::generate(),
            room: room.clone(),
            event_type: event_type.to_string(),
            sequence: timeline.len() as u64 + 1,
            payload,
            origin_ts: Utc::now(),
        };
        let id = event.event_id.clone();
        timeline.push(event);
        Ok(id)
    }

    async fn list_state(&self, room: &RoomId, event_type: &str) -> RoomResult<Vec<StateEntry>> {
        let guard = self.state.read().await;
        Ok(guard
            .get(&(room.clone(), event_type.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| StateEntry {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn timeline(
        &self,
        room: &RoomId,
        event_type: Option<&str>,
    ) -> RoomResult<Vec<TimelineEvent>> {
        let guard = self.timelines.read().await;
        Ok(guard
            .get(room)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| event_type.map_or(true, |t| e.event_type == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn state_is_latest_value_wins() {
        let store = InMemoryRoomStore::new();
        let room = RoomId::new("org-a");
        store.set_state(&room, "t", json!(1), "k").await.unwrap();
        store.set_state(&room, "t", json!(2), "k").await.unwrap();
        assert_eq!(store.get_state(&room, "t", "k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.get_state(&room, "t", "missing").await.unwrap(), None);
        assert_eq!(
            store.get_state(&RoomId::new("org-b"), "t", "k").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn list_state_is_ordered_by_key() {
        let store = InMemoryRoomStore::new();
        let room = RoomId::new("org-a");
        store.set_state(&room, "t", json!("b"), "2").await.unwrap();
        store.set_state(&room, "t", json!("a"), "1").await.unwrap();
        store.set_state(&room, "other", json!("x"), "0").await.unwrap();
        let entries = store.list_state(&room, "t").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn timeline_keeps_append_order() {
        let store = InMemoryRoomStore::new();
        let room = RoomId::new("bridge-1");
        store.send_event(&room, "a", json!({"n": 1})).await.unwrap();
        store.send_event(&room, "b", json!({"n": 2})).await.unwrap();
        store.send_event(&room, "a", json!({"n": 3})).await.unwrap();

        let all = store.timeline(&room, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].sequence, 3);

        let only_a = store.timeline(&room, Some("a")).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[1].payload, json!({"n": 3}));
        assert_eq!(store.event_count().await, 3);
    }
}
