//! Serde helpers over the untyped room store contract.

use commons_types::{EventId, RoomId};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{RoomResult, RoomStore};

/// Read and decode one state value.
pub async fn load<T: DeserializeOwned>(
    store: &dyn RoomStore,
    room: &RoomId,
    event_type: &str,
    key: &str,
) -> RoomResult<Option<T>> {
    match store.get_state(room, event_type, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and overwrite one state value.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn RoomStore,
    room: &RoomId,
    event_type: &str,
    key: &str,
    value: &T,
) -> RoomResult<()> {
    let value = serde_json::to_value(value)?;
    store.set_state(room, event_type, value, key).await
}

/// Decode every state value of one event type. Entries that do not decode
/// are skipped with a warning rather than failing the whole scan.
pub async fn load_all<T: DeserializeOwned>(
    store: &dyn RoomStore,
    room: &RoomId,
    event_type: &str,
) -> RoomResult<Vec<T>> {
    let entries = store.list_state(room, event_type).await?;
    let mut values = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value(entry.value) {
            Ok(value) => values.push(value),
            Err(err) => {
                tracing::warn!(
                    room = %room,
                    event_type = event_type,
                    key = %entry.key,
                    error = %err,
                    "Skipping undecodable state entry"
                );
            }
        }
    }
    Ok(values)
}

/// Encode and append one timeline event.
pub async fn append<T: Serialize + ?Sized>(
    store: &dyn RoomStore,
    room: &RoomId,
    event_type: &str,
    payload: &T,
) -> RoomResult<EventId> {
    let payload = serde_json::to_value(payload)?;
    store.send_event(room, event_type, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryRoomStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
    }

    #[tokio::test]
    async fn round_trips_typed_state_and_skips_garbage() {
        let store = InMemoryRoomStore::new();
        let room = RoomId::new("org-a");
        save(&store, &room, "rows", "a", &Row { n: 1 }).await.unwrap();
        store
            .set_state(&room, "rows", serde_json::json!("not a row"), "b")
            .await
            .unwrap();

        let one: Option<Row> = load(&store, &room, "rows", "a").await.unwrap();
        assert_eq!(one, Some(Row { n: 1 }));

        let all: Vec<Row> = load_all(&store, &room, "rows").await.unwrap();
        assert_eq!(all, vec![Row { n: 1 }]);
    }
}
