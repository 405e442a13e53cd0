//! Fault injection for exercising best-effort write paths.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use commons_types::{EventId, RoomId};
use serde_json::Value;

use crate::traits::{RoomStore, StateEntry, TimelineEvent};
use crate::{RoomError, RoomResult};

/// Wraps a store and fails selected operations.
///
/// Write faults are keyed by `(room, event_type)`; read faults by room.
pub struct FaultyRoomStore {
    inner: Arc<dyn RoomStore>,
    failing_writes: Mutex<HashSet<(RoomId, String)>>,
    failing_reads: Mutex<HashSet<RoomId>>,
}

impl FaultyRoomStore {
    pub fn new(inner: Arc<dyn RoomStore>) -> Self {
        Self {
            inner,
            failing_writes: Mutex::new(HashSet::new()),
            failing_reads: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_writes(&self, room: &RoomId, event_type: &str) {
        if let Ok(mut guard) = self.failing_writes.lock() {
            guard.insert((room.clone(), event_type.to_string()));
        }
    }

    pub fn fail_reads(&self, room: &RoomId) {
        if let Ok(mut guard) = self.failing_reads.lock() {
            guard.insert(room.clone());
        }
    }

    pub fn heal(&self) {
        if let Ok(mut guard) = self.failing_writes.lock() {
            guard.clear();
        }
        if let Ok(mut guard) = self.failing_reads.lock() {
            guard.clear();
        }
    }

    fn check_write(&self, room: &RoomId, event_type: &str) -> RoomResult<()> {
        let failing = self
            .failing_writes
            .lock()
            .map(|guard| guard.contains(&(room.clone(), event_type.to_string())))
            .unwrap_or(false);
        if failing {
            return Err(RoomError::Unavailable(format!(
                "injected write fault for {room}/{event_type}"
            )));
        }
        Ok(())
    }

    fn check_read(&self, room: &RoomId) -> RoomResult<()> {
        let failing = self
            .failing_reads
            .lock()
            .map(|guard| guard.contains(room))
            .unwrap_or(false);
        if failing {
            return Err(RoomError::Unavailable(format!("injected read fault for {room}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomStore for FaultyRoomStore {
    async fn get_state(
        &self,
        room: &RoomId,
        event_type: &str,
        key: &str,
    ) -> RoomResult<Option<Value>> {
        self.check_read(room)?;
        self.inner.get_state(room, event_type, key).await
    }

    async fn set_state(
        &self,
        room: &RoomId,
        event_type: &str,
        value: Value,
        key: &str,
    ) -> RoomResult<()> {
        self.check_write(room, event_type)?;
        self.inner.set_state(room, event_type, value, key).await
    }

    async fn send_event(
        &self,
        room: &RoomId,
        event_type: &str,
        payload: Value,
    ) -> RoomResult<EventId> {
        self.check_write(room, event_type)?;
        self.inner.send_event(room, event_type, payload).await
    }

    async fn list_state(&self, room: &RoomId, event_type: &str) -> RoomResult<Vec<StateEntry>> {
        self.check_read(room)?;
        self.inner.list_state(room, event_type).await
    }

    async fn timeline(
        &self,
        room: &RoomId,
        event_type: Option<&str>,
    ) -> RoomResult<Vec<TimelineEvent>> {
        self.check_read(room)?;
        self.inner.timeline(room, event_type).await
    }
}
