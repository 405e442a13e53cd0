//! Emitter that appends EO records to the framed room's own timeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use commons_room::RoomStore;
use commons_types::{EoKind, EoOperation, Frame, RecordId, RoomId};
use serde_json::Value;

use crate::{EmitError, EoEmitter};

/// Timeline event type carrying one EO record.
pub const EO_EVENT_TYPE: &str = "commons.eo.operation";

pub struct RoomEoEmitter {
    store: Arc<dyn RoomStore>,
}

impl RoomEoEmitter {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EoEmitter for RoomEoEmitter {
    async fn emit(
        &self,
        room: &RoomId,
        kind: EoKind,
        target: &str,
        payload: Value,
        frame: Frame,
    ) -> Result<RecordId, EmitError> {
        let operation = EoOperation {
            kind,
            target: target.to_string(),
            payload,
            frame,
            ts: Utc::now(),
        };
        let payload = serde_json::to_value(&operation)
            .map_err(|e| EmitError::Serialization(e.to_string()))?;
        let event_id = self
            .store
            .send_event(room, EO_EVENT_TYPE, payload)
            .await
            .map_err(|e| EmitError::Unavailable(e.to_string()))?;
        Ok(RecordId::new(event_id.0))
    }
}
