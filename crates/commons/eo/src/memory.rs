//! Hash-chained in-memory EO log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use commons_types::{EoKind, EoOperation, Frame, RecordId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EmitError, EoEmitter};

/// One stored record with its position in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EoEntry {
    pub id: RecordId,
    pub sequence: u64,
    pub room: RoomId,
    pub operation: EoOperation,
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// In-memory EO log. Each entry hashes its predecessor, so any edit to an
/// earlier entry breaks [`InMemoryEoLog::verify_chain`].
#[derive(Default)]
pub struct InMemoryEoLog {
    entries: RwLock<Vec<EoEntry>>,
    outage: AtomicBool,
}

impl InMemoryEoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `emit` fail until [`InMemoryEoLog::restore`].
    pub fn simulate_outage(&self) {
        self.outage.store(true, Ordering::SeqCst);
    }

    pub fn restore(&self) {
        self.outage.store(false, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<EoEntry> {
        self.entries
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kinds(&self) -> Vec<EoKind> {
        self.entries()
            .into_iter()
            .map(|entry| entry.operation.kind)
            .collect()
    }

    pub fn count_kind(&self, kind: EoKind) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.operation.kind == kind)
            .count()
    }

    /// Entries whose target path starts with `prefix`.
    pub fn for_target(&self, prefix: &str) -> Vec<EoEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.operation.target.starts_with(prefix))
            .collect()
    }

    pub fn for_room(&self, room: &RoomId) -> Vec<EoEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| &entry.room == room)
            .collect()
    }

    pub fn verify_chain(&self) -> bool {
        let entries = self.entries();
        let mut previous: Option<String> = None;
        for entry in &entries {
            if entry.previous_hash != previous {
                return false;
            }
            match compute_hash(&entry.room, &entry.operation, previous.as_deref(), entry.sequence) {
                Ok(hash) if hash == entry.hash => previous = Some(hash),
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl EoEmitter for InMemoryEoLog {
    async fn emit(
        &self,
        room: &RoomId,
        kind: EoKind,
        target: &str,
        payload: Value,
        frame: Frame,
    ) -> Result<RecordId, EmitError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(EmitError::Unavailable("simulated outage".to_string()));
        }
        if target.trim().is_empty() {
            return Err(EmitError::Rejected("target path must not be empty".to_string()));
        }

        let mut guard = self
            .entries
            .write()
            .map_err(|_| EmitError::Unavailable("EO log lock poisoned".to_string()))?;

        let operation = EoOperation {
            kind,
            target: target.to_string(),
            payload,
            frame,
            ts: Utc::now(),
        };
        let previous_hash = guard.last().map(|e| e.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_hash(room, &operation, previous_hash.as_deref(), sequence)?;

        let entry = EoEntry {
            id: RecordId::generate(),
            sequence,
            room: room.clone(),
            operation,
            previous_hash,
            hash,
        };
        let id = entry.id.clone();
        guard.push(entry);
        Ok(id)
    }
}

fn compute_hash(
    room: &RoomId,
    operation: &EoOperation,
    previous_hash: Option<&str>,
    sequence: u64,
) -> Result<String, EmitError> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "room": room,
        "operation": operation,
    });
    let serialized =
        serde_json::to_vec(&serializable).map_err(|e| EmitError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}
