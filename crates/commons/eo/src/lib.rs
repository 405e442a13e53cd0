//! EO log emitter.
//!
//! Every ledger mutation is mirrored into an append-only log of epistemic
//! operations. The emitter is a trusted external collaborator: it returns the
//! appended record's id, or an [`EmitError`] the caller decides how to handle.
//! Records are never updated or deleted.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod memory;
mod room;

use async_trait::async_trait;
use commons_types::{EoKind, Frame, RecordId, RoomId};
use serde_json::Value;
use thiserror::Error;

pub use memory::{EoEntry, InMemoryEoLog};
pub use room::{RoomEoEmitter, EO_EVENT_TYPE};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("EO log unavailable: {0}")]
    Unavailable(String),

    #[error("EO record rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait EoEmitter: Send + Sync {
    /// Durably append one audit record about `target` (a dotted path).
    async fn emit(
        &self,
        room: &RoomId,
        kind: EoKind,
        target: &str,
        payload: Value,
        frame: Frame,
    ) -> Result<RecordId, EmitError>;
}
