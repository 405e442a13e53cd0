//! Commons Ledger - resource & provenance ledger over owned rooms.
//!
//! The ledger tracks what resources exist (catalog), who holds or offers them
//! (relations), how much is available (inventory), and who received what
//! (allocations). Every mutation is mirrored into the EO audit log.
//!
//! Writes fall into three classes:
//! - validation failures are returned before anything is written
//! - authoritative writes (bridge allocation, relation, type) propagate errors
//! - best-effort writes (vault shadow, inventory fan-out, projections, EO
//!   emission) are logged and reported on the result, never fatal

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod allocation;
pub mod cache;
mod catalog;
pub mod config;
mod dedup;
mod error;
mod inventory;
pub mod keys;
mod lifecycle;
mod membership;
pub mod merge;
pub mod policy;
mod reconcile;
mod relation;
pub mod telemetry;

use std::sync::Arc;

use commons_eo::EoEmitter;
use commons_grants::{GrantEvaluator, PermissionEvaluator};
use commons_room::{typed, RoomStore};
use commons_types::{Actor, EoKind, Frame, RecordId, RoomId, ScopeKind, Visibility};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub use allocation::{AllocationReceipt, AllocationResult};
pub use cache::LookupCache;
pub use catalog::{PropagationOutcome, PropagationReport};
pub use config::{CacheConfig, CatalogConfig, ExpiryConfig, LedgerConfig, LoggingConfig};
pub use error::{LedgerError, LedgerResult};
pub use lifecycle::{ExpirySweepReport, LifecycleOutcome, LifecycleUpdate, SweepFailure};
pub use merge::{auto_resolve, compare_records, resolve_field, MergeRequest};
pub use policy::{validate_allocation, AllocationContext};
pub use reconcile::ReconcileReport;

/// Entry point for every ledger operation.
///
/// Holds only its collaborators; all ledger state lives in rooms.
pub struct ResourceLedger {
    store: Arc<dyn RoomStore>,
    eo: Arc<dyn EoEmitter>,
    evaluator: Arc<dyn PermissionEvaluator>,
    config: LedgerConfig,
}

impl ResourceLedger {
    pub fn new(store: Arc<dyn RoomStore>, eo: Arc<dyn EoEmitter>) -> Self {
        Self {
            store,
            eo,
            evaluator: Arc::new(GrantEvaluator),
            config: LedgerConfig::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub(crate) async fn load<T: DeserializeOwned>(
        &self,
        room: &RoomId,
        event_type: &str,
        key: &str,
    ) -> LedgerResult<Option<T>> {
        Ok(typed::load(self.store.as_ref(), room, event_type, key).await?)
    }

    pub(crate) async fn load_all<T: DeserializeOwned>(
        &self,
        room: &RoomId,
        event_type: &str,
    ) -> LedgerResult<Vec<T>> {
        Ok(typed::load_all(self.store.as_ref(), room, event_type).await?)
    }

    pub(crate) async fn save<T: Serialize + ?Sized>(
        &self,
        room: &RoomId,
        event_type: &str,
        key: &str,
        value: &T,
    ) -> LedgerResult<()> {
        Ok(typed::save(self.store.as_ref(), room, event_type, key, value).await?)
    }

    /// Emit one EO record. A failed emission is logged and yields `None`.
    pub(crate) async fn emit(
        &self,
        room: &RoomId,
        kind: EoKind,
        target: String,
        payload: Value,
        frame: Frame,
    ) -> Option<RecordId> {
        match self.eo.emit(room, kind, &target, payload, frame).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(
                    room = %room,
                    kind = %kind,
                    target = %target,
                    error = %err,
                    "EO emission failed"
                );
                None
            }
        }
    }

    /// The actor's effective identity inside `org_room`: a stored org role
    /// overrides whatever role the caller asserted.
    pub(crate) async fn effective_actor(&self, org_room: &RoomId, actor: &Actor) -> LedgerResult<Actor> {
        let role = self.resolve_role(org_room, actor).await?;
        Ok(Actor {
            user_id: actor.user_id.clone(),
            role,
        })
    }

    pub(crate) fn denied(actor: &Actor, action: &'static str, target: String) -> LedgerError {
        LedgerError::PermissionDenied {
            actor: actor.user_id.to_string(),
            action,
            target,
        }
    }
}

pub(crate) fn scope_visibility(scope: ScopeKind) -> Visibility {
    match scope {
        ScopeKind::Individual => Visibility::Individual,
        ScopeKind::Org => Visibility::Org,
        ScopeKind::Network => Visibility::Network,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use commons_eo::InMemoryEoLog;
    use commons_room::InMemoryRoomStore;

    pub struct Harness {
        pub ledger: ResourceLedger,
        pub store: Arc<InMemoryRoomStore>,
        pub log: Arc<InMemoryEoLog>,
    }

    pub fn harness() -> Harness {
        let store = Arc::new(InMemoryRoomStore::new());
        let log = Arc::new(InMemoryEoLog::new());
        let ledger = ResourceLedger::new(store.clone(), log.clone());
        Harness { ledger, store, log }
    }

    pub fn admin() -> Actor {
        Actor::user("alice").with_role("admin")
    }
}
