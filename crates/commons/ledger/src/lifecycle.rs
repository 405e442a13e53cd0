//! Allocation lifecycle transitions and the expiry sweep.

use chrono::{DateTime, Duration, Utc};
use commons_room::typed;
use commons_types::{
    Actor, Allocation, AllocationId, EoKind, EventId, Frame, LifecycleEvent, LifecycleRecord,
    RecordId, RoomId, VaultShadowRecord, Visibility,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

/// Lifecycle event to apply to one allocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleUpdate {
    pub allocation_id: AllocationId,
    pub event: LifecycleEvent,
    #[serde(default)]
    pub reason: Option<String>,
}

impl LifecycleUpdate {
    pub fn new(allocation_id: AllocationId, event: LifecycleEvent) -> Self {
        Self {
            allocation_id,
            event,
            reason: None,
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LifecycleOutcome {
    Transitioned {
        allocation: Allocation,
        timeline_event: EventId,
        record: Option<RecordId>,
        shadow_updated: bool,
        inventory_updated: bool,
    },
    /// The allocation was no longer active; nothing was written.
    Unchanged { allocation: Allocation },
}

impl LifecycleOutcome {
    pub fn allocation(&self) -> &Allocation {
        match self {
            LifecycleOutcome::Transitioned { allocation, .. }
            | LifecycleOutcome::Unchanged { allocation } => allocation,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, LifecycleOutcome::Transitioned { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepFailure {
    pub room: RoomId,
    pub allocation_id: Option<AllocationId>,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExpirySweepReport {
    pub rooms_scanned: usize,
    pub allocations_checked: usize,
    pub expired: Vec<AllocationId>,
    pub failures: Vec<SweepFailure>,
}

impl ResourceLedger {
    /// Apply a lifecycle event to an active allocation.
    ///
    /// The timeline event and bridge status are authoritative. The vault
    /// shadow and the inventory are updated best-effort.
    pub async fn record_lifecycle_event(
        &self,
        bridge_room: &RoomId,
        update: LifecycleUpdate,
        org_room: &RoomId,
        vault_room: &RoomId,
        actor: &Actor,
    ) -> LedgerResult<LifecycleOutcome> {
        let mut allocation = self
            .get_allocation(bridge_room, &update.allocation_id)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found("allocation", format!("{} in {bridge_room}", update.allocation_id))
            })?;

        if !allocation.status.is_active() {
            debug!(
                allocation = %allocation.id,
                status = %allocation.status,
                event = %update.event,
                "Ignoring lifecycle event for settled allocation"
            );
            return Ok(LifecycleOutcome::Unchanged { allocation });
        }

        let now = Utc::now();
        let from_status = allocation.status;
        let to_status = update.event.target_status();
        let record = LifecycleRecord {
            allocation_id: allocation.id.clone(),
            event: update.event,
            from_status,
            to_status,
            quantity: allocation.quantity,
            recorded_by: actor.user_id.clone(),
            recorded_at: now,
            reason: update.reason.clone(),
        };
        // Appended before the status save; a retry after a failed save appends
        // again, and `allocation_history` keeps only the latest attempt.
        let timeline_event =
            typed::append(self.store.as_ref(), bridge_room, keys::LIFECYCLE, &record).await?;

        allocation.status = to_status;
        allocation.updated_at = now;
        self.save(bridge_room, keys::ALLOCATION, allocation.id.as_str(), &allocation)
            .await?;

        let kind = match update.event {
            LifecycleEvent::Revoked => EoKind::Nul,
            _ => EoKind::Alt,
        };
        let eo_record = self
            .emit(
                bridge_room,
                kind,
                keys::allocation_path(&allocation.id),
                json!({
                    "event": update.event,
                    "from": from_status,
                    "to": to_status,
                    "quantity": allocation.quantity,
                    "reason": update.reason,
                    "timeline_event": timeline_event,
                    "by": actor.user_id,
                }),
                Frame::given(Visibility::Bridge, bridge_room),
            )
            .await;

        let shadow_updated = match self.mirror_status(vault_room, &allocation).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(
                    allocation = %allocation.id,
                    vault = %vault_room,
                    error = %err,
                    "Vault shadow status update failed"
                );
                false
            }
        };

        let inventory_updated = match self
            .reverse_in_inventory(org_room, &allocation, update.event)
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                warn!(
                    allocation = %allocation.id,
                    relation = %allocation.relation_id,
                    error = %err,
                    "Inventory lifecycle update failed"
                );
                false
            }
        };

        info!(
            allocation = %allocation.id,
            event = %update.event,
            shadow_updated,
            inventory_updated,
            "Recorded lifecycle event"
        );
        Ok(LifecycleOutcome::Transitioned {
            allocation,
            timeline_event,
            record: eo_record,
            shadow_updated,
            inventory_updated,
        })
    }

    /// Lifecycle records of one allocation, oldest first.
    ///
    /// Records sharing a starting status are attempts at the same transition;
    /// only the last one is returned.
    pub async fn allocation_history(
        &self,
        bridge_room: &RoomId,
        allocation_id: &AllocationId,
    ) -> LedgerResult<Vec<LifecycleRecord>> {
        let events = self.store.timeline(bridge_room, Some(keys::LIFECYCLE)).await?;
        let mut history: Vec<LifecycleRecord> = Vec::new();
        for record in events
            .into_iter()
            .filter_map(|event| serde_json::from_value::<LifecycleRecord>(event.payload).ok())
            .filter(|record| &record.allocation_id == allocation_id)
        {
            history.retain(|earlier| earlier.from_status != record.from_status);
            history.push(record);
        }
        Ok(history)
    }

    /// Expire every active allocation past its `expires_at` in the given
    /// bridge rooms. Safe to run repeatedly.
    pub async fn check_expiry(
        &self,
        bridge_rooms: &[RoomId],
        org_room: &RoomId,
        vault_room: &RoomId,
    ) -> LedgerResult<ExpirySweepReport> {
        self.check_expiry_at(bridge_rooms, org_room, vault_room, Utc::now())
            .await
    }

    pub async fn check_expiry_at(
        &self,
        bridge_rooms: &[RoomId],
        org_room: &RoomId,
        vault_room: &RoomId,
        now: DateTime<Utc>,
    ) -> LedgerResult<ExpirySweepReport> {
        let cutoff = now - Duration::seconds(self.config.expiry.grace_secs);
        let system = Actor::user(self.config.expiry.system_actor.clone());
        let mut report = ExpirySweepReport::default();

        for bridge in bridge_rooms {
            report.rooms_scanned += 1;
            let allocations = match self.list_allocations(bridge).await {
                Ok(allocations) => allocations,
                Err(err) => {
                    warn!(bridge = %bridge, error = %err, "Skipping unreadable bridge room");
                    report.failures.push(SweepFailure {
                        room: bridge.clone(),
                        allocation_id: None,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            for allocation in allocations {
                report.allocations_checked += 1;
                if !allocation.is_expired_at(cutoff) {
                    continue;
                }
                let org = allocation.org_room.clone().unwrap_or_else(|| org_room.clone());
                let vault = allocation
                    .vault_room
                    .clone()
                    .unwrap_or_else(|| vault_room.clone());
                let update = LifecycleUpdate::new(allocation.id.clone(), LifecycleEvent::Expired)
                    .because("expired");

                match self
                    .record_lifecycle_event(bridge, update, &org, &vault, &system)
                    .await
                {
                    Ok(outcome) if outcome.transitioned() => report.expired.push(allocation.id),
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            allocation = %allocation.id,
                            error = %err,
                            "Expiring allocation failed"
                        );
                        report.failures.push(SweepFailure {
                            room: bridge.clone(),
                            allocation_id: Some(allocation.id),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            rooms = report.rooms_scanned,
            expired = report.expired.len(),
            failures = report.failures.len(),
            "Expiry sweep finished"
        );
        Ok(report)
    }

    /// Copy the allocation's status into its vault shadow. `Ok(false)` means
    /// there was no shadow to update.
    async fn mirror_status(&self, vault_room: &RoomId, allocation: &Allocation) -> LedgerResult<bool> {
        let Some(mut shadow) = self
            .load::<VaultShadowRecord>(vault_room, keys::VAULT_SHADOW, allocation.id.as_str())
            .await?
        else {
            warn!(allocation = %allocation.id, "No vault shadow to update");
            return Ok(false);
        };
        let from = shadow.status;
        shadow.status = allocation.status;
        shadow.mirrored_at = Utc::now();
        self.save(vault_room, keys::VAULT_SHADOW, allocation.id.as_str(), &shadow)
            .await?;
        self.emit(
            vault_room,
            EoKind::Alt,
            keys::shadow_path(&allocation.id),
            json!({ "from": from, "to": shadow.status }),
            Frame::given(Visibility::Vault, vault_room),
        )
        .await;
        Ok(true)
    }

    async fn reverse_in_inventory(
        &self,
        org_room: &RoomId,
        allocation: &Allocation,
        event: LifecycleEvent,
    ) -> LedgerResult<bool> {
        let infinite = self
            .get_type(org_room, &allocation.resource_type_id)
            .await?
            .is_some_and(|rt| rt.infinite);
        let updated = self
            .apply_lifecycle_to_inventory(
                org_room,
                &allocation.relation_id,
                event,
                allocation.quantity,
                infinite,
            )
            .await?;
        Ok(updated.is_some())
    }
}
