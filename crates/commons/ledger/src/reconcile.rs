//! Repair sweep for drift left by failed best-effort writes.
//!
//! The bridge allocation records are the source of truth. The sweep
//! backfills missing vault shadows, re-mirrors stale shadow statuses,
//! retries pending projection withdrawals, and recomputes each relation's
//! `allocated` counter from the active allocations. It never infers
//! `available`.

use std::collections::HashMap;

use chrono::Utc;
use commons_types::{
    Allocation, AllocationId, EoKind, Frame, RelationId, ResourceType, ResourceTypeId, RoomId,
    VaultShadowRecord, Visibility,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::LedgerResult;
use crate::{keys, ResourceLedger};

/// Values closer than this are treated as equal.
const TOLERANCE: f64 = 1e-9;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub bridges_scanned: Vec<RoomId>,
    pub allocations_scanned: usize,
    pub shadows_backfilled: Vec<AllocationId>,
    pub shadows_refreshed: Vec<AllocationId>,
    pub inventories_corrected: Vec<RelationId>,
    /// `(relation, room)` tombstones written on retry.
    pub withdrawals_completed: Vec<(RelationId, RoomId)>,
    pub failures: Vec<String>,
}

impl ResourceLedger {
    /// Reconcile `org_room`'s derived state against its bridge allocations.
    ///
    /// The scan covers `bridge_rooms` plus every bridge the org has on
    /// record. If any of those bridges cannot be read, `allocated` is left
    /// alone, since a partial scan would undercount. Per-item failures are
    /// collected, not raised.
    pub async fn reconcile(
        &self,
        bridge_rooms: &[RoomId],
        org_room: &RoomId,
    ) -> LedgerResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let bridges = self.bridges_for(org_room, bridge_rooms, &mut report).await;

        let mut complete = true;
        let mut allocations = Vec::new();
        for bridge in &bridges {
            match self.list_allocations(bridge).await {
                Ok(found) => {
                    allocations.extend(
                        found
                            .into_iter()
                            .filter(|a| a.org_room.as_ref().map_or(true, |room| room == org_room)),
                    );
                    report.bridges_scanned.push(bridge.clone());
                }
                Err(err) => {
                    warn!(bridge = %bridge, error = %err, "Skipping unreadable bridge room");
                    report.failures.push(format!("{bridge}: {err}"));
                    complete = false;
                }
            }
        }
        report.allocations_scanned = allocations.len();

        let mut types: HashMap<ResourceTypeId, Option<ResourceType>> = HashMap::new();
        for allocation in &allocations {
            let Some(vault) = allocation.vault_room.as_ref() else {
                continue;
            };
            if !types.contains_key(&allocation.resource_type_id) {
                let loaded = self
                    .get_type(org_room, &allocation.resource_type_id)
                    .await
                    .unwrap_or_else(|err| {
                        warn!(resource_type = %allocation.resource_type_id, error = %err, "Type unreadable");
                        None
                    });
                types.insert(allocation.resource_type_id.clone(), loaded);
            }
            let resource_type = types
                .get(&allocation.resource_type_id)
                .and_then(|rt| rt.as_ref());

            if let Err(err) = self
                .reconcile_shadow(vault, allocation, resource_type, &mut report)
                .await
            {
                warn!(allocation = %allocation.id, error = %err, "Shadow reconciliation failed");
                report.failures.push(format!("{}: {err}", allocation.id));
            }
        }

        let relations = match self.list_relations(org_room).await {
            Ok(relations) => relations,
            Err(err) => {
                warn!(org = %org_room, error = %err, "Relations unreadable; skipping inventory");
                report.failures.push(format!("{org_room}: {err}"));
                Vec::new()
            }
        };
        for relation in relations {
            if !relation.pending_withdrawal.is_empty() {
                match self.retry_withdrawals(org_room, &relation.id).await {
                    Ok(retried) => {
                        report.withdrawals_completed.extend(
                            retried
                                .withdrawn_from
                                .into_iter()
                                .map(|room| (relation.id.clone(), room)),
                        );
                        report.failures.extend(
                            retried
                                .failed_rooms
                                .into_iter()
                                .map(|room| format!("{}: tombstone for {room} still pending", relation.id)),
                        );
                    }
                    Err(err) => report.failures.push(format!("{}: {err}", relation.id)),
                }
            }

            if !complete {
                continue;
            }
            let expected: f64 = allocations
                .iter()
                .filter(|a| a.relation_id == relation.id && a.status.is_active())
                .map(|a| a.quantity)
                .sum();
            if let Err(err) = self
                .reconcile_inventory(org_room, &relation.id, expected, &mut report)
                .await
            {
                warn!(relation = %relation.id, error = %err, "Inventory reconciliation failed");
                report.failures.push(format!("{}: {err}", relation.id));
            }
        }
        if !complete {
            report
                .failures
                .push(format!("{org_room}: bridge scan incomplete; allocated counters left unchanged"));
        }

        info!(
            org = %org_room,
            bridges = report.bridges_scanned.len(),
            scanned = report.allocations_scanned,
            backfilled = report.shadows_backfilled.len(),
            refreshed = report.shadows_refreshed.len(),
            corrected = report.inventories_corrected.len(),
            withdrawn = report.withdrawals_completed.len(),
            failures = report.failures.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Bridges on record for `org_room`.
    pub async fn known_bridges(&self, org_room: &RoomId) -> LedgerResult<Vec<RoomId>> {
        self.load_all(org_room, keys::ORG_BRIDGE).await
    }

    /// Record that `bridge_room` holds allocations against `org_room`.
    pub(crate) async fn register_bridge(&self, org_room: &RoomId, bridge_room: &RoomId) -> LedgerResult<()> {
        let known: Option<RoomId> = self
            .load(org_room, keys::ORG_BRIDGE, bridge_room.as_str())
            .await?;
        if known.is_none() {
            self.save(org_room, keys::ORG_BRIDGE, bridge_room.as_str(), bridge_room)
                .await?;
            debug!(org = %org_room, bridge = %bridge_room, "Registered bridge room");
        }
        Ok(())
    }

    /// The caller's bridges first, then those on record. Bridges passed in
    /// but not yet on record are registered.
    async fn bridges_for(
        &self,
        org_room: &RoomId,
        bridge_rooms: &[RoomId],
        report: &mut ReconcileReport,
    ) -> Vec<RoomId> {
        let mut bridges: Vec<RoomId> = Vec::new();
        for bridge in bridge_rooms {
            if !bridges.contains(bridge) {
                bridges.push(bridge.clone());
            }
        }
        match self.known_bridges(org_room).await {
            Ok(known) => {
                for bridge in known {
                    if !bridges.contains(&bridge) {
                        bridges.push(bridge);
                    }
                }
            }
            Err(err) => {
                warn!(org = %org_room, error = %err, "Bridge registry unreadable");
                report.failures.push(format!("{org_room}: bridge registry: {err}"));
            }
        }
        for bridge in bridge_rooms {
            if let Err(err) = self.register_bridge(org_room, bridge).await {
                warn!(org = %org_room, bridge = %bridge, error = %err, "Bridge registration failed");
            }
        }
        bridges
    }

    async fn reconcile_shadow(
        &self,
        vault: &RoomId,
        allocation: &Allocation,
        resource_type: Option<&ResourceType>,
        report: &mut ReconcileReport,
    ) -> LedgerResult<()> {
        let existing: Option<VaultShadowRecord> = self
            .load(vault, keys::VAULT_SHADOW, allocation.id.as_str())
            .await?;
        match existing {
            None => {
                let Some(resource_type) = resource_type else {
                    report
                        .failures
                        .push(format!("{}: resource type unavailable for shadow", allocation.id));
                    return Ok(());
                };
                self.write_shadow(vault, allocation, resource_type).await?;
                report.shadows_backfilled.push(allocation.id.clone());
            }
            Some(mut shadow) if shadow.status != allocation.status => {
                let from = shadow.status;
                shadow.status = allocation.status;
                shadow.mirrored_at = Utc::now();
                self.save(vault, keys::VAULT_SHADOW, allocation.id.as_str(), &shadow)
                    .await?;
                self.emit(
                    vault,
                    EoKind::Alt,
                    keys::shadow_path(&allocation.id),
                    json!({ "from": from, "to": shadow.status, "reason": "reconcile" }),
                    Frame::given(Visibility::Vault, vault),
                )
                .await;
                report.shadows_refreshed.push(allocation.id.clone());
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn reconcile_inventory(
        &self,
        org_room: &RoomId,
        relation_id: &RelationId,
        expected: f64,
        report: &mut ReconcileReport,
    ) -> LedgerResult<()> {
        let Some(mut inventory) = self.get_inventory(org_room, relation_id).await? else {
            if expected > TOLERANCE {
                report
                    .failures
                    .push(format!("{relation_id}: active allocations but no inventory row"));
            }
            return Ok(());
        };
        if (inventory.allocated - expected).abs() <= TOLERANCE {
            return Ok(());
        }

        let from = inventory.allocated;
        inventory.set_allocated(expected);
        self.save_inventory(org_room, &inventory).await?;
        self.emit(
            org_room,
            EoKind::Alt,
            keys::inventory_path(relation_id),
            json!({
                "relation": relation_id,
                "reason": "reconcile",
                "field": "allocated",
                "from": from,
                "to": inventory.allocated,
            }),
            Frame::given(Visibility::Org, org_room),
        )
        .await;
        report.inventories_corrected.push(relation_id.clone());
        Ok(())
    }
}
