//! The allocation orchestrator.
//!
//! An allocation is one authoritative write to the bridge room followed by
//! two best-effort projections: the beneficiary's vault shadow and the
//! holder's inventory. Only the bridge write can fail the operation.

use chrono::Utc;
use commons_types::{
    Actor, Allocation, AllocationId, AllocationRequest, AllocationStatus, EoKind, Frame,
    Inventory, RecordId, ResourceType, RoomId, VaultShadowRecord, Violation, Visibility,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::policy::{validate_allocation, AllocationContext};
use crate::{keys, ResourceLedger};

/// Outcome of [`ResourceLedger::allocate`]. A rejection is not an error: it
/// carries every violation found and nothing was written.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationResult {
    Granted(AllocationReceipt),
    Rejected { violations: Vec<Violation> },
}

impl AllocationResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, AllocationResult::Granted(_))
    }

    pub fn receipt(&self) -> Option<&AllocationReceipt> {
        match self {
            AllocationResult::Granted(receipt) => Some(receipt),
            AllocationResult::Rejected { .. } => None,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            AllocationResult::Granted(_) => &[],
            AllocationResult::Rejected { violations } => violations,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AllocationReceipt {
    pub allocation: Allocation,
    /// False when the vault shadow write failed; reconciliation backfills it.
    pub shadow_written: bool,
    /// False when the inventory update failed.
    pub inventory_updated: bool,
    /// EO records emitted, in order.
    pub records: Vec<RecordId>,
}

impl ResourceLedger {
    /// Allocate units of a resource type from `org_room`'s relation to a
    /// beneficiary, recording it in `bridge_room` and mirroring it into
    /// `vault_room`.
    pub async fn allocate(
        &self,
        bridge_room: &RoomId,
        request: AllocationRequest,
        org_room: &RoomId,
        vault_room: &RoomId,
        actor: &Actor,
    ) -> LedgerResult<AllocationResult> {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(LedgerError::validation("allocation quantity must be positive"));
        }

        let resource_type = self.require_type(org_room, &request.resource_type_id).await?;
        let effective = self.effective_actor(org_room, actor).await?;
        if !self.evaluator.can_allocate(&resource_type, &effective) {
            info!(
                user = %actor.user_id,
                resource_type = %resource_type.id,
                "Allocation rejected: not an allocator"
            );
            return Ok(AllocationResult::Rejected {
                violations: vec![Violation::new(
                    "permission",
                    "not_allocator",
                    format!("{} may not allocate {}", actor.user_id, resource_type.id),
                )],
            });
        }

        let relation = self.require_relation(org_room, &request.relation_id).await?;
        if relation.resource_type_id != resource_type.id {
            return Err(LedgerError::validation(format!(
                "relation {} is for {}, not {}",
                relation.id, relation.resource_type_id, resource_type.id
            )));
        }

        let inventory = self.get_inventory(org_room, &relation.id).await?;
        let policies = self.list_policies(org_room).await?;
        let existing = self.list_allocations(bridge_room).await?;
        let now = Utc::now();
        let violations = validate_allocation(&AllocationContext {
            resource_type: &resource_type,
            request: &request,
            inventory: inventory.as_ref(),
            role: effective.role.as_deref(),
            policies: &policies,
            existing: &existing,
            now,
        });
        if !violations.is_empty() {
            info!(
                resource_type = %resource_type.id,
                beneficiary = %request.allocated_to,
                violations = violations.len(),
                "Allocation rejected"
            );
            return Ok(AllocationResult::Rejected { violations });
        }

        let expires_at = resource_type.expiry_from(now);
        if resource_type.perishable && expires_at.is_none() {
            return Err(LedgerError::validation(format!(
                "expiry of resource type {} is out of range",
                resource_type.id
            )));
        }

        let allocation = Allocation {
            id: AllocationId::generate(),
            resource_type_id: resource_type.id.clone(),
            relation_id: relation.id.clone(),
            quantity: request.quantity,
            unit: resource_type.unit.clone(),
            allocated_by: actor.user_id.clone(),
            allocated_to: request.allocated_to,
            status: AllocationStatus::Active,
            allocated_at: now,
            expires_at,
            approval: request.approval,
            bridge_room: bridge_room.clone(),
            org_room: Some(org_room.clone()),
            vault_room: Some(vault_room.clone()),
            notes: request.notes,
            updated_at: now,
        };

        self.save(bridge_room, keys::ALLOCATION, allocation.id.as_str(), &allocation)
            .await?;
        let mut records = Vec::new();
        records.extend(
            self.emit(
                bridge_room,
                EoKind::Ins,
                keys::allocation_path(&allocation.id),
                json!({
                    "resource_type": allocation.resource_type_id,
                    "relation": allocation.relation_id,
                    "quantity": allocation.quantity,
                    "unit": allocation.unit,
                    "allocated_to": allocation.allocated_to,
                    "allocated_by": allocation.allocated_by,
                    "expires_at": allocation.expires_at,
                }),
                Frame::given(Visibility::Bridge, bridge_room),
            )
            .await,
        );

        if let Err(err) = self.register_bridge(org_room, bridge_room).await {
            warn!(
                org = %org_room,
                bridge = %bridge_room,
                error = %err,
                "Bridge registration failed"
            );
        }

        let shadow_written = match self
            .write_shadow(vault_room, &allocation, &resource_type)
            .await
        {
            Ok(record) => {
                records.extend(record);
                true
            }
            Err(err) => {
                warn!(
                    allocation = %allocation.id,
                    vault = %vault_room,
                    error = %err,
                    "Vault shadow write failed"
                );
                false
            }
        };

        let inventory_updated = match self
            .record_allocation_in_inventory(org_room, &allocation, resource_type.infinite)
            .await
        {
            Ok(record) => {
                records.extend(record);
                true
            }
            Err(err) => {
                warn!(
                    allocation = %allocation.id,
                    relation = %allocation.relation_id,
                    error = %err,
                    "Inventory update failed"
                );
                false
            }
        };

        info!(
            allocation = %allocation.id,
            resource_type = %allocation.resource_type_id,
            quantity = allocation.quantity,
            shadow_written,
            inventory_updated,
            "Allocated resource"
        );
        Ok(AllocationResult::Granted(AllocationReceipt {
            allocation,
            shadow_written,
            inventory_updated,
            records,
        }))
    }

    pub async fn get_allocation(
        &self,
        bridge_room: &RoomId,
        id: &AllocationId,
    ) -> LedgerResult<Option<Allocation>> {
        self.load(bridge_room, keys::ALLOCATION, id.as_str()).await
    }

    pub async fn list_allocations(&self, bridge_room: &RoomId) -> LedgerResult<Vec<Allocation>> {
        self.load_all(bridge_room, keys::ALLOCATION).await
    }

    pub async fn get_shadow(
        &self,
        vault_room: &RoomId,
        allocation_id: &AllocationId,
    ) -> LedgerResult<Option<VaultShadowRecord>> {
        self.load(vault_room, keys::VAULT_SHADOW, allocation_id.as_str())
            .await
    }

    /// Write the disclosure-safe copy of `allocation` into the vault.
    pub(crate) async fn write_shadow(
        &self,
        vault_room: &RoomId,
        allocation: &Allocation,
        resource_type: &ResourceType,
    ) -> LedgerResult<Option<RecordId>> {
        let shadow = VaultShadowRecord {
            allocation_id: allocation.id.clone(),
            resource_type_id: allocation.resource_type_id.clone(),
            resource_name: resource_type.name.clone(),
            category: resource_type.category,
            quantity: allocation.quantity,
            unit: allocation.unit.clone(),
            status: allocation.status,
            allocated_at: allocation.allocated_at,
            expires_at: allocation.expires_at,
            bridge_room: allocation.bridge_room.clone(),
            mirrored_at: Utc::now(),
        };
        self.save(vault_room, keys::VAULT_SHADOW, allocation.id.as_str(), &shadow)
            .await?;
        Ok(self
            .emit(
                vault_room,
                EoKind::Ins,
                keys::shadow_path(&allocation.id),
                json!({
                    "resource_type": shadow.resource_type_id,
                    "quantity": shadow.quantity,
                    "status": shadow.status,
                    "bridge_room": shadow.bridge_room,
                }),
                Frame::given(Visibility::Vault, vault_room),
            )
            .await)
    }

    async fn record_allocation_in_inventory(
        &self,
        org_room: &RoomId,
        allocation: &Allocation,
        infinite: bool,
    ) -> LedgerResult<Option<RecordId>> {
        let mut inventory: Inventory = self.seed_inventory(org_room, &allocation.relation_id).await?;
        let from_available = inventory.available;
        inventory.allocate(allocation.quantity, infinite);
        self.save_inventory(org_room, &inventory).await?;
        Ok(self
            .emit(
                org_room,
                EoKind::Alt,
                keys::inventory_path(&allocation.relation_id),
                json!({
                    "relation": allocation.relation_id,
                    "allocation": allocation.id,
                    "quantity": allocation.quantity,
                    "from_available": from_available,
                    "available": inventory.available,
                    "allocated": inventory.allocated,
                }),
                Frame::given(Visibility::Org, org_room),
            )
            .await)
    }
}
