//! Capacity accounting for relations.

use commons_types::{
    EoKind, Frame, Inventory, LifecycleEvent, RelationId, RestockMetadata, RoomId, Visibility,
};
use serde_json::json;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

impl ResourceLedger {
    /// Add `quantity` units to a relation's inventory, creating the row on
    /// first use.
    pub async fn restock(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
        quantity: f64,
        metadata: RestockMetadata,
    ) -> LedgerResult<Inventory> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(LedgerError::validation("restock quantity must be positive"));
        }

        let mut inventory = self.seed_inventory(holder_room, relation_id).await?;
        inventory.restock(quantity);
        self.save_inventory(holder_room, &inventory).await?;

        self.emit(
            holder_room,
            EoKind::Ins,
            keys::inventory_path(relation_id),
            json!({
                "relation": relation_id,
                "quantity": quantity,
                "total_capacity": inventory.total_capacity,
                "available": inventory.available,
                "initial": metadata.initial,
                "source": metadata.source,
                "note": metadata.note,
            }),
            Frame::given(Visibility::Org, holder_room),
        )
        .await;

        debug!(
            relation = %relation_id,
            quantity,
            available = inventory.available,
            "Restocked inventory"
        );
        Ok(inventory)
    }

    /// Apply a signed correction to capacity and availability. Both clamp at zero.
    pub async fn adjust(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
        delta: f64,
        reason: &str,
    ) -> LedgerResult<Inventory> {
        if !delta.is_finite() {
            return Err(LedgerError::validation("adjustment must be a finite number"));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("adjustment needs a reason"));
        }

        let mut inventory = self.seed_inventory(holder_room, relation_id).await?;
        let from_available = inventory.available;
        inventory.adjust(delta);
        self.save_inventory(holder_room, &inventory).await?;

        self.emit(
            holder_room,
            EoKind::Alt,
            keys::inventory_path(relation_id),
            json!({
                "relation": relation_id,
                "delta": delta,
                "reason": reason,
                "from_available": from_available,
                "total_capacity": inventory.total_capacity,
                "available": inventory.available,
            }),
            Frame::given(Visibility::Org, holder_room),
        )
        .await;
        Ok(inventory)
    }

    pub async fn get_inventory(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
    ) -> LedgerResult<Option<Inventory>> {
        self.load(holder_room, keys::INVENTORY, relation_id.as_str())
            .await
    }

    /// Bookkeeping for a lifecycle transition. Returns `Ok(None)` when the
    /// relation has no inventory row to update.
    pub(crate) async fn apply_lifecycle_to_inventory(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
        event: LifecycleEvent,
        quantity: f64,
        infinite: bool,
    ) -> LedgerResult<Option<Inventory>> {
        let Some(mut inventory) = self.get_inventory(holder_room, relation_id).await? else {
            return Ok(None);
        };
        let from_available = inventory.available;
        inventory.apply_lifecycle(event, quantity, infinite);
        self.save_inventory(holder_room, &inventory).await?;

        self.emit(
            holder_room,
            EoKind::Alt,
            keys::inventory_path(relation_id),
            json!({
                "relation": relation_id,
                "event": event,
                "quantity": quantity,
                "from_available": from_available,
                "available": inventory.available,
                "allocated": inventory.allocated,
            }),
            Frame::given(Visibility::Org, holder_room),
        )
        .await;
        Ok(Some(inventory))
    }

    /// Load the inventory row, or start one. A row missing its resource type
    /// gets it from the relation.
    pub(crate) async fn seed_inventory(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
    ) -> LedgerResult<Inventory> {
        match self.get_inventory(holder_room, relation_id).await? {
            Some(inventory) if inventory.resource_type_id.is_some() => Ok(inventory),
            Some(mut inventory) => {
                if let Some(relation) = self.get_relation(holder_room, relation_id).await? {
                    inventory.resource_type_id = Some(relation.resource_type_id);
                }
                Ok(inventory)
            }
            None => {
                let relation = self.require_relation(holder_room, relation_id).await?;
                Ok(Inventory::new(
                    relation_id.clone(),
                    Some(relation.resource_type_id),
                ))
            }
        }
    }

    pub(crate) async fn save_inventory(
        &self,
        holder_room: &RoomId,
        inventory: &Inventory,
    ) -> LedgerResult<()> {
        self.save(
            holder_room,
            keys::INVENTORY,
            inventory.relation_id.as_str(),
            inventory,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, harness, Harness};
    use commons_types::{
        RelationDraft, RelationType, ResourceCategory, ResourceTypeDraft, ResourceTypeId, ScopeKind,
    };

    async fn with_relation() -> (Harness, RoomId, RelationId) {
        let h = harness();
        let org = RoomId::new("org-a");
        h.ledger
            .create_type(
                &org,
                ResourceTypeDraft::new("Meals", ResourceCategory::Food, "meal")
                    .with_id(ResourceTypeId::new("meals")),
                ScopeKind::Org,
                &admin(),
            )
            .await
            .unwrap();
        let rel = h
            .ledger
            .establish_relation(
                &org,
                RelationDraft::new(ResourceTypeId::new("meals"), RelationType::Offers),
                &admin(),
            )
            .await
            .unwrap();
        (h, org, rel.id)
    }

    #[tokio::test]
    async fn first_restock_creates_row_with_type() {
        let (h, org, rel) = with_relation().await;
        assert!(h.ledger.get_inventory(&org, &rel).await.unwrap().is_none());

        let inv = h
            .ledger
            .restock(&org, &rel, 40.0, RestockMetadata::default())
            .await
            .unwrap();
        assert_eq!(inv.total_capacity, 40.0);
        assert_eq!(inv.resource_type_id, Some(ResourceTypeId::new("meals")));
        assert_eq!(h.log.for_target(&keys::inventory_path(&rel)).len(), 1);
    }

    #[tokio::test]
    async fn non_positive_restock_is_rejected() {
        let (h, org, rel) = with_relation().await;
        for quantity in [0.0, -3.0, f64::NAN] {
            let err = h
                .ledger
                .restock(&org, &rel, quantity, RestockMetadata::default())
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn adjustment_below_zero_clamps() {
        let (h, org, rel) = with_relation().await;
        h.ledger
            .restock(&org, &rel, 5.0, RestockMetadata::default())
            .await
            .unwrap();
        let inv = h.ledger.adjust(&org, &rel, -9.0, "spoiled").await.unwrap();
        assert_eq!(inv.available, 0.0);
        assert_eq!(inv.total_capacity, 0.0);

        let alt = h.log.entries().pop().unwrap();
        assert_eq!(alt.operation.kind, EoKind::Alt);
        assert_eq!(alt.operation.payload["reason"], json!("spoiled"));
    }

    #[tokio::test]
    async fn restock_for_unknown_relation_is_not_found() {
        let h = harness();
        let err = h
            .ledger
            .restock(
                &RoomId::new("org-a"),
                &RelationId::new("nope"),
                1.0,
                RestockMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
