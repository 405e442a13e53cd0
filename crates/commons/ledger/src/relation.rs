//! Relations between holders and resource types, and their disclosure.
//!
//! An opacity change is authoritative on the holder's relation record. The
//! projections it writes into attested rooms are best-effort: a room that
//! cannot be written is listed in [`OpacityReport::failed_rooms`].

use chrono::Utc;
use commons_room::typed;
use commons_types::{
    Actor, EoKind, Frame, Inventory, Opacity, OpacityChange, OpacityDirection, OpacityReport,
    Projection, Provenance, RelationDraft, RelationId, ResourceRelation, RestockMetadata, RoomId,
    Visibility,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

impl ResourceLedger {
    /// Link `holder_room` to a resource type. A stated capacity seeds the
    /// inventory with an initial restock.
    pub async fn establish_relation(
        &self,
        holder_room: &RoomId,
        draft: RelationDraft,
        actor: &Actor,
    ) -> LedgerResult<ResourceRelation> {
        if let Some(capacity) = draft.capacity {
            if !(capacity.is_finite() && capacity >= 0.0) {
                return Err(LedgerError::validation("capacity must be a non-negative number"));
            }
        }
        self.require_type(holder_room, &draft.resource_type_id)
            .await?;

        let id = draft.id.unwrap_or_else(RelationId::generate);
        if self.get_relation(holder_room, &id).await?.is_some() {
            return Err(LedgerError::validation(format!(
                "relation {id} already exists in {holder_room}"
            )));
        }

        let now = Utc::now();
        let relation = ResourceRelation {
            id: id.clone(),
            holder: holder_room.clone(),
            resource_type_id: draft.resource_type_id,
            relation_type: draft.relation_type,
            target: draft.target,
            capacity: draft.capacity,
            available: draft.capacity,
            opacity: Opacity::Sovereign,
            disclosed_fields: draft.disclosed_fields,
            attested_to: Vec::new(),
            pending_withdrawal: Vec::new(),
            dedup: None,
            provenance: Provenance {
                established_by: actor.user_id.clone(),
                established_at: now,
                funding_source: draft.funding_source,
            },
            updated_at: now,
        };

        self.save(holder_room, keys::RELATION, id.as_str(), &relation)
            .await?;
        self.emit(
            holder_room,
            EoKind::Con,
            keys::relation_path(&id),
            json!({
                "holder": holder_room,
                "resource_type": relation.resource_type_id,
                "relation_type": relation.relation_type,
                "capacity": relation.capacity,
                "established_by": actor.user_id,
            }),
            Frame::given(Visibility::Org, holder_room),
        )
        .await;

        if let Some(capacity) = relation.capacity.filter(|c| *c > 0.0) {
            self.restock(holder_room, &id, capacity, RestockMetadata::initial())
                .await?;
        }

        info!(
            holder = %holder_room,
            relation = %id,
            relation_type = %relation.relation_type,
            "Established relation"
        );
        Ok(relation)
    }

    pub async fn get_relation(
        &self,
        holder_room: &RoomId,
        id: &RelationId,
    ) -> LedgerResult<Option<ResourceRelation>> {
        self.load(holder_room, keys::RELATION, id.as_str()).await
    }

    pub(crate) async fn require_relation(
        &self,
        holder_room: &RoomId,
        id: &RelationId,
    ) -> LedgerResult<ResourceRelation> {
        self.get_relation(holder_room, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("relation", format!("{id} in {holder_room}")))
    }

    pub async fn list_relations(&self, holder_room: &RoomId) -> LedgerResult<Vec<ResourceRelation>> {
        self.load_all(holder_room, keys::RELATION).await
    }

    /// Read the projection of `relation_id` held in `attested_room`.
    pub async fn get_projection(
        &self,
        attested_room: &RoomId,
        relation_id: &RelationId,
    ) -> LedgerResult<Option<Projection>> {
        self.load(attested_room, keys::PROJECTION, relation_id.as_str())
            .await
    }

    /// Move a relation to a new opacity level and fan its projection out to,
    /// or withdraw it from, the attested rooms.
    pub async fn set_opacity(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
        change: OpacityChange,
        actor: &Actor,
    ) -> LedgerResult<OpacityReport> {
        let mut relation = self.require_relation(holder_room, relation_id).await?;
        let from = relation.opacity;
        let to = change.opacity;

        let mut attested = change
            .attested_to
            .unwrap_or_else(|| relation.attested_to.clone());
        dedup_rooms(&mut attested);
        if to.projects() && attested.is_empty() {
            return Err(LedgerError::validation(format!(
                "{to} requires at least one attested room"
            )));
        }

        let previously_attested = if from.projects() {
            relation.attested_to.clone()
        } else {
            Vec::new()
        };
        let (keep, mut withdraw): (Vec<RoomId>, Vec<RoomId>) = if to.projects() {
            let dropped = previously_attested
                .into_iter()
                .filter(|room| !attested.contains(room))
                .collect();
            (attested, dropped)
        } else {
            (Vec::new(), previously_attested)
        };
        // Rooms left over from a failed withdrawal are retried unless re-attested.
        for room in std::mem::take(&mut relation.pending_withdrawal) {
            if !keep.contains(&room) && !withdraw.contains(&room) {
                withdraw.push(room);
            }
        }
        let unchanged = from == to && same_rooms(&relation.attested_to, &keep);

        relation.opacity = to;
        relation.attested_to = keep.clone();
        relation.pending_withdrawal = withdraw;
        if let Some(fields) = change.disclosed_fields {
            relation.disclosed_fields = fields;
        }
        relation.updated_at = Utc::now();
        self.save(holder_room, keys::RELATION, relation_id.as_str(), &relation)
            .await?;

        if !unchanged {
            let direction = OpacityDirection::between(from, to);
            self.emit(
                holder_room,
                EoKind::Seg,
                keys::opacity_path(relation_id),
                json!({
                    "relation": relation_id,
                    "fromOpacity": from,
                    "toOpacity": to,
                    "direction": direction,
                    "attestedTo": keep,
                    "changedBy": actor.user_id,
                }),
                Frame::meant(Visibility::Org, holder_room),
            )
            .await;
        }

        let mut report = OpacityReport::default();

        if !keep.is_empty() {
            let inventory = self.inventory_for_projection(holder_room, relation_id).await;
            let projection = Projection {
                relation_id: relation.id.clone(),
                holder: holder_room.clone(),
                resource_type_id: relation.resource_type_id.clone(),
                opacity: to,
                fields: project_fields(&relation, inventory.as_ref()),
                withdrawn: false,
                projected_at: Utc::now(),
                withdrawn_at: None,
            };
            for room in &keep {
                match self
                    .save(room, keys::PROJECTION, relation_id.as_str(), &projection)
                    .await
                {
                    Ok(()) => report.projected_to.push(room.clone()),
                    Err(err) => {
                        warn!(
                            relation = %relation_id,
                            room = %room,
                            error = %err,
                            "Projection write failed"
                        );
                        report.failed_rooms.push(room.clone());
                    }
                }
            }
        }

        self.withdraw_projections(holder_room, &mut relation, from, &mut report)
            .await;

        if to == Opacity::Published && from != Opacity::Published {
            let request = json!({
                "relation": relation_id,
                "resource_type": relation.resource_type_id,
                "requested_by": actor.user_id,
                "requested_at": Utc::now(),
            });
            match typed::append(
                self.store.as_ref(),
                holder_room,
                keys::PUBLICATION_REQUESTED,
                &request,
            )
            .await
            {
                Ok(_) => report.publication_requested = true,
                Err(err) => warn!(
                    relation = %relation_id,
                    error = %err,
                    "Publication request could not be appended"
                ),
            }
        }

        info!(
            relation = %relation_id,
            from = %from,
            to = %to,
            projected = report.projected_to.len(),
            withdrawn = report.withdrawn_from.len(),
            failed = report.failed_rooms.len(),
            "Changed relation opacity"
        );
        Ok(report)
    }

    /// Write tombstones for every room in the relation's `pending_withdrawal`
    /// list. Rooms that fail stay pending on the relation for the next retry.
    pub(crate) async fn withdraw_projections(
        &self,
        holder_room: &RoomId,
        relation: &mut ResourceRelation,
        from: Opacity,
        report: &mut OpacityReport,
    ) {
        if relation.pending_withdrawal.is_empty() {
            return;
        }
        let now = Utc::now();
        let tombstone = Projection {
            relation_id: relation.id.clone(),
            holder: holder_room.clone(),
            resource_type_id: relation.resource_type_id.clone(),
            opacity: relation.opacity,
            fields: Map::new(),
            withdrawn: false,
            projected_at: now,
            withdrawn_at: None,
        }
        .withdraw(now);

        let mut withdrawn = Vec::new();
        let mut still_pending = Vec::new();
        for room in &relation.pending_withdrawal {
            match self
                .save(room, keys::PROJECTION, relation.id.as_str(), &tombstone)
                .await
            {
                Ok(()) => withdrawn.push(room.clone()),
                Err(err) => {
                    warn!(
                        relation = %relation.id,
                        room = %room,
                        error = %err,
                        "Projection tombstone write failed"
                    );
                    still_pending.push(room.clone());
                }
            }
        }

        relation.pending_withdrawal = still_pending.clone();
        if !withdrawn.is_empty() {
            if let Err(err) = self
                .save(holder_room, keys::RELATION, relation.id.as_str(), relation)
                .await
            {
                // The rooms stay pending on the stored record; a retry rewrites the tombstone.
                warn!(relation = %relation.id, error = %err, "Pending withdrawal list not updated");
            }
            self.emit(
                holder_room,
                EoKind::Nul,
                keys::projections_path(&relation.id),
                json!({
                    "relation": relation.id,
                    "rooms": withdrawn,
                    "fromOpacity": from,
                    "toOpacity": relation.opacity,
                }),
                Frame::given(Visibility::Org, holder_room),
            )
            .await;
        }

        report.withdrawn_from.extend(withdrawn);
        report.failed_rooms.extend(still_pending);
    }

    /// Retry tombstones left pending by an earlier opacity change.
    pub async fn retry_withdrawals(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
    ) -> LedgerResult<OpacityReport> {
        let mut relation = self.require_relation(holder_room, relation_id).await?;
        let mut report = OpacityReport::default();
        let opacity = relation.opacity;
        self.withdraw_projections(holder_room, &mut relation, opacity, &mut report)
            .await;
        Ok(report)
    }

    async fn inventory_for_projection(
        &self,
        holder_room: &RoomId,
        relation_id: &RelationId,
    ) -> Option<Inventory> {
        match self.get_inventory(holder_room, relation_id).await {
            Ok(inventory) => inventory,
            Err(err) => {
                warn!(
                    relation = %relation_id,
                    error = %err,
                    "Inventory unreadable; projecting relation capacity"
                );
                None
            }
        }
    }
}

/// The disclosed subset of a relation, with capacity figures taken from live
/// inventory when it exists.
fn project_fields(relation: &ResourceRelation, inventory: Option<&Inventory>) -> Map<String, Value> {
    let mut source = match serde_json::to_value(relation) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(inventory) = inventory {
        source.insert("capacity".into(), json!(inventory.total_capacity));
        source.insert("available".into(), json!(inventory.available));
    }
    relation
        .disclosed_fields
        .iter()
        .filter_map(|field| source.get(field).map(|value| (field.clone(), value.clone())))
        .collect()
}

fn same_rooms(a: &[RoomId], b: &[RoomId]) -> bool {
    a.len() == b.len() && a.iter().all(|room| b.contains(room))
}

fn dedup_rooms(rooms: &mut Vec<RoomId>) {
    let mut seen = Vec::with_capacity(rooms.len());
    rooms.retain(|room| {
        if seen.contains(room) {
            false
        } else {
            seen.push(room.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, harness, Harness};
    use commons_room::RoomStore;
    use commons_types::{
        RelationType, ResourceCategory, ResourceTypeDraft, ResourceTypeId, ScopeKind,
    };

    async fn seeded() -> (Harness, RoomId, ResourceRelation) {
        let h = harness();
        let org = RoomId::new("org-a");
        h.ledger
            .create_type(
                &org,
                ResourceTypeDraft::new("Beds", ResourceCategory::Housing, "bed")
                    .with_id(ResourceTypeId::new("beds")),
                ScopeKind::Org,
                &admin(),
            )
            .await
            .unwrap();
        let relation = h
            .ledger
            .establish_relation(
                &org,
                RelationDraft::new(ResourceTypeId::new("beds"), RelationType::Offers)
                    .with_id(RelationId::new("r1"))
                    .with_capacity(12.0)
                    .disclosing(&["capacity", "available", "relation_type"]),
                &admin(),
            )
            .await
            .unwrap();
        (h, org, relation)
    }

    #[tokio::test]
    async fn establishing_with_capacity_restocks_inventory() {
        let (h, org, relation) = seeded().await;
        assert_eq!(relation.opacity, Opacity::Sovereign);
        let inv = h.ledger.get_inventory(&org, &relation.id).await.unwrap().unwrap();
        assert_eq!(inv.total_capacity, 12.0);
        assert_eq!(inv.available, 12.0);
        assert_eq!(inv.resource_type_id, Some(ResourceTypeId::new("beds")));

        let kinds = h.log.kinds();
        assert_eq!(kinds, vec![EoKind::Des, EoKind::Con, EoKind::Ins]);
        let ins = h.log.entries().pop().unwrap();
        assert_eq!(ins.operation.payload["initial"], json!(true));
    }

    #[tokio::test]
    async fn relation_for_unknown_type_is_not_found() {
        let h = harness();
        let err = h
            .ledger
            .establish_relation(
                &RoomId::new("org-a"),
                RelationDraft::new(ResourceTypeId::new("ghost"), RelationType::Holds),
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn attesting_writes_disclosed_fields_only() {
        let (h, org, relation) = seeded().await;
        let partner = RoomId::new("org-b");
        let report = h
            .ledger
            .set_opacity(
                &org,
                &relation.id,
                OpacityChange::to(Opacity::Attested).attested_to(vec![partner.clone()]),
                &admin(),
            )
            .await
            .unwrap();
        assert_eq!(report.projected_to, vec![partner.clone()]);

        let projection = h
            .ledger
            .get_projection(&partner, &relation.id)
            .await
            .unwrap()
            .unwrap();
        assert!(projection.is_live());
        let keys: Vec<_> = projection.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["available", "capacity", "relation_type"]);
        assert_eq!(projection.fields["capacity"], json!(12.0));

        let seg = h.log.for_target(&keys::opacity_path(&relation.id));
        assert_eq!(seg.len(), 1);
        assert_eq!(seg[0].operation.payload["fromOpacity"], json!("SOVEREIGN"));
        assert_eq!(seg[0].operation.payload["toOpacity"], json!("ATTESTED"));
        assert_eq!(seg[0].operation.payload["direction"], json!("disclosure"));
    }

    #[tokio::test]
    async fn repeating_the_same_level_refreshes_without_a_new_seg() {
        let (h, org, relation) = seeded().await;
        let partner = RoomId::new("org-b");
        let change = OpacityChange::to(Opacity::Attested).attested_to(vec![partner.clone()]);
        h.ledger
            .set_opacity(&org, &relation.id, change.clone(), &admin())
            .await
            .unwrap();
        let report = h
            .ledger
            .set_opacity(&org, &relation.id, change, &admin())
            .await
            .unwrap();
        assert_eq!(report.projected_to, vec![partner]);
        assert_eq!(h.log.for_target(&keys::opacity_path(&relation.id)).len(), 1);
    }

    #[tokio::test]
    async fn attesting_without_rooms_is_rejected() {
        let (h, org, relation) = seeded().await;
        let before = h.log.len();
        let err = h
            .ledger
            .set_opacity(&org, &relation.id, OpacityChange::to(Opacity::Contributed), &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(h.log.len(), before);
    }

    #[tokio::test]
    async fn dropping_a_room_tombstones_it() {
        let (h, org, relation) = seeded().await;
        let b = RoomId::new("org-b");
        let c = RoomId::new("org-c");
        h.ledger
            .set_opacity(
                &org,
                &relation.id,
                OpacityChange::to(Opacity::Attested).attested_to(vec![b.clone(), c.clone()]),
                &admin(),
            )
            .await
            .unwrap();
        let report = h
            .ledger
            .set_opacity(
                &org,
                &relation.id,
                OpacityChange::to(Opacity::Contributed).attested_to(vec![b.clone()]),
                &admin(),
            )
            .await
            .unwrap();
        assert_eq!(report.withdrawn_from, vec![c.clone()]);

        let dropped = h.ledger.get_projection(&c, &relation.id).await.unwrap().unwrap();
        assert!(dropped.withdrawn);
        assert!(dropped.fields.is_empty());
        assert_eq!(h.log.count_kind(EoKind::Nul), 1);
    }

    #[tokio::test]
    async fn publishing_requests_governance_review() {
        let (h, org, relation) = seeded().await;
        let report = h
            .ledger
            .set_opacity(
                &org,
                &relation.id,
                OpacityChange::to(Opacity::Published).attested_to(vec![RoomId::new("net")]),
                &admin(),
            )
            .await
            .unwrap();
        assert!(report.publication_requested);
        let events = h
            .store
            .timeline(&org, Some(keys::PUBLICATION_REQUESTED))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["relation"], json!("r1"));
    }
}
