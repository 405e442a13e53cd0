//! Resource type catalog: creation, updates, permissions, and propagation
//! from network scope into member orgs.

use std::collections::BTreeSet;

use chrono::Utc;
use commons_types::{
    Actor, EoKind, Frame, Grant, Maturity, Permissions, PermissionsRecord, PropagationLevel,
    ResourceType, ResourceTypeChanges, ResourceTypeDraft, ResourceTypeId, RoomId, ScopeKind,
    Source, UserId, Visibility,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::LookupCache;
use crate::error::{LedgerError, LedgerResult};
use crate::{keys, scope_visibility, ResourceLedger};

/// What `propagate` did for one org.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "resource_type", rename_all = "snake_case")]
pub enum PropagationOutcome {
    /// Written active.
    Applied(ResourceType),
    /// Written inactive as a draft, awaiting adoption.
    Drafted(ResourceType),
    /// Optional types are not written at all.
    Skipped,
}

/// Result of fanning a network type out to every member org.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PropagationReport {
    pub applied: Vec<RoomId>,
    pub drafted: Vec<RoomId>,
    pub skipped: Vec<RoomId>,
    pub failed: Vec<(RoomId, String)>,
}

impl ResourceLedger {
    /// Define a new resource type in `scope_room`.
    pub async fn create_type(
        &self,
        scope_room: &RoomId,
        draft: ResourceTypeDraft,
        scope: ScopeKind,
        actor: &Actor,
    ) -> LedgerResult<ResourceType> {
        validate_draft(&draft, scope)?;

        let id = draft.id.clone().unwrap_or_else(ResourceTypeId::generate);
        if self.get_type(scope_room, &id).await?.is_some() {
            return Err(LedgerError::validation(format!(
                "resource type {id} already exists in {scope_room}"
            )));
        }

        let now = Utc::now();
        let permissions = self.initial_permissions(scope, &actor.user_id, &draft.permissions);
        let origin_org = draft
            .origin_org
            .clone()
            .or_else(|| (scope == ScopeKind::Org).then(|| scope_room.clone()));

        let resource_type = ResourceType {
            id: id.clone(),
            name: draft.name.trim().to_string(),
            category: draft.category,
            unit: draft.unit.trim().to_string(),
            fungible: draft.fungible,
            perishable: draft.perishable,
            ttl_days: draft.ttl_days,
            infinite: draft.infinite,
            replenishes: draft.replenishes,
            replenish_cycle: draft.replenish_cycle,
            tags: draft.tags,
            source: Source {
                level: scope,
                propagation: draft.propagation,
                origin_org,
                adopted_via: None,
            },
            maturity: draft.maturity.unwrap_or(Maturity::Normative),
            constraints: draft.constraints,
            permissions,
            active: true,
            created_by: actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        };

        self.save(scope_room, keys::RESOURCE_TYPE, id.as_str(), &resource_type)
            .await?;
        self.save_permissions_record(scope_room, &resource_type, &actor.user_id)
            .await?;

        self.emit(
            scope_room,
            EoKind::Des,
            keys::type_path(&id),
            json!({
                "name": resource_type.name,
                "category": resource_type.category,
                "unit": resource_type.unit,
                "scope": scope,
                "propagation": resource_type.source.propagation,
                "created_by": actor.user_id,
            }),
            Frame::meant(scope_visibility(scope), scope_room),
        )
        .await;

        info!(
            room = %scope_room,
            resource_type = %id,
            scope = %scope,
            "Created resource type"
        );
        Ok(resource_type)
    }

    pub async fn get_type(
        &self,
        room: &RoomId,
        id: &ResourceTypeId,
    ) -> LedgerResult<Option<ResourceType>> {
        self.load(room, keys::RESOURCE_TYPE, id.as_str()).await
    }

    pub(crate) async fn require_type(
        &self,
        room: &RoomId,
        id: &ResourceTypeId,
    ) -> LedgerResult<ResourceType> {
        self.get_type(room, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("resource type", format!("{id} in {room}")))
    }

    pub async fn list_types(&self, room: &RoomId) -> LedgerResult<Vec<ResourceType>> {
        self.load_all(room, keys::RESOURCE_TYPE).await
    }

    /// Types in `room` whose name or tags contain `term` (case-insensitive).
    ///
    /// Results are cached per `(room, term)` when a cache is supplied; entries
    /// go stale until their TTL elapses or the caller invalidates them.
    pub async fn search_types(
        &self,
        room: &RoomId,
        term: &str,
        cache: Option<&LookupCache<Vec<ResourceType>>>,
    ) -> LedgerResult<Vec<ResourceType>> {
        let cache_key = format!("{room}:{}", term.trim().to_lowercase());
        if let Some(hit) = cache.and_then(|c| c.get(&cache_key)) {
            debug!(room = %room, term = term, "Type search served from cache");
            return Ok(hit);
        }

        let matches: Vec<ResourceType> = self
            .list_types(room)
            .await?
            .into_iter()
            .filter(|rt| rt.matches_term(term))
            .collect();

        if let Some(cache) = cache {
            cache.insert(cache_key, matches.clone());
        }
        Ok(matches)
    }

    /// Apply field changes. Emits one ALT per top-level field that changed.
    pub async fn update_type(
        &self,
        scope_room: &RoomId,
        id: &ResourceTypeId,
        changes: ResourceTypeChanges,
        actor: &Actor,
    ) -> LedgerResult<ResourceType> {
        let current = self.require_type(scope_room, id).await?;
        let effective = self.effective_actor(scope_room, actor).await?;
        if !self.evaluator.can_control(&current, &effective) {
            return Err(Self::denied(actor, "update", keys::type_path(id)));
        }

        let mut updated = current.clone();
        apply_changes(&mut updated, changes)?;
        validate_shape(
            &updated.name,
            &updated.unit,
            updated.perishable,
            updated.ttl_days,
            updated.replenishes,
            updated.replenish_cycle.is_some(),
        )?;

        let before = serde_json::to_value(&current)?;
        let after = serde_json::to_value(&updated)?;
        let changed = changed_fields(&before, &after);
        if changed.is_empty() {
            debug!(resource_type = %id, "Update changed nothing");
            return Ok(current);
        }

        updated.updated_at = Utc::now();
        self.save(scope_room, keys::RESOURCE_TYPE, id.as_str(), &updated)
            .await?;

        let visibility = scope_visibility(updated.source.level);
        for (field, from, to) in &changed {
            self.emit(
                scope_room,
                EoKind::Alt,
                keys::type_field_path(id, field),
                json!({
                    "field": field,
                    "from": from,
                    "to": to,
                    "changed_by": actor.user_id,
                }),
                Frame::given(visibility, scope_room),
            )
            .await;
        }

        info!(
            resource_type = %id,
            fields = changed.len(),
            "Updated resource type"
        );
        Ok(updated)
    }

    /// Replace the grant sets of a type. Only controllers may do this.
    pub async fn update_permissions(
        &self,
        scope_room: &RoomId,
        id: &ResourceTypeId,
        permissions: Permissions,
        actor: &Actor,
    ) -> LedgerResult<ResourceType> {
        let current = self.require_type(scope_room, id).await?;
        let effective = self.effective_actor(scope_room, actor).await?;
        if !self.evaluator.can_control(&current, &effective) {
            return Err(Self::denied(actor, "change permissions of", keys::type_path(id)));
        }

        let mut next = permissions;
        if next.controllers.is_empty() {
            warn!(
                resource_type = %id,
                "Refusing to leave a type without controllers; granting the admin role"
            );
            next.controllers
                .push(Grant::Role(self.config.catalog.admin_role.clone()));
        }
        if next == current.permissions {
            return Ok(current);
        }

        let mut updated = current.clone();
        updated.permissions = next;
        updated.updated_at = Utc::now();
        self.save(scope_room, keys::RESOURCE_TYPE, id.as_str(), &updated)
            .await?;
        self.save_permissions_record(scope_room, &updated, &actor.user_id)
            .await?;

        self.emit(
            scope_room,
            EoKind::Alt,
            keys::permissions_path(id),
            json!({
                "from": current.permissions,
                "to": updated.permissions,
                "changed_by": actor.user_id,
            }),
            Frame::meant(scope_visibility(updated.source.level), scope_room),
        )
        .await;
        Ok(updated)
    }

    pub async fn get_permissions(
        &self,
        room: &RoomId,
        id: &ResourceTypeId,
    ) -> LedgerResult<Option<PermissionsRecord>> {
        self.load(room, keys::PERMISSIONS, id.as_str()).await
    }

    /// Copy a network type into one member org according to its propagation level.
    pub async fn propagate(
        &self,
        network_room: &RoomId,
        org_room: &RoomId,
        id: &ResourceTypeId,
        actor: &Actor,
    ) -> LedgerResult<PropagationOutcome> {
        let network_type = self.require_type(network_room, id).await?;
        let level = propagation_level(&network_type)?;

        let copy = match level {
            PropagationLevel::Optional => {
                debug!(resource_type = %id, org = %org_room, "Optional type not propagated");
                return Ok(PropagationOutcome::Skipped);
            }
            PropagationLevel::Required | PropagationLevel::Standard => {
                org_copy(&network_type, true, network_type.maturity)
            }
            PropagationLevel::Recommended => {
                // An org that already adopted the type keeps it active.
                let adopted = self
                    .get_type(org_room, id)
                    .await?
                    .is_some_and(|existing| existing.active);
                if adopted {
                    org_copy(&network_type, true, network_type.maturity)
                } else {
                    org_copy(&network_type, false, Maturity::Draft)
                }
            }
        };

        self.save(org_room, keys::RESOURCE_TYPE, id.as_str(), &copy)
            .await?;
        self.emit_propagation(network_room, org_room, &copy, level, false, actor)
            .await;

        info!(
            resource_type = %id,
            org = %org_room,
            level = %level,
            active = copy.active,
            "Propagated resource type"
        );
        Ok(if copy.active {
            PropagationOutcome::Applied(copy)
        } else {
            PropagationOutcome::Drafted(copy)
        })
    }

    /// Activate a network type in an org regardless of its propagation level.
    /// Only the org's admin role may adopt.
    pub async fn adopt(
        &self,
        network_room: &RoomId,
        org_room: &RoomId,
        id: &ResourceTypeId,
        actor: &Actor,
    ) -> LedgerResult<ResourceType> {
        let network_type = self.require_type(network_room, id).await?;
        let level = propagation_level(&network_type)?;

        let effective = self.effective_actor(org_room, actor).await?;
        if effective.role.as_deref() != Some(self.config.catalog.admin_role.as_str()) {
            return Err(Self::denied(actor, "adopt", keys::propagation_path(id, org_room)));
        }

        let maturity = match network_type.maturity {
            Maturity::Draft => Maturity::Normative,
            other => other,
        };
        let copy = org_copy(&network_type, true, maturity);
        self.save(org_room, keys::RESOURCE_TYPE, id.as_str(), &copy)
            .await?;
        self.emit_propagation(network_room, org_room, &copy, level, true, actor)
            .await;

        info!(resource_type = %id, org = %org_room, "Adopted network resource type");
        Ok(copy)
    }

    /// Propagate a network type to every member org of `network_room`.
    /// A failure for one org is recorded and does not stop the others.
    pub async fn propagate_to_members(
        &self,
        network_room: &RoomId,
        id: &ResourceTypeId,
        actor: &Actor,
    ) -> LedgerResult<PropagationReport> {
        // Fail fast on a missing or non-network type.
        let network_type = self.require_type(network_room, id).await?;
        propagation_level(&network_type)?;

        let mut report = PropagationReport::default();
        for org in self.member_orgs(network_room).await? {
            match self.propagate(network_room, &org, id, actor).await {
                Ok(PropagationOutcome::Applied(_)) => report.applied.push(org),
                Ok(PropagationOutcome::Drafted(_)) => report.drafted.push(org),
                Ok(PropagationOutcome::Skipped) => report.skipped.push(org),
                Err(err) => {
                    warn!(
                        resource_type = %id,
                        org = %org,
                        error = %err,
                        "Propagation to member org failed"
                    );
                    report.failed.push((org, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn emit_propagation(
        &self,
        network_room: &RoomId,
        org_room: &RoomId,
        copy: &ResourceType,
        level: PropagationLevel,
        adopted: bool,
        actor: &Actor,
    ) {
        self.emit(
            org_room,
            EoKind::Con,
            keys::propagation_path(&copy.id, org_room),
            json!({
                "resource_type": copy.id,
                "from": network_room,
                "to": org_room,
                "level": level,
                "active": copy.active,
                "adopted": adopted,
                "by": actor.user_id,
            }),
            Frame::given(Visibility::Org, org_room),
        )
        .await;
    }

    async fn save_permissions_record(
        &self,
        room: &RoomId,
        resource_type: &ResourceType,
        by: &UserId,
    ) -> LedgerResult<()> {
        let record = PermissionsRecord {
            resource_type_id: resource_type.id.clone(),
            permissions: resource_type.permissions.clone(),
            updated_by: by.clone(),
            updated_at: resource_type.updated_at,
        };
        self.save(room, keys::PERMISSIONS, resource_type.id.as_str(), &record)
            .await
    }

    fn initial_permissions(
        &self,
        scope: ScopeKind,
        creator: &UserId,
        requested: &Permissions,
    ) -> Permissions {
        let catalog = &self.config.catalog;
        let roles = |names: &[String]| names.iter().cloned().map(Grant::Role).collect::<Vec<_>>();
        let controllers = vec![Grant::User(creator.clone()), Grant::Role(catalog.admin_role.clone())];

        match scope {
            ScopeKind::Individual => Permissions::sole_owner(creator),
            ScopeKind::Org => Permissions {
                controllers,
                allocators: roles(&catalog.org_allocator_roles),
                viewers: roles(&catalog.org_viewer_roles),
            }
            .merged(requested),
            ScopeKind::Network => Permissions {
                controllers,
                allocators: Vec::new(),
                viewers: roles(&catalog.network_viewer_roles),
            }
            .merged(requested),
        }
    }
}

fn validate_draft(draft: &ResourceTypeDraft, scope: ScopeKind) -> LedgerResult<()> {
    validate_shape(
        &draft.name,
        &draft.unit,
        draft.perishable,
        draft.ttl_days,
        draft.replenishes,
        draft.replenish_cycle.is_some(),
    )?;
    match (scope, draft.propagation) {
        (ScopeKind::Network, None) => Err(LedgerError::validation(
            "network-scope types must declare a propagation level",
        )),
        (ScopeKind::Org | ScopeKind::Individual, Some(_)) => Err(LedgerError::validation(
            "only network-scope types propagate",
        )),
        _ => Ok(()),
    }?;
    if let Some(max) = draft.constraints.max_per_allocation {
        if !(max.is_finite() && max > 0.0) {
            return Err(LedgerError::validation(
                "max_per_allocation must be a positive number",
            ));
        }
    }
    Ok(())
}

/// Upper bound for `ttl_days`; keeps expiry arithmetic in range.
pub const MAX_TTL_DAYS: u32 = 36_500;

fn validate_shape(
    name: &str,
    unit: &str,
    perishable: bool,
    ttl_days: Option<u32>,
    replenishes: bool,
    has_cycle: bool,
) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("resource type name must not be empty"));
    }
    if unit.trim().is_empty() {
        return Err(LedgerError::validation("resource type unit must not be empty"));
    }
    if perishable && !ttl_days.is_some_and(|days| days > 0) {
        return Err(LedgerError::validation(
            "perishable types need a positive ttl_days",
        ));
    }
    if ttl_days.is_some_and(|days| days > MAX_TTL_DAYS) {
        return Err(LedgerError::validation(format!(
            "ttl_days must not exceed {MAX_TTL_DAYS}"
        )));
    }
    if replenishes && !has_cycle {
        return Err(LedgerError::validation(
            "replenishing types need a replenish_cycle",
        ));
    }
    Ok(())
}

fn apply_changes(rt: &mut ResourceType, changes: ResourceTypeChanges) -> LedgerResult<()> {
    if let Some(level) = changes.propagation {
        if rt.source.propagation != Some(level) {
            if rt.source.level != ScopeKind::Network {
                return Err(LedgerError::validation(
                    "only network-scope types carry a propagation level",
                ));
            }
            let reference = changes
                .adopted_via
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    LedgerError::validation("changing propagation requires an adopted_via reference")
                })?;
            rt.source.propagation = Some(level);
            rt.source.adopted_via = Some(reference);
        }
    }

    if let Some(name) = changes.name {
        rt.name = name.trim().to_string();
    }
    if let Some(category) = changes.category {
        rt.category = category;
    }
    if let Some(unit) = changes.unit {
        rt.unit = unit.trim().to_string();
    }
    if let Some(fungible) = changes.fungible {
        rt.fungible = fungible;
    }
    if let Some(perishable) = changes.perishable {
        rt.perishable = perishable;
    }
    if let Some(ttl) = changes.ttl_days {
        rt.ttl_days = Some(ttl);
    }
    if let Some(infinite) = changes.infinite {
        rt.infinite = infinite;
    }
    if let Some(replenishes) = changes.replenishes {
        rt.replenishes = replenishes;
    }
    if let Some(cycle) = changes.replenish_cycle {
        rt.replenish_cycle = Some(cycle);
    }
    if let Some(tags) = changes.tags {
        rt.tags = tags;
    }
    if let Some(maturity) = changes.maturity {
        rt.maturity = maturity;
    }
    if let Some(constraints) = changes.constraints {
        rt.constraints = constraints;
    }
    Ok(())
}

/// Top-level fields whose serialized value differs, as `(field, from, to)`.
fn changed_fields(before: &Value, after: &Value) -> Vec<(String, Value, Value)> {
    let (Value::Object(before), Value::Object(after)) = (before, after) else {
        return Vec::new();
    };
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|key| key.as_str() != "updated_at")
        .filter_map(|key| {
            let from = before.get(key).cloned().unwrap_or(Value::Null);
            let to = after.get(key).cloned().unwrap_or(Value::Null);
            (from != to).then(|| (key.clone(), from, to))
        })
        .collect()
}

fn propagation_level(rt: &ResourceType) -> LedgerResult<PropagationLevel> {
    if rt.source.level != ScopeKind::Network {
        return Err(LedgerError::validation(format!(
            "resource type {} is not network-scope",
            rt.id
        )));
    }
    rt.source.propagation.ok_or_else(|| {
        LedgerError::validation(format!("resource type {} has no propagation level", rt.id))
    })
}

fn org_copy(network_type: &ResourceType, active: bool, maturity: Maturity) -> ResourceType {
    let mut copy = network_type.clone();
    copy.active = active;
    copy.maturity = maturity;
    copy.updated_at = Utc::now();
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, harness};
    use commons_types::{ResourceCategory, ResourceConstraints};

    fn bus_passes() -> ResourceTypeDraft {
        ResourceTypeDraft::new("Bus Passes", ResourceCategory::Transportation, "pass")
            .with_id(ResourceTypeId::new("bus"))
            .fungible()
            .with_tag("transit")
    }

    #[tokio::test]
    async fn org_type_gets_default_grants_and_a_des_record() {
        let h = harness();
        let org = RoomId::new("org-a");
        let rt = h
            .ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();

        assert!(rt.permissions.controllers.contains(&Grant::user("alice")));
        assert!(rt.permissions.controllers.contains(&Grant::role("admin")));
        assert!(rt.permissions.allocators.contains(&Grant::role("case_worker")));
        assert!(rt.permissions.viewers.contains(&Grant::role("member")));
        assert_eq!(rt.source.origin_org, Some(org.clone()));

        assert_eq!(h.log.kinds(), vec![EoKind::Des]);
        let mirror = h.ledger.get_permissions(&org, &rt.id).await.unwrap().unwrap();
        assert_eq!(mirror.permissions, rt.permissions);
    }

    #[tokio::test]
    async fn individual_type_is_private_to_its_creator() {
        let h = harness();
        let room = RoomId::new("alice-personal");
        let rt = h
            .ledger
            .create_type(&room, bus_passes(), ScopeKind::Individual, &admin())
            .await
            .unwrap();
        assert_eq!(rt.permissions, Permissions::sole_owner(&UserId::new("alice")));
    }

    #[tokio::test]
    async fn network_type_requires_propagation_level() {
        let h = harness();
        let err = h
            .ledger
            .create_type(&RoomId::new("net"), bus_passes(), ScopeKind::Network, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(h.log.is_empty());
    }

    #[tokio::test]
    async fn perishable_without_ttl_is_rejected() {
        let h = harness();
        let mut draft = bus_passes();
        draft.perishable = true;
        let err = h
            .ledger
            .create_type(&RoomId::new("org-a"), draft, ScopeKind::Org, &admin())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn ttl_beyond_the_bound_is_rejected() {
        let h = harness();
        let draft = bus_passes().perishable(u32::MAX);
        let err = h
            .ledger
            .create_type(&RoomId::new("org-a"), draft, ScopeKind::Org, &admin())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(h.log.is_empty());

        h.ledger
            .create_type(
                &RoomId::new("org-a"),
                bus_passes().perishable(MAX_TTL_DAYS),
                ScopeKind::Org,
                &admin(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let h = harness();
        let org = RoomId::new("org-a");
        h.ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();
        let err = h
            .ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn update_emits_one_alt_per_changed_field() {
        let h = harness();
        let org = RoomId::new("org-a");
        let rt = h
            .ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();

        let changes = ResourceTypeChanges {
            name: Some("Monthly Bus Passes".into()),
            unit: Some("pass".into()),
            constraints: Some(ResourceConstraints {
                max_per_allocation: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let updated = h
            .ledger
            .update_type(&org, &rt.id, changes, &admin())
            .await
            .unwrap();

        assert_eq!(updated.name, "Monthly Bus Passes");
        let alts = h.log.for_target("resource.type.bus.");
        assert_eq!(alts.len(), 2);
        assert!(alts.iter().all(|e| e.operation.kind == EoKind::Alt));
        let targets: Vec<_> = alts.iter().map(|e| e.operation.target.as_str()).collect();
        assert!(targets.contains(&"resource.type.bus.name"));
        assert!(targets.contains(&"resource.type.bus.constraints"));
    }

    #[tokio::test]
    async fn update_by_non_controller_is_denied() {
        let h = harness();
        let org = RoomId::new("org-a");
        let rt = h
            .ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();
        let worker = Actor::user("bob").with_role("case_worker");
        let err = h
            .ledger
            .update_type(
                &org,
                &rt.id,
                ResourceTypeChanges {
                    name: Some("x".into()),
                    ..Default::default()
                },
                &worker,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn propagation_change_requires_governance_reference() {
        let h = harness();
        let net = RoomId::new("net");
        let rt = h
            .ledger
            .create_type(
                &net,
                bus_passes().with_propagation(PropagationLevel::Optional),
                ScopeKind::Network,
                &admin(),
            )
            .await
            .unwrap();

        let err = h
            .ledger
            .update_type(
                &net,
                &rt.id,
                ResourceTypeChanges {
                    propagation: Some(PropagationLevel::Required),
                    ..Default::default()
                },
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let updated = h
            .ledger
            .update_type(
                &net,
                &rt.id,
                ResourceTypeChanges {
                    propagation: Some(PropagationLevel::Required),
                    adopted_via: Some("proposal-17".into()),
                    ..Default::default()
                },
                &admin(),
            )
            .await
            .unwrap();
        assert_eq!(updated.source.propagation, Some(PropagationLevel::Required));
        assert_eq!(updated.source.adopted_via.as_deref(), Some("proposal-17"));
    }

    #[tokio::test]
    async fn emptying_controllers_falls_back_to_admin_role() {
        let h = harness();
        let org = RoomId::new("org-a");
        let rt = h
            .ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();
        let updated = h
            .ledger
            .update_permissions(&org, &rt.id, Permissions::default(), &admin())
            .await
            .unwrap();
        assert_eq!(updated.permissions.controllers, vec![Grant::role("admin")]);
        assert_eq!(h.log.for_target(&keys::permissions_path(&rt.id)).len(), 1);
    }

    #[tokio::test]
    async fn propagation_levels_decide_org_copy() {
        let h = harness();
        let net = RoomId::new("net");
        let org = RoomId::new("org-a");
        for (id, level) in [
            ("req", PropagationLevel::Required),
            ("rec", PropagationLevel::Recommended),
            ("opt", PropagationLevel::Optional),
        ] {
            h.ledger
                .create_type(
                    &net,
                    bus_passes()
                        .with_id(ResourceTypeId::new(id))
                        .with_propagation(level),
                    ScopeKind::Network,
                    &admin(),
                )
                .await
                .unwrap();
        }

        let req = h
            .ledger
            .propagate(&net, &org, &ResourceTypeId::new("req"), &admin())
            .await
            .unwrap();
        assert!(matches!(req, PropagationOutcome::Applied(ref rt) if rt.active));

        let rec = h
            .ledger
            .propagate(&net, &org, &ResourceTypeId::new("rec"), &admin())
            .await
            .unwrap();
        assert!(
            matches!(rec, PropagationOutcome::Drafted(ref rt) if !rt.active && rt.maturity == Maturity::Draft)
        );

        let before = h.log.len();
        let opt = h
            .ledger
            .propagate(&net, &org, &ResourceTypeId::new("opt"), &admin())
            .await
            .unwrap();
        assert!(matches!(opt, PropagationOutcome::Skipped));
        assert_eq!(h.log.len(), before);
        assert!(h
            .ledger
            .get_type(&org, &ResourceTypeId::new("opt"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn adopted_recommended_type_stays_active_on_repropagation() {
        let h = harness();
        let net = RoomId::new("net");
        let org = RoomId::new("org-a");
        let id = ResourceTypeId::new("bus");
        h.ledger
            .create_type(
                &net,
                bus_passes().with_propagation(PropagationLevel::Recommended),
                ScopeKind::Network,
                &admin(),
            )
            .await
            .unwrap();

        let adopted = h.ledger.adopt(&net, &org, &id, &admin()).await.unwrap();
        assert!(adopted.active);
        let last = h.log.entries().pop().unwrap();
        assert_eq!(last.operation.kind, EoKind::Con);
        assert_eq!(last.operation.payload["adopted"], json!(true));

        let again = h.ledger.propagate(&net, &org, &id, &admin()).await.unwrap();
        assert!(matches!(again, PropagationOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn adopt_requires_org_admin() {
        let h = harness();
        let net = RoomId::new("net");
        h.ledger
            .create_type(
                &net,
                bus_passes().with_propagation(PropagationLevel::Optional),
                ScopeKind::Network,
                &admin(),
            )
            .await
            .unwrap();
        let err = h
            .ledger
            .adopt(
                &net,
                &RoomId::new("org-a"),
                &ResourceTypeId::new("bus"),
                &Actor::user("bob").with_role("member"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn search_uses_the_supplied_cache() {
        let h = harness();
        let org = RoomId::new("org-a");
        h.ledger
            .create_type(&org, bus_passes(), ScopeKind::Org, &admin())
            .await
            .unwrap();
        let cache = LookupCache::new(8, std::time::Duration::from_secs(60));

        let found = h.ledger.search_types(&org, "TRANSIT", Some(&cache)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(cache.len(), 1);

        h.ledger
            .create_type(
                &org,
                ResourceTypeDraft::new("Transit Tokens", ResourceCategory::Transportation, "token"),
                ScopeKind::Org,
                &admin(),
            )
            .await
            .unwrap();
        let cached = h.ledger.search_types(&org, "transit", Some(&cache)).await.unwrap();
        assert_eq!(cached.len(), 1);
        let fresh = h.ledger.search_types(&org, "transit", None).await.unwrap();
        assert_eq!(fresh.len(), 2);
    }
}
