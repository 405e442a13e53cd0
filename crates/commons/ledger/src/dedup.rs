//! Cross-organization duplicate detection.
//!
//! Only relations an org has disclosed to the network (opacity CONTRIBUTED or
//! higher) take part. Detection is advisory: it proposes candidates and
//! never merges anything.

use std::collections::BTreeMap;

use chrono::Utc;
use commons_types::{
    Actor, CandidateMember, DedupCandidate, DedupLink, DedupResolution, EoKind, Frame,
    LinkStatus, RelationId, ResourceRelation, ResourceTypeId, RoomId, Visibility,
};
use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

impl ResourceLedger {
    /// Group network-visible relations of every member org by resource type
    /// and report the pairs nobody has resolved yet. Unreadable orgs are skipped.
    pub async fn detect_overlaps(&self, network_room: &RoomId) -> LedgerResult<Vec<DedupCandidate>> {
        let orgs = self.member_orgs(network_room).await?;
        let scans = join_all(orgs.iter().map(|org| self.list_relations(org))).await;

        let mut by_type: BTreeMap<ResourceTypeId, Vec<(RoomId, ResourceRelation)>> = BTreeMap::new();
        for (org, scan) in orgs.iter().zip(scans) {
            let relations = match scan {
                Ok(relations) => relations,
                Err(err) => {
                    warn!(org = %org, error = %err, "Skipping org during overlap scan");
                    continue;
                }
            };
            for relation in relations.into_iter().filter(|r| r.opacity.network_visible()) {
                by_type
                    .entry(relation.resource_type_id.clone())
                    .or_default()
                    .push((org.clone(), relation));
            }
        }

        let mut candidates = Vec::new();
        for (resource_type_id, group) in by_type {
            let mut pairs = Vec::new();
            for (i, (_, a)) in group.iter().enumerate() {
                for (_, b) in &group[i + 1..] {
                    if !pair_resolved(a, b) {
                        pairs.push((a.id.clone(), b.id.clone()));
                    }
                }
            }
            if pairs.is_empty() {
                continue;
            }
            let members = group
                .iter()
                .filter(|(_, r)| pairs.iter().any(|(x, y)| x == &r.id || y == &r.id))
                .map(|(org, r)| CandidateMember {
                    org_room: org.clone(),
                    relation_id: r.id.clone(),
                    relation_type: r.relation_type,
                    opacity: r.opacity,
                    capacity: r.capacity,
                })
                .collect();
            candidates.push(DedupCandidate {
                resource_type_id,
                members,
                unresolved_pairs: pairs,
            });
        }

        info!(
            network = %network_room,
            orgs = orgs.len(),
            candidates = candidates.len(),
            "Overlap scan finished"
        );
        Ok(candidates)
    }

    /// Record a human judgment about how `relation_id` relates to another relation.
    pub async fn resolve_dedup(
        &self,
        org_room: &RoomId,
        relation_id: &RelationId,
        resolution: DedupResolution,
        actor: &Actor,
    ) -> LedgerResult<ResourceRelation> {
        if &resolution.linked_to == relation_id {
            return Err(LedgerError::validation("a relation cannot be linked to itself"));
        }
        let mut relation = self.require_relation(org_room, relation_id).await?;

        let now = Utc::now();
        relation.dedup = Some(DedupLink {
            linked_to: resolution.linked_to.clone(),
            link_type: resolution.link_type,
            link_status: resolution.link_status,
            resolved_by: Some(actor.user_id.clone()),
            resolved_at: Some(now),
        });
        relation.updated_at = now;
        self.save(org_room, keys::RELATION, relation_id.as_str(), &relation)
            .await?;

        let kind = match resolution.link_status {
            LinkStatus::Confirmed => EoKind::Con,
            LinkStatus::AttestedNonAdditive => EoKind::Des,
            LinkStatus::Unresolved => EoKind::Sup,
        };
        self.emit(
            org_room,
            kind,
            keys::dedup_path(relation_id),
            json!({
                "relation": relation_id,
                "linked_to": resolution.linked_to,
                "link_type": resolution.link_type,
                "link_status": resolution.link_status,
                "resolved_by": actor.user_id,
            }),
            Frame::meant(Visibility::Org, org_room),
        )
        .await;

        info!(
            relation = %relation_id,
            linked_to = %resolution.linked_to,
            status = %resolution.link_status,
            "Resolved dedup link"
        );
        Ok(relation)
    }
}

/// Either side carries a settled link pointing at the other.
fn pair_resolved(a: &ResourceRelation, b: &ResourceRelation) -> bool {
    let a_to_b = a.dedup.as_ref().is_some_and(|link| link.resolves(&b.id));
    let b_to_a = b.dedup.as_ref().is_some_and(|link| link.resolves(&a.id));
    a_to_b || b_to_a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, harness, Harness};
    use commons_types::{
        LinkType, Opacity, OpacityChange, RelationDraft, RelationType, ResourceCategory,
        ResourceTypeDraft, ScopeKind,
    };

    async fn org_with_relation(h: &Harness, org: &str, rel: &str, opacity: Opacity) {
        let org = RoomId::new(org);
        h.ledger
            .create_type(
                &org,
                ResourceTypeDraft::new("Shelter Beds", ResourceCategory::Housing, "bed")
                    .with_id(ResourceTypeId::new("beds")),
                ScopeKind::Org,
                &admin(),
            )
            .await
            .unwrap();
        h.ledger
            .establish_relation(
                &org,
                RelationDraft::new(ResourceTypeId::new("beds"), RelationType::Offers)
                    .with_id(RelationId::new(rel))
                    .with_capacity(10.0),
                &admin(),
            )
            .await
            .unwrap();
        if opacity != Opacity::Sovereign {
            h.ledger
                .set_opacity(
                    &org,
                    &RelationId::new(rel),
                    OpacityChange::to(opacity).attested_to(vec![RoomId::new("net")]),
                    &admin(),
                )
                .await
                .unwrap();
        }
        h.ledger.add_member_org(&RoomId::new("net"), &org).await.unwrap();
    }

    #[tokio::test]
    async fn attested_only_relations_are_not_scanned() {
        let h = harness();
        org_with_relation(&h, "org-a", "ra", Opacity::Contributed).await;
        org_with_relation(&h, "org-b", "rb", Opacity::Attested).await;
        let candidates = h.ledger.detect_overlaps(&RoomId::new("net")).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn one_sided_resolution_clears_the_pair() {
        let h = harness();
        org_with_relation(&h, "org-a", "ra", Opacity::Contributed).await;
        org_with_relation(&h, "org-b", "rb", Opacity::Published).await;
        let net = RoomId::new("net");
        assert_eq!(h.ledger.detect_overlaps(&net).await.unwrap().len(), 1);

        h.ledger
            .resolve_dedup(
                &RoomId::new("org-a"),
                &RelationId::new("ra"),
                DedupResolution {
                    linked_to: RelationId::new("rb"),
                    link_type: LinkType::Partnership,
                    link_status: LinkStatus::Confirmed,
                },
                &admin(),
            )
            .await
            .unwrap();
        assert!(h.ledger.detect_overlaps(&net).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolved_link_keeps_the_pair_open() {
        let h = harness();
        org_with_relation(&h, "org-a", "ra", Opacity::Contributed).await;
        org_with_relation(&h, "org-b", "rb", Opacity::Contributed).await;
        let net = RoomId::new("net");

        h.ledger
            .resolve_dedup(
                &RoomId::new("org-b"),
                &RelationId::new("rb"),
                DedupResolution {
                    linked_to: RelationId::new("ra"),
                    link_type: LinkType::Duplicate,
                    link_status: LinkStatus::Unresolved,
                },
                &admin(),
            )
            .await
            .unwrap();
        let candidates = h.ledger.detect_overlaps(&net).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].unresolved_pairs.len(), 1);
    }

    #[tokio::test]
    async fn resolution_kind_follows_link_status() {
        let h = harness();
        org_with_relation(&h, "org-a", "ra", Opacity::Contributed).await;
        let org = RoomId::new("org-a");
        for (status, kind) in [
            (LinkStatus::Confirmed, EoKind::Con),
            (LinkStatus::AttestedNonAdditive, EoKind::Des),
            (LinkStatus::Unresolved, EoKind::Sup),
        ] {
            h.ledger
                .resolve_dedup(
                    &org,
                    &RelationId::new("ra"),
                    DedupResolution {
                        linked_to: RelationId::new("rb"),
                        link_type: LinkType::Duplicate,
                        link_status: status,
                    },
                    &admin(),
                )
                .await
                .unwrap();
            let last = h.log.entries().pop().unwrap();
            assert_eq!(last.operation.kind, kind);
            assert_eq!(last.operation.frame.epistemic, commons_types::Epistemic::Meant);
        }
    }

    #[tokio::test]
    async fn self_link_is_rejected() {
        let h = harness();
        org_with_relation(&h, "org-a", "ra", Opacity::Contributed).await;
        let err = h
            .ledger
            .resolve_dedup(
                &RoomId::new("org-a"),
                &RelationId::new("ra"),
                DedupResolution {
                    linked_to: RelationId::new("ra"),
                    link_type: LinkType::Duplicate,
                    link_status: LinkStatus::Confirmed,
                },
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
