//! Cross-organization duplicate links and candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::closed::closed_set;
use crate::ids::{RelationId, ResourceTypeId, RoomId, UserId};
use crate::relation::{Opacity, RelationType};

closed_set! {
    /// How two relations are judged to relate.
    LinkType = "link type" {
        /// Same underlying capacity recorded twice.
        Duplicate => "duplicate",
        /// Partially shared capacity.
        Overlap => "overlap",
        /// Distinct capacity delivered jointly.
        Partnership => "partnership",
        /// Unrelated despite sharing a resource type.
        Distinct => "distinct",
    }
}

closed_set! {
    LinkStatus = "link status" {
        Confirmed => "confirmed",
        AttestedNonAdditive => "attested_non_additive",
        Unresolved => "unresolved",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupLink {
    pub linked_to: RelationId,
    pub link_type: LinkType,
    pub link_status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DedupLink {
    /// A link to `other` that a human has settled one way or another.
    pub fn resolves(&self, other: &RelationId) -> bool {
        &self.linked_to == other && self.link_status != LinkStatus::Unresolved
    }
}

/// A human judgment passed to `resolve_dedup`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupResolution {
    pub linked_to: RelationId,
    pub link_type: LinkType,
    pub link_status: LinkStatus,
}

/// One relation inside a candidate cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateMember {
    pub org_room: RoomId,
    pub relation_id: RelationId,
    pub relation_type: RelationType,
    pub opacity: Opacity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
}

/// Computed, never stored: relations sharing a resource type with at least
/// one pair not yet mutually resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub resource_type_id: ResourceTypeId,
    pub members: Vec<CandidateMember>,
    pub unresolved_pairs: Vec<(RelationId, RelationId)>,
}
