//! Resource relations, opacity, and disclosure projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::closed::closed_set;
use crate::dedup::DedupLink;
use crate::ids::{RelationId, ResourceTypeId, RoomId, UserId};

closed_set! {
    /// How a holder stands toward a resource type.
    RelationType = "relation type" {
        Offers => "offers",
        Holds => "holds",
        Manages => "manages",
        Funds => "funds",
        Brokers => "brokers",
        Needs => "needs",
        Receives => "receives",
    }
}

closed_set! {
    /// Disclosure level of a relation. Declaration order is the ordinal order.
    Opacity = "opacity" {
        Sovereign => "SOVEREIGN",
        Attested => "ATTESTED",
        Contributed => "CONTRIBUTED",
        Published => "PUBLISHED",
    }
}

impl Opacity {
    pub fn ordinal(&self) -> u8 {
        match self {
            Opacity::Sovereign => 0,
            Opacity::Attested => 1,
            Opacity::Contributed => 2,
            Opacity::Published => 3,
        }
    }

    /// Whether this level writes projections into attested rooms.
    pub fn projects(&self) -> bool {
        *self >= Opacity::Attested
    }

    /// Whether this level is visible to network-wide dedup scanning.
    pub fn network_visible(&self) -> bool {
        *self >= Opacity::Contributed
    }
}

impl Default for Opacity {
    fn default() -> Self {
        Opacity::Sovereign
    }
}

closed_set! {
    OpacityDirection = "opacity direction" {
        Disclosure => "disclosure",
        Withdrawal => "withdrawal",
    }
}

impl OpacityDirection {
    pub fn between(from: Opacity, to: Opacity) -> Self {
        if to < from {
            OpacityDirection::Withdrawal
        } else {
            OpacityDirection::Disclosure
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub established_by: UserId,
    pub established_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_source: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRelation {
    pub id: RelationId,
    /// Room of the org or individual holding the relation.
    pub holder: RoomId,
    pub resource_type_id: ResourceTypeId,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<f64>,
    #[serde(default)]
    pub opacity: Opacity,
    #[serde(default)]
    pub disclosed_fields: Vec<String>,
    #[serde(default)]
    pub attested_to: Vec<RoomId>,
    /// Rooms that still hold a live projection after a failed tombstone write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_withdrawal: Vec<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup: Option<DedupLink>,
    pub provenance: Provenance,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied data for `establish_relation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationDraft {
    #[serde(default)]
    pub id: Option<RelationId>,
    pub resource_type_id: ResourceTypeId,
    pub relation_type: RelationType,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub disclosed_fields: Vec<String>,
    #[serde(default)]
    pub funding_source: Option<String>,
}

impl RelationDraft {
    pub fn new(resource_type_id: ResourceTypeId, relation_type: RelationType) -> Self {
        Self {
            id: None,
            resource_type_id,
            relation_type,
            target: None,
            capacity: None,
            disclosed_fields: Vec::new(),
            funding_source: None,
        }
    }

    pub fn with_id(mut self, id: RelationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn disclosing(mut self, fields: &[&str]) -> Self {
        self.disclosed_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn funded_by(mut self, source: impl Into<String>) -> Self {
        self.funding_source = Some(source.into());
        self
    }
}

/// Requested opacity change. `None` keeps the relation's current list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpacityChange {
    pub opacity: Opacity,
    #[serde(default)]
    pub attested_to: Option<Vec<RoomId>>,
    #[serde(default)]
    pub disclosed_fields: Option<Vec<String>>,
}

impl OpacityChange {
    pub fn to(opacity: Opacity) -> Self {
        Self {
            opacity,
            attested_to: None,
            disclosed_fields: None,
        }
    }

    pub fn attested_to(mut self, rooms: Vec<RoomId>) -> Self {
        self.attested_to = Some(rooms);
        self
    }

    pub fn disclosing(mut self, fields: Vec<String>) -> Self {
        self.disclosed_fields = Some(fields);
        self
    }
}

/// Disclosure copy of a relation written into an attested room.
///
/// A withdrawn projection keeps its key and carries `_withdrawn: true` with an
/// empty field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub relation_id: RelationId,
    pub holder: RoomId,
    pub resource_type_id: ResourceTypeId,
    pub opacity: Opacity,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(rename = "_withdrawn", default)]
    pub withdrawn: bool,
    pub projected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl Projection {
    pub fn is_live(&self) -> bool {
        !self.withdrawn
    }

    pub fn withdraw(mut self, at: DateTime<Utc>) -> Self {
        self.withdrawn = true;
        self.fields = Map::new();
        self.withdrawn_at = Some(at);
        self
    }
}

/// What an opacity change did.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpacityReport {
    pub projected_to: Vec<RoomId>,
    pub withdrawn_from: Vec<RoomId>,
    /// Rooms whose projection or tombstone write failed.
    pub failed_rooms: Vec<RoomId>,
    pub publication_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opacity_is_ordered_by_disclosure() {
        assert!(Opacity::Sovereign < Opacity::Attested);
        assert!(Opacity::Attested < Opacity::Contributed);
        assert!(Opacity::Contributed < Opacity::Published);
        assert_eq!(Opacity::Published.ordinal(), 3);
        assert!(!Opacity::Sovereign.projects());
        assert!(Opacity::Published.projects());
        assert!(!Opacity::Attested.network_visible());
        assert!(Opacity::Contributed.network_visible());
    }

    #[test]
    fn opacity_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(Opacity::Contributed).unwrap(),
            serde_json::json!("CONTRIBUTED")
        );
    }

    #[test]
    fn direction_between_levels() {
        assert_eq!(
            OpacityDirection::between(Opacity::Attested, Opacity::Sovereign),
            OpacityDirection::Withdrawal
        );
        assert_eq!(
            OpacityDirection::between(Opacity::Sovereign, Opacity::Published),
            OpacityDirection::Disclosure
        );
    }

    #[test]
    fn withdrawn_projection_carries_marker() {
        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("capacity".into(), serde_json::json!(10.0));
        let projection = Projection {
            relation_id: RelationId::new("r1"),
            holder: RoomId::new("org-a"),
            resource_type_id: ResourceTypeId::new("t1"),
            opacity: Opacity::Attested,
            fields,
            withdrawn: false,
            projected_at: now,
            withdrawn_at: None,
        }
        .withdraw(now);
        let json = serde_json::to_value(&projection).unwrap();
        assert_eq!(json["_withdrawn"], serde_json::json!(true));
        assert!(json["fields"].as_object().unwrap().is_empty());
        assert!(!projection.is_live());
    }
}
