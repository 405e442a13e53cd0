//! Record comparison and merge audit types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::closed::closed_set;
use crate::ids::{MergeId, RecordId, RoomId, UserId};

closed_set! {
    MergeStrategy = "merge strategy" {
        Newest => "newest",
        SourceA => "source_a",
        SourceB => "source_b",
        Manual => "manual",
    }
}

/// Address of a keyed state record in some room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub room: RoomId,
    pub event_type: String,
    pub key: String,
}

impl RecordRef {
    pub fn new(room: RoomId, event_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            room,
            event_type: event_type.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.room, self.event_type, self.key)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FieldValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            updated_at: None,
        }
    }

    pub fn at(value: Value, updated_at: DateTime<Utc>) -> Self {
        Self {
            value,
            updated_at: Some(updated_at),
        }
    }
}

/// One side of a merge: where it lives plus its field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub reference: RecordRef,
    pub fields: BTreeMap<String, FieldValue>,
}

impl MergeRecord {
    pub fn new(reference: RecordRef) -> Self {
        Self {
            reference,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

closed_set! {
    FieldStatus = "field status" {
        Conflict => "conflict",
        Match => "match",
        OnlyA => "only_a",
        OnlyB => "only_b",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldComparison {
    pub key: String,
    pub status: FieldStatus,
    pub from_a: Option<Value>,
    pub from_b: Option<Value>,
    pub updated_a: Option<DateTime<Utc>>,
    pub updated_b: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordComparison {
    pub source_a: RecordRef,
    pub source_b: RecordRef,
    pub fields: Vec<FieldComparison>,
}

impl RecordComparison {
    pub fn conflicts(&self) -> impl Iterator<Item = &FieldComparison> {
        self.fields
            .iter()
            .filter(|field| field.status == FieldStatus::Conflict)
    }
}

closed_set! {
    ResolutionSource = "resolution source" {
        SourceA => "source_a",
        SourceB => "source_b",
        Both => "both",
        Manual => "manual",
        Unresolved => "unresolved",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldResolution {
    pub key: String,
    pub from_a: Option<Value>,
    pub from_b: Option<Value>,
    pub resolved: Option<Value>,
    pub source: ResolutionSource,
}

impl FieldResolution {
    pub fn is_resolved(&self) -> bool {
        self.source != ResolutionSource::Unresolved && self.resolved.is_some()
    }
}

/// Persisted once per executed merge; never updated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeAudit {
    pub merge_id: MergeId,
    pub source_a: RecordRef,
    pub source_b: RecordRef,
    pub target: RecordRef,
    pub strategy: MergeStrategy,
    pub effective_date: DateTime<Utc>,
    pub fields: Vec<FieldResolution>,
    pub altered_fields: Vec<String>,
    /// EO records emitted by the merge, in emission order.
    pub records: Vec<RecordId>,
    pub completed_by: UserId,
    pub completed_at: DateTime<Utc>,
}
