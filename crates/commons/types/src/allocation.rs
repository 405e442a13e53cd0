//! Allocations, their lifecycle, and the beneficiary's vault shadow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ResourceCategory;
use crate::closed::closed_set;
use crate::ids::{AllocationId, RelationId, ResourceTypeId, RoomId, UserId};

closed_set! {
    AllocationStatus = "allocation status" {
        Active => "active",
        Consumed => "consumed",
        Expired => "expired",
        Revoked => "revoked",
        Returned => "returned",
    }
}

impl AllocationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, AllocationStatus::Active)
    }
}

closed_set! {
    /// Lifecycle events applied to an active allocation.
    LifecycleEvent = "lifecycle event" {
        Consumed => "consumed",
        Expired => "expired",
        Revoked => "revoked",
        Returned => "returned",
    }
}

impl LifecycleEvent {
    pub fn target_status(&self) -> AllocationStatus {
        match self {
            LifecycleEvent::Consumed => AllocationStatus::Consumed,
            LifecycleEvent::Expired => AllocationStatus::Expired,
            LifecycleEvent::Revoked => AllocationStatus::Revoked,
            LifecycleEvent::Returned => AllocationStatus::Returned,
        }
    }

    /// Whether the resource comes back into `available`.
    pub fn reclaims(&self) -> bool {
        matches!(self, LifecycleEvent::Revoked | LifecycleEvent::Returned)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_by: UserId,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Approval {
    pub fn by(user: UserId) -> Self {
        Self {
            approved_by: user,
            approved_at: Utc::now(),
            note: None,
        }
    }
}

/// Authoritative allocation record, stored in the bridge room.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub resource_type_id: ResourceTypeId,
    pub relation_id: RelationId,
    pub quantity: f64,
    pub unit: String,
    pub allocated_by: UserId,
    pub allocated_to: UserId,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    pub bridge_room: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Caller-supplied data for `allocate`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub resource_type_id: ResourceTypeId,
    pub relation_id: RelationId,
    pub quantity: f64,
    pub allocated_to: UserId,
    #[serde(default)]
    pub approval: Option<Approval>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AllocationRequest {
    pub fn new(
        resource_type_id: ResourceTypeId,
        relation_id: RelationId,
        quantity: f64,
        allocated_to: UserId,
    ) -> Self {
        Self {
            resource_type_id,
            relation_id,
            quantity,
            allocated_to,
            approval: None,
            notes: None,
        }
    }

    pub fn with_approval(mut self, approval: Approval) -> Self {
        self.approval = Some(approval);
        self
    }
}

/// Beneficiary-owned copy of the disclosure-safe allocation fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaultShadowRecord {
    pub allocation_id: AllocationId,
    pub resource_type_id: ResourceTypeId,
    pub resource_name: String,
    pub category: ResourceCategory,
    pub quantity: f64,
    pub unit: String,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub bridge_room: RoomId,
    pub mirrored_at: DateTime<Utc>,
}

/// Timeline payload appended to the bridge room for every lifecycle transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub allocation_id: AllocationId,
    pub event: LifecycleEvent,
    pub from_status: AllocationStatus,
    pub to_status: AllocationStatus,
    pub quantity: f64,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_map_to_terminal_statuses() {
        for event in LifecycleEvent::ALL {
            assert!(!event.target_status().is_active());
        }
        assert!(LifecycleEvent::Revoked.reclaims());
        assert!(LifecycleEvent::Returned.reclaims());
        assert!(!LifecycleEvent::Consumed.reclaims());
        assert!(!LifecycleEvent::Expired.reclaims());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(AllocationStatus::Revoked).unwrap(),
            serde_json::json!("revoked")
        );
    }
}
