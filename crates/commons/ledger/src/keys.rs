//! Room event types and EO target paths.

use commons_types::{AllocationId, MergeId, RelationId, ResourceTypeId, RoomId};

pub const RESOURCE_TYPE: &str = "commons.resource.type";
pub const PERMISSIONS: &str = "commons.resource.permissions";
pub const RELATION: &str = "commons.resource.relation";
pub const INVENTORY: &str = "commons.resource.inventory";
pub const PROJECTION: &str = "commons.resource.projection";
pub const POLICY: &str = "commons.resource.policy";
pub const ALLOCATION: &str = "commons.resource.allocation";
pub const VAULT_SHADOW: &str = "commons.vault.allocation";
pub const ORG_MEMBER: &str = "commons.org.member";
/// Bridge rooms known to hold allocations against an org, keyed by room id.
pub const ORG_BRIDGE: &str = "commons.org.bridge";
pub const NETWORK_MEMBERS: &str = "commons.network.members";
pub const MERGE_AUDIT: &str = "commons.merge.audit";

/// Single-valued state lives under the empty key.
pub const SINGLETON: &str = "";

// Timeline event types.
pub const LIFECYCLE: &str = "commons.allocation.lifecycle";
pub const PUBLICATION_REQUESTED: &str = "commons.governance.publication_requested";

pub fn type_path(id: &ResourceTypeId) -> String {
    format!("resource.type.{id}")
}

pub fn type_field_path(id: &ResourceTypeId, field: &str) -> String {
    format!("resource.type.{id}.{field}")
}

pub fn permissions_path(id: &ResourceTypeId) -> String {
    format!("resource.type.{id}.permissions")
}

pub fn propagation_path(id: &ResourceTypeId, org: &RoomId) -> String {
    format!("resource.type.{id}.propagation.{org}")
}

pub fn relation_path(id: &RelationId) -> String {
    format!("resource.relation.{id}")
}

pub fn opacity_path(id: &RelationId) -> String {
    format!("resource.relation.{id}.opacity")
}

pub fn projections_path(id: &RelationId) -> String {
    format!("resource.relation.{id}.projections")
}

pub fn dedup_path(id: &RelationId) -> String {
    format!("resource.relation.{id}.dedup")
}

pub fn inventory_path(relation: &RelationId) -> String {
    format!("resource.inventory.{relation}")
}

pub fn allocation_path(id: &AllocationId) -> String {
    format!("resource.allocation.{id}")
}

pub fn shadow_path(id: &AllocationId) -> String {
    format!("vault.allocation.{id}")
}

pub fn policy_path(id: &str) -> String {
    format!("resource.policy.{id}")
}

pub fn member_path(room: &RoomId, user: &str) -> String {
    format!("org.{room}.member.{user}")
}

pub fn network_members_path(network: &RoomId) -> String {
    format!("network.{network}.members")
}

pub fn merge_path(id: &MergeId) -> String {
    format!("merge.{id}")
}

pub fn merge_field_path(id: &MergeId, field: &str) -> String {
    format!("merge.{id}.{field}")
}
