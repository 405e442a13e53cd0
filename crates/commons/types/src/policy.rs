//! Allocation policies and the violations they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PolicyId, ResourceTypeId};

/// One rule of an allocation policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Upper bound on a single allocation.
    MaxQuantity { limit: f64 },
    /// Upper bound on concurrently active allocations per beneficiary and type.
    MaxActivePerBeneficiary { limit: u32 },
    /// Minimum days between two allocations of the same type to one beneficiary.
    CooldownDays { days: u32 },
    /// The caller's resolved role must be one of these.
    RequireRole { roles: Vec<String> },
    /// The request must carry an approval.
    RequireApproval,
}

impl PolicyRule {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyRule::MaxQuantity { .. } => "max_quantity",
            PolicyRule::MaxActivePerBeneficiary { .. } => "max_active_per_beneficiary",
            PolicyRule::CooldownDays { .. } => "cooldown_days",
            PolicyRule::RequireRole { .. } => "require_role",
            PolicyRule::RequireApproval => "require_approval",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocationPolicy {
    pub id: PolicyId,
    pub name: String,
    /// `None` applies the policy to every resource type in the org.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type_id: Option<ResourceTypeId>,
    pub rules: Vec<PolicyRule>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl AllocationPolicy {
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        Self {
            id: PolicyId::generate(),
            name: name.into(),
            resource_type_id: None,
            rules,
            active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn for_type(mut self, resource_type_id: ResourceTypeId) -> Self {
        self.resource_type_id = Some(resource_type_id);
        self
    }

    pub fn applies_to(&self, resource_type_id: &ResourceTypeId) -> bool {
        self.active
            && self
                .resource_type_id
                .as_ref()
                .map_or(true, |id| id == resource_type_id)
    }
}

/// A failed check. `source` names the policy id, or `permission`/`constraint`/`inventory`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub source: String,
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(source: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
