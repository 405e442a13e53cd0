//! Resource type catalog records and permission grants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::closed::closed_set;
use crate::ids::{ResourceTypeId, RoomId, UserId};

closed_set! {
    /// What kind of thing a resource type describes.
    ResourceCategory = "resource category" {
        Housing => "housing",
        Food => "food",
        Transportation => "transportation",
        Healthcare => "healthcare",
        Financial => "financial",
        Education => "education",
        Employment => "employment",
        Legal => "legal",
        Childcare => "childcare",
        Clothing => "clothing",
        Utilities => "utilities",
        Technology => "technology",
        Service => "service",
        Capacity => "capacity",
        Other => "other",
    }
}

closed_set! {
    /// The room scope a resource type (or relation holder) lives at.
    ScopeKind = "scope" {
        Individual => "individual",
        Org => "org",
        Network => "network",
    }
}

closed_set! {
    /// How a network-scope type flows down into member orgs.
    PropagationLevel = "propagation level" {
        Required => "required",
        Standard => "standard",
        Recommended => "recommended",
        Optional => "optional",
    }
}

closed_set! {
    Maturity = "maturity" {
        Draft => "draft",
        Normative => "normative",
    }
}

closed_set! {
    ReplenishCycle = "replenish cycle" {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Quarterly => "quarterly",
        Annually => "annually",
    }
}

/// Who a grant names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Grant {
    User(UserId),
    Role(String),
}

impl Grant {
    pub fn user(id: impl Into<String>) -> Self {
        Grant::User(UserId::new(id))
    }

    pub fn role(role: impl Into<String>) -> Self {
        Grant::Role(role.into())
    }
}

/// Grant sets attached to a resource type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub controllers: Vec<Grant>,
    #[serde(default)]
    pub allocators: Vec<Grant>,
    #[serde(default)]
    pub viewers: Vec<Grant>,
}

impl Permissions {
    /// Permissions for an individual-scope type: the owner controls and
    /// allocates, nobody else can see it.
    pub fn sole_owner(owner: &UserId) -> Self {
        Self {
            controllers: vec![Grant::User(owner.clone())],
            allocators: vec![Grant::User(owner.clone())],
            viewers: Vec::new(),
        }
    }

    /// Union of `self` and `other`, keeping first-seen order and dropping
    /// duplicate grants.
    pub fn merged(mut self, other: &Permissions) -> Self {
        push_unique(&mut self.controllers, &other.controllers);
        push_unique(&mut self.allocators, &other.allocators);
        push_unique(&mut self.viewers, &other.viewers);
        self
    }

    pub fn ensure_controller(&mut self, grant: Grant) {
        if !self.controllers.contains(&grant) {
            self.controllers.push(grant);
        }
    }
}

fn push_unique(into: &mut Vec<Grant>, from: &[Grant]) {
    for grant in from {
        if !into.contains(grant) {
            into.push(grant.clone());
        }
    }
}

/// Mirrored permissions row, kept next to the type under its own key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionsRecord {
    pub resource_type_id: ResourceTypeId,
    pub permissions: Permissions,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

/// Where a type came from and how it propagates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub level: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<PropagationLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_org: Option<RoomId>,
    /// Governance reference under which the current propagation level was adopted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adopted_via: Option<String>,
}

/// Per-type allocation constraints, validated alongside policies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_allocation: Option<f64>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eligible_roles: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub name: String,
    pub category: ResourceCategory,
    pub unit: String,
    pub fungible: bool,
    pub perishable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    pub infinite: bool,
    pub replenishes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenish_cycle: Option<ReplenishCycle>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Source,
    pub maturity: Maturity,
    #[serde(default)]
    pub constraints: ResourceConstraints,
    pub permissions: Permissions,
    /// Inactive types are visible but cannot be allocated until adopted.
    pub active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceType {
    /// Expiry instant of an allocation made at `allocated_at`, if this type perishes.
    pub fn expiry_from(&self, allocated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.perishable, self.ttl_days) {
            (true, Some(days)) => Duration::try_days(i64::from(days))
                .and_then(|ttl| allocated_at.checked_add_signed(ttl)),
            _ => None,
        }
    }

    pub fn matches_term(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }
}

/// Caller-supplied data for a new resource type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceTypeDraft {
    #[serde(default)]
    pub id: Option<ResourceTypeId>,
    pub name: String,
    pub category: ResourceCategory,
    pub unit: String,
    #[serde(default)]
    pub fungible: bool,
    #[serde(default)]
    pub perishable: bool,
    #[serde(default)]
    pub ttl_days: Option<u32>,
    #[serde(default)]
    pub infinite: bool,
    #[serde(default)]
    pub replenishes: bool,
    #[serde(default)]
    pub replenish_cycle: Option<ReplenishCycle>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub propagation: Option<PropagationLevel>,
    #[serde(default)]
    pub origin_org: Option<RoomId>,
    #[serde(default)]
    pub maturity: Option<Maturity>,
    #[serde(default)]
    pub constraints: ResourceConstraints,
    #[serde(default)]
    pub permissions: Permissions,
}

impl ResourceTypeDraft {
    pub fn new(name: impl Into<String>, category: ResourceCategory, unit: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            category,
            unit: unit.into(),
            fungible: false,
            perishable: false,
            ttl_days: None,
            infinite: false,
            replenishes: false,
            replenish_cycle: None,
            tags: Vec::new(),
            propagation: None,
            origin_org: None,
            maturity: None,
            constraints: ResourceConstraints::default(),
            permissions: Permissions::default(),
        }
    }

    pub fn with_id(mut self, id: ResourceTypeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn fungible(mut self) -> Self {
        self.fungible = true;
        self
    }

    pub fn perishable(mut self, ttl_days: u32) -> Self {
        self.perishable = true;
        self.ttl_days = Some(ttl_days);
        self
    }

    pub fn infinite(mut self) -> Self {
        self.infinite = true;
        self
    }

    pub fn replenishing(mut self, cycle: ReplenishCycle) -> Self {
        self.replenishes = true;
        self.replenish_cycle = Some(cycle);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_propagation(mut self, level: PropagationLevel) -> Self {
        self.propagation = Some(level);
        self
    }

    pub fn with_constraints(mut self, constraints: ResourceConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Top-level field changes for `update_type`. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceTypeChanges {
    pub name: Option<String>,
    pub category: Option<ResourceCategory>,
    pub unit: Option<String>,
    pub fungible: Option<bool>,
    pub perishable: Option<bool>,
    pub ttl_days: Option<u32>,
    pub infinite: Option<bool>,
    pub replenishes: Option<bool>,
    pub replenish_cycle: Option<ReplenishCycle>,
    pub tags: Option<Vec<String>>,
    pub maturity: Option<Maturity>,
    pub constraints: Option<ResourceConstraints>,
    pub propagation: Option<PropagationLevel>,
    /// Governance reference; required whenever `propagation` changes.
    pub adopted_via: Option<String>,
}
