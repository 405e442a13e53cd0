//! Capacity accounting per relation.
//!
//! Every mutation clamps `total_capacity` and `available` (and the other
//! counters) at zero. The sum `available + allocated + reserved` is expected to
//! stay within `total_capacity` but is not enforced here: concurrent writers
//! and swallowed projection failures may make it drift until reconciled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::LifecycleEvent;
use crate::ids::{RelationId, ResourceTypeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub relation_id: RelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type_id: Option<ResourceTypeId>,
    pub total_capacity: f64,
    pub available: f64,
    pub allocated: f64,
    pub reserved: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restocked_at: Option<DateTime<Utc>>,
}

impl Inventory {
    pub fn new(relation_id: RelationId, resource_type_id: Option<ResourceTypeId>) -> Self {
        let now = Utc::now();
        Self {
            relation_id,
            resource_type_id,
            total_capacity: 0.0,
            available: 0.0,
            allocated: 0.0,
            reserved: 0.0,
            created_at: now,
            updated_at: now,
            last_restocked_at: None,
        }
    }

    pub fn restock(&mut self, quantity: f64) {
        let now = Utc::now();
        self.total_capacity += quantity;
        self.available += quantity;
        self.last_restocked_at = Some(now);
        self.touch(now);
    }

    /// Signed correction to both capacity and availability.
    pub fn adjust(&mut self, delta: f64) {
        self.total_capacity += delta;
        self.available += delta;
        self.touch(Utc::now());
    }

    /// Bookkeeping for a fresh allocation. Infinite resources never deplete.
    pub fn allocate(&mut self, quantity: f64, infinite: bool) {
        if !infinite {
            self.available -= quantity;
        }
        self.allocated += quantity;
        self.touch(Utc::now());
    }

    /// Bookkeeping for a lifecycle transition of an allocation of `quantity`.
    pub fn apply_lifecycle(&mut self, event: LifecycleEvent, quantity: f64, infinite: bool) {
        self.allocated -= quantity;
        if event.reclaims() && !infinite {
            self.available += quantity;
        }
        self.touch(Utc::now());
    }

    /// Overwrite `allocated` with a value recomputed from the allocation ledger.
    pub fn set_allocated(&mut self, allocated: f64) {
        self.allocated = allocated;
        self.touch(Utc::now());
    }

    pub fn is_consistent(&self) -> bool {
        self.available + self.allocated + self.reserved <= self.total_capacity + f64::EPSILON
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.total_capacity = clamp(self.total_capacity);
        self.available = clamp(self.available);
        self.allocated = clamp(self.allocated);
        self.reserved = clamp(self.reserved);
        self.updated_at = now;
    }
}

fn clamp(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

/// Metadata recorded with a restock.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RestockMetadata {
    /// Set when the restock seeds a freshly established relation.
    #[serde(default)]
    pub initial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RestockMetadata {
    pub fn initial() -> Self {
        Self {
            initial: true,
            ..Default::default()
        }
    }
}
