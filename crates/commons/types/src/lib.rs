//! Commons Types - the data model of the resource & provenance ledger.
//!
//! Closed value sets (categories, relation types, opacity levels, lifecycle
//! events, EO kinds) are enums, so an out-of-set value cannot be constructed;
//! text input is parsed through `FromStr` and rejected with [`ClosedSetError`].

#![deny(unsafe_code)]

mod closed;

pub mod allocation;
pub mod catalog;
pub mod dedup;
pub mod eo;
pub mod ids;
pub mod inventory;
pub mod membership;
pub mod merge;
pub mod policy;
pub mod relation;

pub use allocation::{
    Allocation, AllocationRequest, AllocationStatus, Approval, LifecycleEvent, LifecycleRecord,
    VaultShadowRecord,
};
pub use catalog::{
    Grant, Maturity, Permissions, PermissionsRecord, PropagationLevel, ReplenishCycle,
    ResourceCategory, ResourceConstraints, ResourceType, ResourceTypeChanges, ResourceTypeDraft,
    ScopeKind, Source,
};
pub use closed::ClosedSetError;
pub use dedup::{CandidateMember, DedupCandidate, DedupLink, DedupResolution, LinkStatus, LinkType};
pub use eo::{EoKind, EoOperation, Epistemic, Frame, Visibility};
pub use ids::{
    AllocationId, EventId, MergeId, PolicyId, RecordId, RelationId, ResourceTypeId, RoomId, UserId,
};
pub use inventory::{Inventory, RestockMetadata};
pub use membership::{Actor, NetworkMembers, OrgMember};
pub use merge::{
    FieldComparison, FieldResolution, FieldStatus, FieldValue, MergeAudit, MergeRecord,
    MergeStrategy, RecordComparison, RecordRef, ResolutionSource,
};
pub use policy::{AllocationPolicy, PolicyRule, Violation};
pub use relation::{
    Opacity, OpacityChange, OpacityDirection, OpacityReport, Projection, Provenance, RelationDraft,
    RelationType, ResourceRelation,
};
