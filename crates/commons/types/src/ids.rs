//! Identifier newtypes.
//!
//! Every identifier is an opaque string. Generated identifiers carry a short
//! prefix so that ids seen in logs and EO target paths are self-describing.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// A room in the replicated store (individual, org, network, bridge, or vault).
    RoomId,
    "room"
);
string_id!(
    /// A person acting on the ledger.
    UserId,
    "user"
);
string_id!(ResourceTypeId, "rtype");
string_id!(RelationId, "rel");
string_id!(AllocationId, "alloc");
string_id!(PolicyId, "policy");
string_id!(MergeId, "merge");
string_id!(
    /// Identifier returned by the EO log for one appended audit record.
    RecordId,
    "eo"
);
string_id!(
    /// Identifier of one appended timeline event in a room.
    EventId,
    "evt"
);
