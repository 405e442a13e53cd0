//! Actors, org roles, and network membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RoomId, UserId};

/// Whoever is calling a ledger operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(id),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Role of one user inside an org room.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrgMember {
    pub user_id: UserId,
    pub role: String,
    pub assigned_at: DateTime<Utc>,
}

/// The org rooms that make up a network.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkMembers {
    pub orgs: Vec<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
