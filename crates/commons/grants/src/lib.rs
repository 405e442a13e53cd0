//! Grant evaluation for resource types.
//!
//! A grant names either a user or a role. Evaluation is a pure function of a
//! grant set and an actor, so it can be tested without any room I/O. The
//! capability ladder is cumulative: whoever may control may also allocate, and
//! whoever may allocate may also view.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use commons_types::{Actor, Grant, Permissions, ResourceType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What an actor wants to do with a resource type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Control,
    Allocate,
    View,
}

/// True when any grant in `grants` names the actor's user id or role.
pub fn evaluate(grants: &[Grant], actor: &Actor) -> bool {
    grants.iter().any(|grant| match grant {
        Grant::User(user) => user == &actor.user_id,
        Grant::Role(role) => actor.role.as_deref() == Some(role.as_str()),
    })
}

/// The grant sets that confer `capability`, strongest first.
pub fn grant_sets(permissions: &Permissions, capability: Capability) -> Vec<&[Grant]> {
    match capability {
        Capability::Control => vec![permissions.controllers.as_slice()],
        Capability::Allocate => vec![
            permissions.controllers.as_slice(),
            permissions.allocators.as_slice(),
        ],
        Capability::View => vec![
            permissions.controllers.as_slice(),
            permissions.allocators.as_slice(),
            permissions.viewers.as_slice(),
        ],
    }
}

pub fn permits(permissions: &Permissions, capability: Capability, actor: &Actor) -> bool {
    grant_sets(permissions, capability)
        .into_iter()
        .any(|grants| evaluate(grants, actor))
}

/// Permission predicate consumed by the catalog and the allocation path.
pub trait PermissionEvaluator: Send + Sync {
    fn can_control(&self, resource_type: &ResourceType, actor: &Actor) -> bool;
    fn can_allocate(&self, resource_type: &ResourceType, actor: &Actor) -> bool;
    fn can_view(&self, resource_type: &ResourceType, actor: &Actor) -> bool;
}

/// Evaluates the grants carried on the resource type itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct GrantEvaluator;

impl GrantEvaluator {
    fn check(&self, resource_type: &ResourceType, capability: Capability, actor: &Actor) -> bool {
        let allowed = permits(&resource_type.permissions, capability, actor);
        debug!(
            resource_type = %resource_type.id,
            user = %actor.user_id,
            role = actor.role.as_deref().unwrap_or("-"),
            capability = ?capability,
            allowed,
            "Evaluated grant"
        );
        allowed
    }
}

impl PermissionEvaluator for GrantEvaluator {
    fn can_control(&self, resource_type: &ResourceType, actor: &Actor) -> bool {
        self.check(resource_type, Capability::Control, actor)
    }

    fn can_allocate(&self, resource_type: &ResourceType, actor: &Actor) -> bool {
        self.check(resource_type, Capability::Allocate, actor)
    }

    fn can_view(&self, resource_type: &ResourceType, actor: &Actor) -> bool {
        self.check(resource_type, Capability::View, actor)
    }
}
