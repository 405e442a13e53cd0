//! Allocation policies and the constraint check run before any allocation write.

use chrono::{DateTime, Duration, Utc};
use commons_types::{
    Actor, Allocation, AllocationPolicy, AllocationRequest, EoKind, Frame, Inventory, PolicyRule,
    ResourceType, RoomId, Violation, Visibility,
};
use serde_json::json;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

/// Upper bound for a `cooldown_days` rule.
pub const MAX_COOLDOWN_DAYS: u32 = 36_500;

/// Everything the constraint check looks at, gathered before any write.
pub struct AllocationContext<'a> {
    pub resource_type: &'a ResourceType,
    pub request: &'a AllocationRequest,
    pub inventory: Option<&'a Inventory>,
    /// The allocating actor's resolved org role.
    pub role: Option<&'a str>,
    pub policies: &'a [AllocationPolicy],
    /// Allocations already recorded in the bridge room.
    pub existing: &'a [Allocation],
    pub now: DateTime<Utc>,
}

/// Every violation of type constraints, policies, and availability.
/// An empty result means the allocation may proceed.
pub fn validate_allocation(ctx: &AllocationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let rt = ctx.resource_type;
    let quantity = ctx.request.quantity;

    if !rt.active {
        violations.push(Violation::new(
            "constraint",
            "inactive_type",
            format!("resource type {} has not been adopted", rt.id),
        ));
    }
    if let Some(max) = rt.constraints.max_per_allocation {
        if quantity > max {
            violations.push(Violation::new(
                "constraint",
                "max_per_allocation",
                format!("{quantity} exceeds the per-allocation maximum of {max}"),
            ));
        }
    }
    if rt.constraints.requires_approval && ctx.request.approval.is_none() {
        violations.push(Violation::new(
            "constraint",
            "requires_approval",
            format!("{} allocations need an approval", rt.name),
        ));
    }
    if !rt.constraints.eligible_roles.is_empty() && !role_in(ctx.role, &rt.constraints.eligible_roles) {
        violations.push(Violation::new(
            "constraint",
            "eligible_roles",
            "caller's role may not allocate this type",
        ));
    }

    for policy in ctx.policies.iter().filter(|p| p.applies_to(&rt.id)) {
        for rule in &policy.rules {
            if let Some(message) = check_rule(rule, ctx) {
                violations.push(Violation::new(policy.id.as_str(), rule.code(), message));
            }
        }
    }

    if !rt.infinite {
        let available = ctx.inventory.map_or(0.0, |inv| inv.available);
        if quantity > available {
            violations.push(Violation::new(
                "inventory",
                "insufficient_available",
                format!("requested {quantity} but only {available} available"),
            ));
        }
    }

    violations
}

fn check_rule(rule: &PolicyRule, ctx: &AllocationContext<'_>) -> Option<String> {
    let request = ctx.request;
    let same_beneficiary = || {
        ctx.existing.iter().filter(move |a| {
            a.allocated_to == request.allocated_to && a.resource_type_id == request.resource_type_id
        })
    };

    match rule {
        PolicyRule::MaxQuantity { limit } => (request.quantity > *limit)
            .then(|| format!("{} exceeds the policy limit of {limit}", request.quantity)),
        PolicyRule::MaxActivePerBeneficiary { limit } => {
            let active = same_beneficiary().filter(|a| a.status.is_active()).count();
            (active >= *limit as usize)
                .then(|| format!("beneficiary already holds {active} active allocations"))
        }
        PolicyRule::CooldownDays { days } => {
            let since = Duration::try_days(i64::from(*days))
                .and_then(|window| ctx.now.checked_sub_signed(window))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            same_beneficiary()
                .any(|a| a.allocated_at > since)
                .then(|| format!("beneficiary received this type within the last {days} days"))
        }
        PolicyRule::RequireRole { roles } => (!role_in(ctx.role, roles))
            .then(|| format!("requires one of the roles {}", roles.join(", "))),
        PolicyRule::RequireApproval => request
            .approval
            .is_none()
            .then(|| "an approval is required".to_string()),
    }
}

fn role_in(role: Option<&str>, roles: &[String]) -> bool {
    role.is_some_and(|role| roles.iter().any(|r| r == role))
}

impl ResourceLedger {
    /// Create or replace an allocation policy in `org_room`. Admin only.
    pub async fn put_policy(
        &self,
        org_room: &RoomId,
        policy: AllocationPolicy,
        actor: &Actor,
    ) -> LedgerResult<AllocationPolicy> {
        if policy.name.trim().is_empty() {
            return Err(LedgerError::validation("policy name must not be empty"));
        }
        if policy.rules.is_empty() {
            return Err(LedgerError::validation("policy needs at least one rule"));
        }
        for rule in &policy.rules {
            match rule {
                PolicyRule::MaxQuantity { limit } if !(limit.is_finite() && *limit > 0.0) => {
                    return Err(LedgerError::validation("max_quantity limit must be positive"));
                }
                PolicyRule::CooldownDays { days } if *days > MAX_COOLDOWN_DAYS => {
                    return Err(LedgerError::validation(format!(
                        "cooldown_days must not exceed {MAX_COOLDOWN_DAYS}"
                    )));
                }
                _ => {}
            }
        }
        self.require_admin(org_room, actor, keys::policy_path(policy.id.as_str()))
            .await?;

        let mut policy = policy;
        policy.updated_at = Utc::now();
        self.save(org_room, keys::POLICY, policy.id.as_str(), &policy)
            .await?;
        self.emit(
            org_room,
            EoKind::Des,
            keys::policy_path(policy.id.as_str()),
            json!({
                "name": policy.name,
                "resource_type": policy.resource_type_id,
                "rules": policy.rules,
                "active": policy.active,
                "by": actor.user_id,
            }),
            Frame::meant(Visibility::Org, org_room),
        )
        .await;

        info!(org = %org_room, policy = %policy.id, "Stored allocation policy");
        Ok(policy)
    }

    pub async fn list_policies(&self, org_room: &RoomId) -> LedgerResult<Vec<AllocationPolicy>> {
        self.load_all(org_room, keys::POLICY).await
    }
}
