//! Org roles and network membership.

use chrono::Utc;
use commons_types::{Actor, EoKind, Frame, NetworkMembers, OrgMember, RoomId, UserId, Visibility};
use serde_json::json;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

impl ResourceLedger {
    /// Record `user`'s role in `org_room`. The caller must hold the admin role.
    pub async fn assign_role(
        &self,
        org_room: &RoomId,
        user: &UserId,
        role: &str,
        actor: &Actor,
    ) -> LedgerResult<OrgMember> {
        let role = role.trim();
        if role.is_empty() {
            return Err(LedgerError::validation("role must not be empty"));
        }
        self.require_admin(org_room, actor, keys::member_path(org_room, user.as_str()))
            .await?;

        let member = OrgMember {
            user_id: user.clone(),
            role: role.to_string(),
            assigned_at: Utc::now(),
        };
        self.save(org_room, keys::ORG_MEMBER, user.as_str(), &member)
            .await?;
        self.emit(
            org_room,
            EoKind::Con,
            keys::member_path(org_room, user.as_str()),
            json!({ "user": user, "role": role, "assigned_by": actor.user_id }),
            Frame::meant(Visibility::Org, org_room),
        )
        .await;

        info!(org = %org_room, user = %user, role = role, "Assigned org role");
        Ok(member)
    }

    /// The actor's role in `org_room`: the stored assignment if any, else the
    /// role the caller asserted.
    pub async fn resolve_role(&self, org_room: &RoomId, actor: &Actor) -> LedgerResult<Option<String>> {
        let stored: Option<OrgMember> = self
            .load(org_room, keys::ORG_MEMBER, actor.user_id.as_str())
            .await?;
        Ok(stored.map(|m| m.role).or_else(|| actor.role.clone()))
    }

    /// Register `org_room` as a member of `network_room`. Idempotent.
    pub async fn add_member_org(
        &self,
        network_room: &RoomId,
        org_room: &RoomId,
    ) -> LedgerResult<NetworkMembers> {
        let mut members: NetworkMembers = self
            .load(network_room, keys::NETWORK_MEMBERS, keys::SINGLETON)
            .await?
            .unwrap_or_default();
        if members.orgs.contains(org_room) {
            return Ok(members);
        }

        members.orgs.push(org_room.clone());
        members.updated_at = Some(Utc::now());
        self.save(network_room, keys::NETWORK_MEMBERS, keys::SINGLETON, &members)
            .await?;
        self.emit(
            network_room,
            EoKind::Con,
            keys::network_members_path(network_room),
            json!({ "org": org_room, "members": members.orgs.len() }),
            Frame::given(Visibility::Network, network_room),
        )
        .await;
        Ok(members)
    }

    pub async fn member_orgs(&self, network_room: &RoomId) -> LedgerResult<Vec<RoomId>> {
        let members: Option<NetworkMembers> = self
            .load(network_room, keys::NETWORK_MEMBERS, keys::SINGLETON)
            .await?;
        Ok(members.map(|m| m.orgs).unwrap_or_default())
    }

    pub(crate) async fn require_admin(
        &self,
        org_room: &RoomId,
        actor: &Actor,
        target: String,
    ) -> LedgerResult<()> {
        let role = self.resolve_role(org_room, actor).await?;
        if role.as_deref() == Some(self.config.catalog.admin_role.as_str()) {
            Ok(())
        } else {
            Err(Self::denied(actor, "administer", target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, harness};

    #[tokio::test]
    async fn stored_role_overrides_asserted_role() {
        let h = harness();
        let org = RoomId::new("org-a");
        let bob = UserId::new("bob");
        h.ledger
            .assign_role(&org, &bob, "case_worker", &admin())
            .await
            .unwrap();

        let claimed = Actor::user("bob").with_role("admin");
        let role = h.ledger.resolve_role(&org, &claimed).await.unwrap();
        assert_eq!(role.as_deref(), Some("case_worker"));

        let carol = Actor::user("carol").with_role("member");
        let role = h.ledger.resolve_role(&org, &carol).await.unwrap();
        assert_eq!(role.as_deref(), Some("member"));
    }

    #[tokio::test]
    async fn only_admins_assign_roles() {
        let h = harness();
        let err = h
            .ledger
            .assign_role(
                &RoomId::new("org-a"),
                &UserId::new("bob"),
                "admin",
                &Actor::user("mallory").with_role("member"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn adding_a_member_twice_is_a_no_op() {
        let h = harness();
        let net = RoomId::new("net");
        let org = RoomId::new("org-a");
        h.ledger.add_member_org(&net, &org).await.unwrap();
        let members = h.ledger.add_member_org(&net, &org).await.unwrap();
        assert_eq!(members.orgs, vec![org.clone()]);
        assert_eq!(h.log.count_kind(EoKind::Con), 1);
        assert_eq!(h.ledger.member_orgs(&net).await.unwrap(), vec![org]);
    }
}
