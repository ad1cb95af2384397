//! Policy engine: one `authorize` entry point for every layer
//!
//! Rules, first match wins:
//! 1. an unrecognized role is a hard deny (anomaly)
//! 2. admins are always allowed
//! 3. a resource in another office is denied
//! 4. an unrecognized sensitivity category is a hard deny (anomaly)
//! 5. case content (and audit trail reads) go through the sensitivity wall
//! 6. everything else goes through the capability table
//! 7. default deny
//!
//! `authorize` is a pure function of its arguments and the static tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::auth::permissions::{
    capability, describe, wall_rule, Capability, WallRule, CAPABILITIES, SENSITIVITY_WALL,
};
use crate::model::{Action, Actor, EntityType, Resource, Role, SensitivityCategory};
use crate::types::{CaseguardError, Result};

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    AdminOverride,
    SensitivityWall,
    OwnCaseRead,
    Capability,
    OwnRecordRead,
    CrossOffice,
    WallDenied,
    CapabilityDenied,
    UnknownRole,
    UnknownSensitivity,
    NoMatchingRule,
}

impl DecisionReason {
    /// Denials caused by data the engine does not understand
    pub fn is_anomaly(self) -> bool {
        matches!(
            self,
            DecisionReason::UnknownRole | DecisionReason::UnknownSensitivity
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::AdminOverride => "admin",
            DecisionReason::SensitivityWall => "sensitivity-wall",
            DecisionReason::OwnCaseRead => "own-case-read",
            DecisionReason::Capability => "capability",
            DecisionReason::OwnRecordRead => "own-record-read",
            DecisionReason::CrossOffice => "cross-office",
            DecisionReason::WallDenied => "sensitivity-wall-denied",
            DecisionReason::CapabilityDenied => "capability-denied",
            DecisionReason::UnknownRole => "unknown-role",
            DecisionReason::UnknownSensitivity => "unknown-sensitivity",
            DecisionReason::NoMatchingRule => "default-deny",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one authorization check. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub actor: Actor,
    pub resource: Resource,
    pub action: Action,
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl PermissionDecision {
    pub fn is_anomaly(&self) -> bool {
        !self.allowed && self.reason.is_anomaly()
    }

    /// Collapse into a result; every denial becomes the same `Forbidden`
    pub fn into_result(self) -> Result<PermissionDecision> {
        if self.allowed {
            Ok(self)
        } else {
            Err(CaseguardError::Forbidden)
        }
    }
}

/// Evaluates requests against the wall and capability tables
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine {
    wall: &'static [WallRule],
    capabilities: &'static [Capability],
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Engine over the built-in tables
    pub fn new() -> Self {
        Self {
            wall: SENSITIVITY_WALL,
            capabilities: CAPABILITIES,
        }
    }

    /// Engine over custom tables
    pub fn with_tables(wall: &'static [WallRule], capabilities: &'static [Capability]) -> Self {
        Self { wall, capabilities }
    }

    /// Decide whether `actor` may perform `action` on `resource`
    pub fn authorize(
        &self,
        actor: &Actor,
        resource: &Resource,
        action: Action,
    ) -> PermissionDecision {
        let (allowed, reason) = self.evaluate(actor, resource, action);

        if reason.is_anomaly() {
            warn!(
                actor_id = actor.id,
                role = %actor.role,
                entity_type = %resource.entity_type,
                category = %resource.sensitivity_category,
                action = %action,
                reason = %reason,
                "Policy anomaly"
            );
        } else if !allowed {
            debug!(
                actor_id = actor.id,
                action = %action,
                reason = %reason,
                "Denied: {}",
                describe(resource.entity_type, action)
            );
        }

        PermissionDecision {
            actor: *actor,
            resource: resource.clone(),
            action,
            allowed,
            reason,
        }
    }

    /// Same rules as `authorize` without logging. For filtering what a
    /// viewer may see, where a denial is not an event.
    pub fn permits(&self, actor: &Actor, resource: &Resource, action: Action) -> bool {
        self.evaluate(actor, resource, action).0
    }

    fn evaluate(&self, actor: &Actor, resource: &Resource, action: Action) -> (bool, DecisionReason) {
        if !actor.role.is_known() {
            return (false, DecisionReason::UnknownRole);
        }

        if actor.role == Role::Admin {
            return (true, DecisionReason::AdminOverride);
        }

        if resource.office_id != actor.office_id {
            return (false, DecisionReason::CrossOffice);
        }

        if resource.sensitivity_category == SensitivityCategory::Unclassified {
            return (false, DecisionReason::UnknownSensitivity);
        }

        let behind_wall = resource.entity_type.is_case_attached()
            || (resource.entity_type == EntityType::AuditEntry && action == Action::Read);

        if behind_wall {
            self.evaluate_wall(actor, resource, action)
        } else {
            self.evaluate_capability(actor, resource, action)
        }
    }

    fn evaluate_wall(
        &self,
        actor: &Actor,
        resource: &Resource,
        action: Action,
    ) -> (bool, DecisionReason) {
        let Some(rule) = wall_rule(self.wall, resource.sensitivity_category) else {
            return (false, DecisionReason::UnknownSensitivity);
        };

        if rule.roles.contains(&actor.role) {
            return (true, DecisionReason::SensitivityWall);
        }

        if rule.client_may_read_own
            && actor.role == Role::Client
            && action == Action::Read
            && resource.entity_type.is_case_attached()
            && resource.client_id == Some(actor.id)
        {
            return (true, DecisionReason::OwnCaseRead);
        }

        (false, DecisionReason::WallDenied)
    }

    fn evaluate_capability(
        &self,
        actor: &Actor,
        resource: &Resource,
        action: Action,
    ) -> (bool, DecisionReason) {
        let Some(cap) = capability(self.capabilities, resource.entity_type, action) else {
            return (false, DecisionReason::NoMatchingRule);
        };

        if cap.roles.contains(&actor.role) {
            return (true, DecisionReason::Capability);
        }

        if cap.owner_may_read && action == Action::Read && resource.client_id == Some(actor.id) {
            return (true, DecisionReason::OwnRecordRead);
        }

        (false, DecisionReason::CapabilityDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Department;

    fn actor(role: Role, office: i64) -> Actor {
        Actor::new(100, role, office, Department::None)
    }

    fn document(category: SensitivityCategory, office: i64) -> Resource {
        Resource::new(EntityType::CaseDocument, 7, office, category).owned_by(Some(900))
    }

    /// Expected wall outcome, written out independently of the tables
    fn wall_allows(role: Role, category: SensitivityCategory) -> bool {
        use SensitivityCategory::*;
        match (role, category) {
            (Role::Admin, _) => true,
            (Role::Lawyer, Legal) => true,
            (Role::Psychologist, Psychological) => true,
            (Role::OfficeManager | Role::Receptionist, Administrative) => true,
            (r, General) => r.is_staff(),
            _ => false,
        }
    }

    #[test]
    fn test_wall_matrix_for_every_triple() {
        let engine = PolicyEngine::new();
        for role in Role::KNOWN {
            for category in SensitivityCategory::KNOWN {
                for action in Action::ALL {
                    let decision = engine.authorize(&actor(*role, 1), &document(*category, 1), *action);
                    assert_eq!(
                        decision.allowed,
                        wall_allows(*role, *category),
                        "{} {} {}",
                        role,
                        category,
                        action
                    );
                    assert!(!decision.is_anomaly());
                }
            }
        }
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let engine = PolicyEngine::new();
        let a = actor(Role::Psychologist, 1);
        let r = document(SensitivityCategory::Legal, 1);
        let first = engine.authorize(&a, &r, Action::Read);
        for _ in 0..100 {
            assert_eq!(engine.authorize(&a, &r, Action::Read), first);
        }
    }

    #[test]
    fn test_cross_office_denied_except_admin() {
        let engine = PolicyEngine::new();
        let r = document(SensitivityCategory::General, 2);

        let lawyer = engine.authorize(&actor(Role::Lawyer, 1), &r, Action::Read);
        assert!(!lawyer.allowed);
        assert_eq!(lawyer.reason, DecisionReason::CrossOffice);

        let admin = engine.authorize(&actor(Role::Admin, 1), &r, Action::Delete);
        assert!(admin.allowed);
    }

    #[test]
    fn test_client_reads_only_own_general_case_content() {
        let engine = PolicyEngine::new();
        let own = Actor::new(900, Role::Client, 1, Department::None);
        let other = Actor::new(901, Role::Client, 1, Department::None);
        let r = document(SensitivityCategory::General, 1);

        let decision = engine.authorize(&own, &r, Action::Read);
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::OwnCaseRead);
        assert!(!engine.authorize(&own, &r, Action::Write).allowed);
        assert!(!engine.authorize(&other, &r, Action::Read).allowed);
        assert!(!engine
            .authorize(&own, &document(SensitivityCategory::Legal, 1), Action::Read)
            .allowed);
    }

    #[test]
    fn test_receptionist_denied_psychological_by_wall() {
        let engine = PolicyEngine::new();
        let decision = engine.authorize(
            &actor(Role::Receptionist, 1),
            &document(SensitivityCategory::Psychological, 1),
            Action::Read,
        );
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::WallDenied);
        assert!(!decision.is_anomaly());
    }

    #[test]
    fn test_unknown_role_and_category_are_anomalies() {
        let engine = PolicyEngine::new();

        let unknown_role = engine.authorize(
            &actor(Role::Unrecognized, 1),
            &document(SensitivityCategory::General, 1),
            Action::Read,
        );
        assert!(!unknown_role.allowed);
        assert!(unknown_role.is_anomaly());

        let unknown_category = engine.authorize(
            &actor(Role::Lawyer, 1),
            &document(SensitivityCategory::Unclassified, 1),
            Action::Read,
        );
        assert!(!unknown_category.allowed);
        assert_eq!(unknown_category.reason, DecisionReason::UnknownSensitivity);
    }

    #[test]
    fn test_capability_table_governs_non_case_resources() {
        let engine = PolicyEngine::new();
        let user = Resource::new(EntityType::User, 5, 1, SensitivityCategory::Administrative);
        assert!(!engine
            .authorize(&actor(Role::OfficeManager, 1), &user, Action::Write)
            .allowed);
        assert!(engine
            .authorize(&actor(Role::OfficeManager, 1), &user, Action::Read)
            .allowed);

        let payment =
            Resource::new(EntityType::Payment, 3, 1, SensitivityCategory::General).owned_by(Some(900));
        let client = Actor::new(900, Role::Client, 1, Department::None);
        let decision = engine.authorize(&client, &payment, Action::Read);
        assert_eq!(decision.reason, DecisionReason::OwnRecordRead);
        assert!(!engine.authorize(&client, &payment, Action::Write).allowed);
    }

    #[test]
    fn test_unclassified_non_case_resources_are_anomalies() {
        let engine = PolicyEngine::new();
        for entity_type in [EntityType::Payment, EntityType::User, EntityType::Office] {
            let r = Resource::new(entity_type, 3, 1, SensitivityCategory::Unclassified);
            for action in Action::ALL {
                let decision = engine.authorize(&actor(Role::OfficeManager, 1), &r, *action);
                assert!(!decision.allowed, "{} {}", entity_type, action);
                assert_eq!(decision.reason, DecisionReason::UnknownSensitivity);
                assert!(decision.is_anomaly());
            }
        }
    }

    #[test]
    fn test_permits_matches_authorize() {
        let engine = PolicyEngine::new();
        let r = document(SensitivityCategory::Psychological, 1);
        for role in Role::KNOWN {
            assert_eq!(
                engine.permits(&actor(*role, 1), &r, Action::Read),
                engine.authorize(&actor(*role, 1), &r, Action::Read).allowed
            );
        }
    }

    #[test]
    fn test_audit_trail_is_administrative() {
        let engine = PolicyEngine::new();
        let trail = Resource::audit_trail(1);
        assert!(engine.authorize(&actor(Role::OfficeManager, 1), &trail, Action::Read).allowed);
        assert!(!engine.authorize(&actor(Role::Lawyer, 1), &trail, Action::Read).allowed);
        assert!(!engine.authorize(&actor(Role::OfficeManager, 1), &trail, Action::Write).allowed);
    }

    #[test]
    fn test_denial_maps_to_uniform_forbidden() {
        let engine = PolicyEngine::new();
        let err = engine
            .authorize(
                &actor(Role::Lawyer, 1),
                &document(SensitivityCategory::General, 2),
                Action::Read,
            )
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "not authorized");
    }
}
