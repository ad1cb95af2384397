//! Role capability table and the sensitivity wall
//!
//! Both tables are plain data, fixed at startup. The policy engine is the
//! only consumer; nothing else should branch on roles directly.

use crate::model::{Action, EntityType, Role, SensitivityCategory};

/// Which roles may touch case content of one sensitivity category
#[derive(Debug, Clone, Copy)]
pub struct WallRule {
    pub category: SensitivityCategory,
    pub roles: &'static [Role],
    /// The case's own client may read (never write) content in this category
    pub client_may_read_own: bool,
}

/// Which roles may perform an action on a non-case resource
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub entity_type: EntityType,
    pub action: Action,
    pub roles: &'static [Role],
    /// The client named on the record may read it
    pub owner_may_read: bool,
}

/// Privacy wall over case-attached content
pub const SENSITIVITY_WALL: &[WallRule] = &[
    WallRule {
        category: SensitivityCategory::Legal,
        roles: &[Role::Admin, Role::Lawyer],
        client_may_read_own: false,
    },
    WallRule {
        category: SensitivityCategory::Psychological,
        roles: &[Role::Admin, Role::Psychologist],
        client_may_read_own: false,
    },
    WallRule {
        category: SensitivityCategory::Administrative,
        roles: &[Role::Admin, Role::OfficeManager, Role::Receptionist],
        client_may_read_own: false,
    },
    WallRule {
        category: SensitivityCategory::General,
        roles: Role::STAFF,
        client_may_read_own: true,
    },
];

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Capabilities for resources outside the case record
pub const CAPABILITIES: &[Capability] = &[
    // Users: managers see their roster, only admins manage accounts
    Capability {
        entity_type: EntityType::User,
        action: Action::Read,
        roles: &[Role::Admin, Role::OfficeManager],
        owner_may_read: false,
    },
    Capability {
        entity_type: EntityType::User,
        action: Action::Write,
        roles: ADMIN_ONLY,
        owner_may_read: false,
    },
    Capability {
        entity_type: EntityType::User,
        action: Action::Delete,
        roles: ADMIN_ONLY,
        owner_may_read: false,
    },
    // Offices
    Capability {
        entity_type: EntityType::Office,
        action: Action::Read,
        roles: Role::STAFF,
        owner_may_read: false,
    },
    Capability {
        entity_type: EntityType::Office,
        action: Action::Write,
        roles: ADMIN_ONLY,
        owner_may_read: false,
    },
    Capability {
        entity_type: EntityType::Office,
        action: Action::Delete,
        roles: ADMIN_ONLY,
        owner_may_read: false,
    },
    // Payments
    Capability {
        entity_type: EntityType::Payment,
        action: Action::Read,
        roles: &[
            Role::Admin,
            Role::OfficeManager,
            Role::Receptionist,
            Role::EventCoordinator,
        ],
        owner_may_read: true,
    },
    Capability {
        entity_type: EntityType::Payment,
        action: Action::Write,
        roles: &[Role::Admin, Role::OfficeManager, Role::Receptionist],
        owner_may_read: false,
    },
    Capability {
        entity_type: EntityType::Payment,
        action: Action::Delete,
        roles: ADMIN_ONLY,
        owner_may_read: false,
    },
];

/// Look up the wall rule for a category. `None` for unclassified content.
pub fn wall_rule(
    table: &'static [WallRule],
    category: SensitivityCategory,
) -> Option<&'static WallRule> {
    table.iter().find(|rule| rule.category == category)
}

/// Look up the capability for an entity/action pair
pub fn capability(
    table: &'static [Capability],
    entity_type: EntityType,
    action: Action,
) -> Option<&'static Capability> {
    table
        .iter()
        .find(|cap| cap.entity_type == entity_type && cap.action == action)
}

/// Human-readable description of a capability for logging
pub fn describe(entity_type: EntityType, action: Action) -> &'static str {
    match (entity_type, action) {
        (EntityType::User, Action::Read) => "View staff accounts",
        (EntityType::User, Action::Write) => "Manage staff accounts",
        (EntityType::User, Action::Delete) => "Remove staff accounts",
        (EntityType::Office, Action::Read) => "View office details",
        (EntityType::Office, Action::Write) => "Manage offices",
        (EntityType::Office, Action::Delete) => "Close offices",
        (EntityType::Payment, Action::Read) => "View payments",
        (EntityType::Payment, Action::Write) => "Record payments",
        (EntityType::Payment, Action::Delete) => "Void payments",
        (EntityType::AuditEntry, Action::Read) => "Review audit trail",
        (t, _) if t.is_case_attached() => "Case content",
        _ => "Unknown capability",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_category_has_a_wall_rule() {
        for category in SensitivityCategory::KNOWN {
            assert!(wall_rule(SENSITIVITY_WALL, *category).is_some());
        }
        assert!(wall_rule(SENSITIVITY_WALL, SensitivityCategory::Unclassified).is_none());
    }

    #[test]
    fn test_admin_is_behind_every_wall() {
        for rule in SENSITIVITY_WALL {
            assert!(rule.roles.contains(&Role::Admin));
        }
    }

    #[test]
    fn test_only_admin_manages_users_and_offices() {
        for entity in [EntityType::User, EntityType::Office] {
            for action in [Action::Write, Action::Delete] {
                let cap = capability(CAPABILITIES, entity, action).unwrap();
                assert_eq!(cap.roles, ADMIN_ONLY);
            }
        }
    }

    #[test]
    fn test_no_case_capabilities_in_table() {
        assert!(CAPABILITIES
            .iter()
            .all(|cap| !cap.entity_type.is_case_attached()));
        assert!(capability(CAPABILITIES, EntityType::AuditEntry, Action::Write).is_none());
    }
}
