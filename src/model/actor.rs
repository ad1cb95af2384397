//! Actors: the authenticated party behind every request
//!
//! An `Actor` is built from the session once per request and never changes
//! while the request runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric user identifier
pub type UserId = i64;

/// Numeric office identifier
pub type OfficeId = i64;

/// Organisation roles.
///
/// `Client` is the family member a case belongs to; every other known role
/// is staff. Role strings that do not match a known role decode to
/// `Unrecognized` so the policy engine can flag them instead of failing
/// at session decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    OfficeManager,
    Lawyer,
    Psychologist,
    Receptionist,
    EventCoordinator,
    Client,
    #[serde(other)]
    Unrecognized,
}

impl Role {
    /// Every staff role
    pub const STAFF: &'static [Role] = &[
        Role::Admin,
        Role::OfficeManager,
        Role::Lawyer,
        Role::Psychologist,
        Role::Receptionist,
        Role::EventCoordinator,
    ];

    /// Every role the system knows about
    pub const KNOWN: &'static [Role] = &[
        Role::Admin,
        Role::OfficeManager,
        Role::Lawyer,
        Role::Psychologist,
        Role::Receptionist,
        Role::EventCoordinator,
        Role::Client,
    ];

    pub fn is_staff(self) -> bool {
        Self::STAFF.contains(&self)
    }

    pub fn is_known(self) -> bool {
        self != Role::Unrecognized
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::OfficeManager => "office_manager",
            Role::Lawyer => "lawyer",
            Role::Psychologist => "psychologist",
            Role::Receptionist => "receptionist",
            Role::EventCoordinator => "event_coordinator",
            Role::Client => "client",
            Role::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    /// Never fails: unknown strings map to `Role::Unrecognized`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "admin" => Role::Admin,
            "office_manager" => Role::OfficeManager,
            "lawyer" => Role::Lawyer,
            "psychologist" => Role::Psychologist,
            "receptionist" => Role::Receptionist,
            "event_coordinator" => Role::EventCoordinator,
            "client" => Role::Client,
            _ => Role::Unrecognized,
        })
    }
}

/// Department the actor works in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Legal,
    Psychology,
    Administration,
    Reception,
    Events,
    Management,
    /// Clients and accounts without a department
    #[default]
    #[serde(other)]
    None,
}

impl Department {
    pub fn as_str(self) -> &'static str {
        match self {
            Department::Legal => "legal",
            Department::Psychology => "psychology",
            Department::Administration => "administration",
            Department::Reception => "reception",
            Department::Events => "events",
            Department::Management => "management",
            Department::None => "none",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated party of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub office_id: OfficeId,
    #[serde(default)]
    pub department: Department,
}

impl Actor {
    pub fn new(id: UserId, role: Role, office_id: OfficeId, department: Department) -> Self {
        Self {
            id,
            role,
            office_id,
            department,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_decodes_as_unrecognized() {
        let role: Role = serde_json::from_str("\"janitor\"").unwrap();
        assert_eq!(role, Role::Unrecognized);
        assert_eq!("janitor".parse::<Role>().unwrap(), Role::Unrecognized);
        assert!(!role.is_known());
        assert!(!role.is_staff());
    }

    #[test]
    fn test_role_string_round_trip() {
        for role in Role::KNOWN {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
            let json = serde_json::to_string(role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_client_is_not_staff() {
        assert!(!Role::Client.is_staff());
        assert!(Role::Receptionist.is_staff());
    }
}
