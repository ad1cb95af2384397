//! Resources and the actions performed on them

use serde::{Deserialize, Serialize};
use std::fmt;

use super::actor::{OfficeId, UserId};

/// Numeric entity identifier
pub type EntityId = i64;

/// Closed set of entity kinds the system guards.
///
/// The first six are auditable domain entities; `AuditEntry` only appears
/// as a resource when someone queries the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Case,
    CaseDocument,
    CaseComment,
    User,
    Office,
    Payment,
    AuditEntry,
}

impl EntityType {
    pub const AUDITABLE: &'static [EntityType] = &[
        EntityType::Case,
        EntityType::CaseDocument,
        EntityType::CaseComment,
        EntityType::User,
        EntityType::Office,
        EntityType::Payment,
    ];

    /// Resources that live on a case record and sit behind the privacy wall
    pub fn is_case_attached(self) -> bool {
        matches!(
            self,
            EntityType::Case | EntityType::CaseDocument | EntityType::CaseComment
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Case => "case",
            EntityType::CaseDocument => "caseDocument",
            EntityType::CaseComment => "caseComment",
            EntityType::User => "user",
            EntityType::Office => "office",
            EntityType::Payment => "payment",
            EntityType::AuditEntry => "auditEntry",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access-control axis of a case-attached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityCategory {
    Legal,
    Psychological,
    #[default]
    General,
    Administrative,
    #[serde(other)]
    Unclassified,
}

impl SensitivityCategory {
    pub const KNOWN: &'static [SensitivityCategory] = &[
        SensitivityCategory::Legal,
        SensitivityCategory::Psychological,
        SensitivityCategory::General,
        SensitivityCategory::Administrative,
    ];

    /// Clinical or legally privileged content
    pub fn is_privileged(self) -> bool {
        matches!(
            self,
            SensitivityCategory::Legal | SensitivityCategory::Psychological
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensitivityCategory::Legal => "legal",
            SensitivityCategory::Psychological => "psychological",
            SensitivityCategory::General => "general",
            SensitivityCategory::Administrative => "administrative",
            SensitivityCategory::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for SensitivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the actor wants to do with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    pub const ALL: &'static [Action] = &[Action::Read, Action::Write, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guarded resource as seen by the policy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub office_id: OfficeId,
    pub sensitivity_category: SensitivityCategory,
    /// Client the resource belongs to (case owner, paying client)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<UserId>,
}

impl Resource {
    pub fn new(
        entity_type: EntityType,
        entity_id: EntityId,
        office_id: OfficeId,
        sensitivity_category: SensitivityCategory,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            office_id,
            sensitivity_category,
            client_id: None,
        }
    }

    pub fn owned_by(mut self, client_id: Option<UserId>) -> Self {
        self.client_id = client_id;
        self
    }

    /// The audit trail of an office, gated as administrative content
    pub fn audit_trail(office_id: OfficeId) -> Self {
        Self::new(
            EntityType::AuditEntry,
            0,
            office_id,
            SensitivityCategory::Administrative,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_wire_names() {
        let json = serde_json::to_string(&EntityType::CaseDocument).unwrap();
        assert_eq!(json, "\"caseDocument\"");
        assert_eq!(EntityType::CaseDocument.as_str(), "caseDocument");
    }

    #[test]
    fn test_unknown_category_decodes_as_unclassified() {
        let cat: SensitivityCategory = serde_json::from_str("\"medical\"").unwrap();
        assert_eq!(cat, SensitivityCategory::Unclassified);
    }

    #[test]
    fn test_case_attached() {
        assert!(EntityType::CaseComment.is_case_attached());
        assert!(!EntityType::Payment.is_case_attached());
        assert!(!EntityType::AuditEntry.is_case_attached());
    }
}
