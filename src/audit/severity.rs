//! Severity classification for audit entries

use super::entry::{AuditAction, Severity};
use crate::model::EntityType;

/// Fields whose change makes an update worth a second look
pub const SENSITIVE_FIELDS: &[(EntityType, &[&str])] = &[
    (EntityType::User, &["role", "officeId"]),
    (EntityType::Case, &["status", "officeId"]),
    (EntityType::CaseDocument, &["officeId", "sensitivity"]),
    (EntityType::CaseComment, &["officeId", "sensitivity"]),
    (EntityType::Payment, &["officeId"]),
];

/// Entities whose deletion is always critical
pub const CRITICAL_DELETES: &[EntityType] = &[EntityType::Case, EntityType::User];

pub fn sensitive_fields_for(entity_type: EntityType) -> &'static [&'static str] {
    SENSITIVE_FIELDS
        .iter()
        .find(|(t, _)| *t == entity_type)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

/// Whether any changed field is sensitive for this entity
pub fn touches_sensitive_fields(entity_type: EntityType, changed: &[String]) -> bool {
    let sensitive = sensitive_fields_for(entity_type);
    changed.iter().any(|f| sensitive.contains(&f.as_str()))
}

pub fn classify(action: AuditAction, entity_type: EntityType, changed: &[String]) -> Severity {
    match action {
        AuditAction::Delete if CRITICAL_DELETES.contains(&entity_type) => Severity::Critical,
        AuditAction::Update if touches_sensitive_fields(entity_type, changed) => Severity::Warning,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_deleting_cases_and_users_is_critical() {
        assert_eq!(classify(AuditAction::Delete, EntityType::Case, &[]), Severity::Critical);
        assert_eq!(classify(AuditAction::Delete, EntityType::User, &[]), Severity::Critical);
        assert_eq!(classify(AuditAction::Delete, EntityType::CaseComment, &[]), Severity::Info);
    }

    #[test]
    fn test_sensitive_updates_warn() {
        assert_eq!(
            classify(AuditAction::Update, EntityType::User, &fields(&["role"])),
            Severity::Warning
        );
        assert_eq!(
            classify(
                AuditAction::Update,
                EntityType::Case,
                &fields(&["completedAt", "completedBy", "status"])
            ),
            Severity::Warning
        );
        assert_eq!(
            classify(AuditAction::Update, EntityType::Case, &fields(&["notes"])),
            Severity::Info
        );
    }

    #[test]
    fn test_create_is_info_even_with_sensitive_keys() {
        assert_eq!(
            classify(AuditAction::Create, EntityType::User, &fields(&["role", "officeId"])),
            Severity::Info
        );
    }
}
