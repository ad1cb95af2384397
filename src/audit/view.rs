//! Viewer-facing projection of audit entries

use serde::Serialize;

use super::entry::{AuditEntry, TAG_POLICY_ANOMALY};
use crate::model::Actor;

/// An audit entry as shown to one viewer.
///
/// Only admins see why a policy anomaly was denied; everyone else gets the
/// entry with `reason` cleared. A viewer who may not read the audited
/// entity itself gets the entry without values, changed fields or reason.
/// Redacted views no longer hash-verify, so chain checks always run on raw
/// entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditView {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub redacted: bool,
}

impl AuditView {
    /// `values_visible` is whether the viewer may read the audited entity
    pub fn for_viewer(mut entry: AuditEntry, viewer: &Actor, values_visible: bool) -> Self {
        let hide_reason = !viewer.is_admin() && entry.has_tag(TAG_POLICY_ANOMALY);
        let hide_values = !viewer.is_admin() && !values_visible;

        if hide_reason || hide_values {
            entry.body.reason = None;
        }
        if hide_values {
            entry.body.old_values = None;
            entry.body.new_values = None;
            entry.body.changed_fields.clear();
        }
        Self {
            entry,
            redacted: hide_reason || hide_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain::seal;
    use crate::audit::entry::{AuditAction, AuditDraft, Severity};
    use crate::model::{Department, EntityType, Role, SensitivityCategory};
    use chrono::Utc;
    use uuid::Uuid;

    fn anomaly() -> AuditEntry {
        let draft = AuditDraft {
            id: Uuid::new_v4(),
            entity_type: EntityType::CaseDocument,
            entity_id: 7,
            office_id: 1,
            sensitivity_category: SensitivityCategory::Psychological,
            action: AuditAction::Access,
            actor_id: 30,
            actor_role: Role::Unrecognized,
            actor_office_id: 1,
            actor_department: Department::None,
            old_values: None,
            new_values: None,
            changed_fields: vec![],
            reason: Some("unknown-role denied".into()),
            tags: vec![TAG_POLICY_ANOMALY.into()],
            severity: Severity::Warning,
            created_at: Utc::now(),
            expires_at: None,
        };
        seal(draft, None).unwrap()
    }

    #[test]
    fn test_admin_sees_anomaly_reason() {
        let admin = Actor::new(1, Role::Admin, 1, Department::Administration);
        let view = AuditView::for_viewer(anomaly(), &admin, true);
        assert!(!view.redacted);
        assert!(view.entry.reason.is_some());
    }

    #[test]
    fn test_manager_gets_redacted_anomaly() {
        let manager = Actor::new(2, Role::OfficeManager, 1, Department::Management);
        let view = AuditView::for_viewer(anomaly(), &manager, true);
        assert!(view.redacted);
        assert!(view.entry.reason.is_none());

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["entityType"], "caseDocument");
        assert_eq!(json["redacted"], true);
    }

    #[test]
    fn test_hidden_values_are_stripped() {
        let mut entry = anomaly();
        entry.body.tags.clear();
        entry.body.new_values = Some(
            serde_json::json!({ "title": "Session notes" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        entry.body.changed_fields = vec!["title".into()];

        let receptionist = Actor::new(30, Role::Receptionist, 1, Department::Reception);
        let view = AuditView::for_viewer(entry.clone(), &receptionist, false);
        assert!(view.redacted);
        assert!(view.entry.new_values.is_none());
        assert!(view.entry.changed_fields.is_empty());
        assert!(view.entry.reason.is_none());
        assert_eq!(view.entry.entity_id, 7);

        let visible = AuditView::for_viewer(entry, &receptionist, true);
        assert!(!visible.redacted);
        assert!(visible.entry.new_values.is_some());
    }
}
