//! Audit recorder
//!
//! Builds audit drafts from typed snapshots and appends them through the
//! caller's transaction, so an entry commits or rolls back with the
//! mutation it describes. A failed append is returned as
//! `AuditWriteFailure` and must abort the mutation.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use super::diff::changed_fields;
use super::entry::{
    AuditAction, AuditDraft, AuditEntry, Severity, TAG_POLICY_ANOMALY, TAG_SENSITIVE_FIELDS,
    TAG_SENSITIVE_READ,
};
use super::severity;
use crate::auth::PermissionDecision;
use crate::db::Transaction;
use crate::model::{Actor, EntitySnapshot, FieldMap, Resource};
use crate::types::{CaseguardError, Result};

#[derive(Debug, Clone, Default)]
pub struct AuditRecorder {
    retention: Option<Duration>,
    audit_sensitive_reads: bool,
}

impl AuditRecorder {
    pub fn new(retention: Option<Duration>, audit_sensitive_reads: bool) -> Self {
        Self {
            retention,
            audit_sensitive_reads,
        }
    }

    pub fn audits_sensitive_reads(&self) -> bool {
        self.audit_sensitive_reads
    }

    /// Record one mutation. `before` is `None` for creates, `after` is
    /// `None` for deletes.
    pub async fn record(
        &self,
        tx: &mut dyn Transaction,
        action: AuditAction,
        before: Option<&EntitySnapshot>,
        after: Option<&EntitySnapshot>,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<AuditEntry> {
        let subject = after.or(before).ok_or_else(|| {
            CaseguardError::Internal("audit record needs a before or after snapshot".into())
        })?;

        let old_values = before.map(EntitySnapshot::to_fields).transpose()?;
        let new_values = after.map(EntitySnapshot::to_fields).transpose()?;
        let changed = changed_fields(old_values.as_ref(), new_values.as_ref());

        let entity_type = subject.entity_type();
        let severity = severity::classify(action, entity_type, &changed);
        let mut tags = Vec::new();
        if action == AuditAction::Update && severity::touches_sensitive_fields(entity_type, &changed)
        {
            tags.push(TAG_SENSITIVE_FIELDS.to_string());
        }

        let draft = self.draft(
            &subject.resource(),
            action,
            actor,
            old_values,
            new_values,
            changed,
            reason,
            tags,
            severity,
        );
        self.append(tx, draft).await
    }

    /// Record a denial caused by an unrecognized role or category
    pub async fn record_anomaly(
        &self,
        tx: &mut dyn Transaction,
        decision: &PermissionDecision,
    ) -> Result<AuditEntry> {
        let reason = format!(
            "{} denied: {} on {} {} ({} role, {} category)",
            decision.reason,
            decision.action,
            decision.resource.entity_type,
            decision.resource.entity_id,
            decision.actor.role,
            decision.resource.sensitivity_category,
        );
        let draft = self.draft(
            &decision.resource,
            AuditAction::Access,
            &decision.actor,
            None,
            None,
            Vec::new(),
            Some(reason),
            vec![TAG_POLICY_ANOMALY.to_string()],
            Severity::Warning,
        );
        self.append(tx, draft).await
    }

    /// Record an allowed read of privileged content. Returns `None` when
    /// sensitive-read auditing is off or the resource is not privileged.
    pub async fn record_sensitive_read(
        &self,
        tx: &mut dyn Transaction,
        decision: &PermissionDecision,
    ) -> Result<Option<AuditEntry>> {
        if !self.audit_sensitive_reads
            || !decision.allowed
            || !decision.resource.sensitivity_category.is_privileged()
        {
            return Ok(None);
        }

        let draft = self.draft(
            &decision.resource,
            AuditAction::Access,
            &decision.actor,
            None,
            None,
            Vec::new(),
            None,
            vec![TAG_SENSITIVE_READ.to_string()],
            Severity::Info,
        );
        self.append(tx, draft).await.map(Some)
    }

    #[allow(clippy::too_many_arguments)]
    fn draft(
        &self,
        resource: &Resource,
        action: AuditAction,
        actor: &Actor,
        old_values: Option<FieldMap>,
        new_values: Option<FieldMap>,
        changed_fields: Vec<String>,
        reason: Option<String>,
        tags: Vec<String>,
        severity: Severity,
    ) -> AuditDraft {
        // Millisecond precision so the hash survives a BSON round trip
        let created_at: DateTime<Utc> = Utc::now().trunc_subsecs(3);
        AuditDraft {
            id: Uuid::new_v4(),
            entity_type: resource.entity_type,
            entity_id: resource.entity_id,
            office_id: resource.office_id,
            sensitivity_category: resource.sensitivity_category,
            action,
            actor_id: actor.id,
            actor_role: actor.role,
            actor_office_id: actor.office_id,
            actor_department: actor.department,
            old_values,
            new_values,
            changed_fields,
            reason,
            tags,
            severity,
            created_at,
            expires_at: self.retention.map(|r| created_at + r),
        }
    }

    async fn append(&self, tx: &mut dyn Transaction, draft: AuditDraft) -> Result<AuditEntry> {
        let entity_type = draft.entity_type;
        let entity_id = draft.entity_id;
        let action = draft.action;

        match tx.append_audit(draft).await {
            Ok(entry) => {
                debug!(
                    seq = entry.seq,
                    entity_type = %entity_type,
                    entity_id,
                    action = %action,
                    severity = %entry.severity,
                    "Audit entry recorded"
                );
                Ok(entry)
            }
            // Conflicts are retried by the caller with the whole mutation
            Err(e @ CaseguardError::Conflict(_)) => Err(e),
            Err(e) => {
                error!(
                    entity_type = %entity_type,
                    entity_id,
                    action = %action,
                    error = %e,
                    "Audit write failed, aborting mutation"
                );
                Err(match e {
                    CaseguardError::AuditWriteFailure(msg) => CaseguardError::AuditWriteFailure(msg),
                    other => CaseguardError::AuditWriteFailure(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Store};
    use crate::model::{CaseRecord, CaseStatus, Department, Role};

    fn manager() -> Actor {
        Actor::new(20, Role::OfficeManager, 1, Department::Management)
    }

    #[tokio::test]
    async fn test_case_completion_is_a_warning() {
        let store = MemoryStore::new();
        let recorder = AuditRecorder::default();

        let before = CaseRecord::new(42, 1, "Custody review");
        let mut after = before.clone();
        after.complete(20, Utc::now());
        assert_eq!(after.status, CaseStatus::Completed);

        let mut tx = store.begin().await.unwrap();
        let entry = recorder
            .record(
                tx.as_mut(),
                AuditAction::Update,
                Some(&EntitySnapshot::Case(before)),
                Some(&EntitySnapshot::Case(after)),
                &manager(),
                None,
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            entry.changed_fields,
            vec!["completedAt", "completedBy", "status"]
        );
        assert_eq!(entry.severity, Severity::Warning);
        assert!(entry.has_tag(TAG_SENSITIVE_FIELDS));
        assert_eq!(entry.actor_role, Role::OfficeManager);
        assert_eq!(entry.seq, 1);
    }

    #[tokio::test]
    async fn test_retention_sets_expiry() {
        let store = MemoryStore::new();
        let recorder = AuditRecorder::new(Some(Duration::days(30)), false);
        let case = EntitySnapshot::Case(CaseRecord::new(1, 1, "Intake"));

        let mut tx = store.begin().await.unwrap();
        let entry = recorder
            .record(tx.as_mut(), AuditAction::Create, None, Some(&case), &manager(), None)
            .await
            .unwrap();

        assert_eq!(entry.expires_at, Some(entry.created_at + Duration::days(30)));
        assert_eq!(entry.severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_failed_append_is_audit_write_failure() {
        let store = MemoryStore::new();
        store.fail_audit_writes(true);
        let recorder = AuditRecorder::default();
        let case = EntitySnapshot::Case(CaseRecord::new(1, 1, "Intake"));

        let mut tx = store.begin().await.unwrap();
        let err = recorder
            .record(tx.as_mut(), AuditAction::Create, None, Some(&case), &manager(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CaseguardError::AuditWriteFailure(_)));
    }
}
