//! Audit entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{
    Actor, Department, EntityId, EntityType, FieldMap, OfficeId, Resource, Role,
    SensitivityCategory, UserId,
};

pub const TAG_POLICY_ANOMALY: &str = "policy_anomaly";
pub const TAG_SENSITIVE_READ: &str = "sensitive_read";
pub const TAG_SENSITIVE_FIELDS: &str = "sensitive_fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    /// Reads worth recording: policy anomalies and, when enabled, sensitive reads
    Access,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Restore => "restore",
            AuditAction::Access => "access",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review priority. Not an access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry before the store has placed it on the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDraft {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Office the audited entity belongs to
    pub office_id: OfficeId,
    /// Category of the audited entity; decides who may see the values
    pub sensitivity_category: SensitivityCategory,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub actor_role: Role,
    pub actor_office_id: OfficeId,
    pub actor_department: Department,
    pub old_values: Option<FieldMap>,
    pub new_values: Option<FieldMap>,
    pub changed_fields: Vec<String>,
    pub reason: Option<String>,
    pub tags: Vec<String>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuditDraft {
    pub fn actor(&self) -> Actor {
        Actor::new(
            self.actor_id,
            self.actor_role,
            self.actor_office_id,
            self.actor_department,
        )
    }

    /// The audited entity as the policy engine sees it
    pub fn resource(&self) -> Resource {
        Resource::new(
            self.entity_type,
            self.entity_id,
            self.office_id,
            self.sensitivity_category,
        )
    }
}

/// An append-only audit record, chained to its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Position on the chain, starting at 1
    pub seq: u64,
    #[serde(flatten)]
    pub body: AuditDraft,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl AuditEntry {
    pub fn id(&self) -> Uuid {
        self.body.id
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.body.tags.iter().any(|t| t == tag)
    }
}

impl std::ops::Deref for AuditEntry {
    type Target = AuditDraft;

    fn deref(&self) -> &AuditDraft {
        &self.body
    }
}
