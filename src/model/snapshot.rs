//! Typed entity snapshots
//!
//! Every auditable entity has a record type and one `EntitySnapshot`
//! variant. Audit diffs, persistence and classification all work on these
//! instead of loose key/value bags, so adding an entity forces every match
//! over snapshots to handle it.
//!
//! Optional fields serialize as `null` rather than being skipped: the audit
//! diff relies on every record exposing a stable key set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::actor::{Department, OfficeId, Role, UserId};
use super::resource::{EntityId, EntityType, Resource, SensitivityCategory};
use crate::types::{CaseguardError, Result};

/// Field map used for audit before/after values
pub type FieldMap = Map<String, Value>;

/// Case lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Open,
    InProgress,
    OnHold,
    Completed,
    Closed,
}

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }
}

/// Household composition captured at intake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub adults: u32,
    pub children: u32,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub id: EntityId,
    pub office_id: OfficeId,
    pub client_id: Option<UserId>,
    pub title: String,
    pub status: CaseStatus,
    /// Staff member who owns the case day to day
    pub primary_staff_id: Option<UserId>,
    pub assigned_lawyer_id: Option<UserId>,
    pub assigned_psychologist_id: Option<UserId>,
    #[serde(default)]
    pub assigned_staff_ids: Vec<UserId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<UserId>,
    pub notes: Option<String>,
    #[serde(default)]
    pub household: Household,
}

impl CaseRecord {
    pub fn new(id: EntityId, office_id: OfficeId, title: impl Into<String>) -> Self {
        Self {
            id,
            office_id,
            client_id: None,
            title: title.into(),
            status: CaseStatus::Open,
            primary_staff_id: None,
            assigned_lawyer_id: None,
            assigned_psychologist_id: None,
            assigned_staff_ids: Vec::new(),
            completed_at: None,
            completed_by: None,
            notes: None,
            household: Household::default(),
        }
    }

    /// Everyone currently working the case, without duplicates
    pub fn assigned_staff(&self) -> Vec<UserId> {
        let mut staff: Vec<UserId> = self
            .primary_staff_id
            .into_iter()
            .chain(self.assigned_lawyer_id)
            .chain(self.assigned_psychologist_id)
            .chain(self.assigned_staff_ids.iter().copied())
            .collect();
        staff.sort_unstable();
        staff.dedup();
        staff
    }

    /// Transition to `Completed`, stamping who and when
    pub fn complete(&mut self, by: UserId, at: DateTime<Utc>) {
        self.status = CaseStatus::Completed;
        self.completed_at = Some(at);
        self.completed_by = Some(by);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDocumentRecord {
    pub id: EntityId,
    pub case_id: EntityId,
    pub office_id: OfficeId,
    pub title: String,
    pub sensitivity: SensitivityCategory,
    pub storage_key: String,
    pub uploaded_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseCommentRecord {
    pub id: EntityId,
    pub case_id: EntityId,
    pub office_id: OfficeId,
    pub author_id: UserId,
    pub body: String,
    #[serde(default)]
    pub sensitivity: SensitivityCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub office_id: OfficeId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub department: Department,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeRecord {
    pub id: OfficeId,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: EntityId,
    pub office_id: OfficeId,
    pub case_id: Option<EntityId>,
    pub client_id: Option<UserId>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// A full-row snapshot of one auditable entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "values", rename_all = "camelCase")]
pub enum EntitySnapshot {
    Case(CaseRecord),
    CaseDocument(CaseDocumentRecord),
    CaseComment(CaseCommentRecord),
    User(UserRecord),
    Office(OfficeRecord),
    Payment(PaymentRecord),
}

impl EntitySnapshot {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntitySnapshot::Case(_) => EntityType::Case,
            EntitySnapshot::CaseDocument(_) => EntityType::CaseDocument,
            EntitySnapshot::CaseComment(_) => EntityType::CaseComment,
            EntitySnapshot::User(_) => EntityType::User,
            EntitySnapshot::Office(_) => EntityType::Office,
            EntitySnapshot::Payment(_) => EntityType::Payment,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            EntitySnapshot::Case(r) => r.id,
            EntitySnapshot::CaseDocument(r) => r.id,
            EntitySnapshot::CaseComment(r) => r.id,
            EntitySnapshot::User(r) => r.id,
            EntitySnapshot::Office(r) => r.id,
            EntitySnapshot::Payment(r) => r.id,
        }
    }

    pub fn office_id(&self) -> OfficeId {
        match self {
            EntitySnapshot::Case(r) => r.office_id,
            EntitySnapshot::CaseDocument(r) => r.office_id,
            EntitySnapshot::CaseComment(r) => r.office_id,
            EntitySnapshot::User(r) => r.office_id,
            EntitySnapshot::Office(r) => r.id,
            EntitySnapshot::Payment(r) => r.office_id,
        }
    }

    /// Case the entity hangs off, if any
    pub fn case_id(&self) -> Option<EntityId> {
        match self {
            EntitySnapshot::Case(r) => Some(r.id),
            EntitySnapshot::CaseDocument(r) => Some(r.case_id),
            EntitySnapshot::CaseComment(r) => Some(r.case_id),
            EntitySnapshot::Payment(r) => r.case_id,
            EntitySnapshot::User(_) | EntitySnapshot::Office(_) => None,
        }
    }

    pub fn sensitivity(&self) -> SensitivityCategory {
        match self {
            EntitySnapshot::CaseDocument(r) => r.sensitivity,
            EntitySnapshot::CaseComment(r) => r.sensitivity,
            EntitySnapshot::Case(_) | EntitySnapshot::Payment(_) => SensitivityCategory::General,
            EntitySnapshot::User(_) | EntitySnapshot::Office(_) => {
                SensitivityCategory::Administrative
            }
        }
    }

    /// Client recorded directly on the row. Documents and comments inherit
    /// their case's client, which the caller resolves.
    pub fn client_id(&self) -> Option<UserId> {
        match self {
            EntitySnapshot::Case(r) => r.client_id,
            EntitySnapshot::Payment(r) => r.client_id,
            _ => None,
        }
    }

    /// Policy view of this snapshot
    pub fn resource(&self) -> Resource {
        Resource::new(
            self.entity_type(),
            self.entity_id(),
            self.office_id(),
            self.sensitivity(),
        )
        .owned_by(self.client_id())
    }

    pub fn as_case(&self) -> Option<&CaseRecord> {
        match self {
            EntitySnapshot::Case(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentRecord> {
        match self {
            EntitySnapshot::Payment(r) => Some(r),
            _ => None,
        }
    }

    /// Flatten the record into its top-level field map
    pub fn to_fields(&self) -> Result<FieldMap> {
        let value = match self {
            EntitySnapshot::Case(r) => serde_json::to_value(r),
            EntitySnapshot::CaseDocument(r) => serde_json::to_value(r),
            EntitySnapshot::CaseComment(r) => serde_json::to_value(r),
            EntitySnapshot::User(r) => serde_json::to_value(r),
            EntitySnapshot::Office(r) => serde_json::to_value(r),
            EntitySnapshot::Payment(r) => serde_json::to_value(r),
        }
        .map_err(|e| CaseguardError::Internal(format!("snapshot encode failed: {}", e)))?;

        match value {
            Value::Object(map) => Ok(map),
            other => Err(CaseguardError::Internal(format!(
                "snapshot encoded to non-object: {}",
                other
            ))),
        }
    }

    /// Rebuild a typed snapshot from a stored field map
    pub fn from_fields(entity_type: EntityType, fields: FieldMap) -> Result<Self> {
        let value = Value::Object(fields);
        let decoded = match entity_type {
            EntityType::Case => serde_json::from_value(value).map(EntitySnapshot::Case),
            EntityType::CaseDocument => {
                serde_json::from_value(value).map(EntitySnapshot::CaseDocument)
            }
            EntityType::CaseComment => {
                serde_json::from_value(value).map(EntitySnapshot::CaseComment)
            }
            EntityType::User => serde_json::from_value(value).map(EntitySnapshot::User),
            EntityType::Office => serde_json::from_value(value).map(EntitySnapshot::Office),
            EntityType::Payment => serde_json::from_value(value).map(EntitySnapshot::Payment),
            EntityType::AuditEntry => {
                return Err(CaseguardError::BadRequest(
                    "audit entries have no entity snapshot".into(),
                ))
            }
        };
        decoded.map_err(|e| {
            CaseguardError::Internal(format!("{} snapshot decode failed: {}", entity_type, e))
        })
    }
}
