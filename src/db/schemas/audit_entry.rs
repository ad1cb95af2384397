//! Audit entry document schema
//!
//! Append-only: documents are inserted once and never updated. Timestamps
//! are stored as BSON dates so a TTL index can honour `expires_at`.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditDraft, AuditEntry, Severity};
use crate::db::mongo::IntoIndexes;
use crate::model::{
    Department, EntityId, EntityType, FieldMap, OfficeId, Role, SensitivityCategory, UserId,
};
use crate::types::{CaseguardError, Result};

pub const AUDIT_COLLECTION: &str = "audit_entries";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditEntryDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<bson::oid::ObjectId>,

    pub seq: i64,
    pub entry_id: String,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub office_id: OfficeId,
    pub sensitivity_category: SensitivityCategory,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub actor_role: Role,
    pub actor_office_id: OfficeId,
    pub actor_department: Department,
    pub old_values: Option<FieldMap>,
    pub new_values: Option<FieldMap>,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub severity: Severity,
    pub created_at: DateTime,
    pub expires_at: Option<DateTime>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl From<&AuditEntry> for AuditEntryDoc {
    fn from(entry: &AuditEntry) -> Self {
        let body = &entry.body;
        Self {
            _id: None,
            seq: entry.seq as i64,
            entry_id: body.id.to_string(),
            entity_type: body.entity_type,
            entity_id: body.entity_id,
            office_id: body.office_id,
            sensitivity_category: body.sensitivity_category,
            action: body.action,
            actor_id: body.actor_id,
            actor_role: body.actor_role,
            actor_office_id: body.actor_office_id,
            actor_department: body.actor_department,
            old_values: body.old_values.clone(),
            new_values: body.new_values.clone(),
            changed_fields: body.changed_fields.clone(),
            reason: body.reason.clone(),
            tags: body.tags.clone(),
            severity: body.severity,
            created_at: DateTime::from_chrono(body.created_at),
            expires_at: body.expires_at.map(DateTime::from_chrono),
            previous_hash: entry.previous_hash.clone(),
            hash: entry.hash.clone(),
        }
    }
}

impl TryFrom<AuditEntryDoc> for AuditEntry {
    type Error = CaseguardError;

    fn try_from(doc: AuditEntryDoc) -> Result<Self> {
        let id = Uuid::parse_str(&doc.entry_id)
            .map_err(|e| CaseguardError::Database(format!("bad audit entry id: {}", e)))?;
        Ok(AuditEntry {
            seq: doc.seq as u64,
            body: AuditDraft {
                id,
                entity_type: doc.entity_type,
                entity_id: doc.entity_id,
                office_id: doc.office_id,
                sensitivity_category: doc.sensitivity_category,
                action: doc.action,
                actor_id: doc.actor_id,
                actor_role: doc.actor_role,
                actor_office_id: doc.actor_office_id,
                actor_department: doc.actor_department,
                old_values: doc.old_values,
                new_values: doc.new_values,
                changed_fields: doc.changed_fields,
                reason: doc.reason,
                tags: doc.tags,
                severity: doc.severity,
                created_at: doc.created_at.to_chrono(),
                expires_at: doc.expires_at.map(|d| d.to_chrono()),
            },
            previous_hash: doc.previous_hash,
            hash: doc.hash,
        })
    }
}

impl IntoIndexes for AuditEntryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Concurrent appenders collide here and retry
            (
                doc! { "seq": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("seq_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "entity_type": 1, "entity_id": 1, "seq": -1 },
                Some(
                    IndexOptions::builder()
                        .name("entity_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "actor_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("actor_index".to_string())
                        .build(),
                ),
            ),
            // Retention purge; entries without expires_at are kept
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .name("retention_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{seal, verify_chain, TAG_SENSITIVE_FIELDS};
    use chrono::{SubsecRound, Utc};
    use serde_json::json;

    fn fields(value: serde_json::Value) -> FieldMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => FieldMap::new(),
        }
    }

    fn entry() -> AuditEntry {
        let created_at = Utc::now().trunc_subsecs(3);
        let draft = AuditDraft {
            id: Uuid::new_v4(),
            entity_type: EntityType::Case,
            entity_id: 42,
            office_id: 1,
            sensitivity_category: SensitivityCategory::General,
            action: AuditAction::Update,
            actor_id: 20,
            actor_role: Role::OfficeManager,
            actor_office_id: 1,
            actor_department: Department::Management,
            old_values: Some(fields(json!({
                "status": "open",
                "notes": null,
                "assignedStaffIds": [14],
            }))),
            new_values: Some(fields(json!({
                "status": "completed",
                "notes": "",
                "assignedStaffIds": [14, 15],
            }))),
            changed_fields: vec!["assignedStaffIds".into(), "notes".into(), "status".into()],
            reason: Some("closing out".into()),
            tags: vec![TAG_SENSITIVE_FIELDS.into()],
            severity: Severity::Warning,
            created_at,
            expires_at: Some(created_at + chrono::Duration::days(30)),
        };
        seal(draft, Some((6, "00ff"))).unwrap()
    }

    #[test]
    fn test_bson_round_trip_keeps_the_chain_valid() {
        let original = entry();

        let stored = bson::to_document(&AuditEntryDoc::from(&original)).unwrap();
        assert_eq!(stored.get_i64("seq").unwrap(), 7);
        assert!(stored.get_datetime("created_at").is_ok());

        let doc: AuditEntryDoc = bson::from_document(stored).unwrap();
        let back = AuditEntry::try_from(doc).unwrap();

        assert_eq!(back, original);
        assert!(verify_chain(&[back]).is_ok());
    }

    #[test]
    fn test_json_uses_flat_camel_case_fields() {
        let original = entry();

        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["seq"], 7);
        assert_eq!(value["entityType"], "case");
        assert_eq!(value["sensitivityCategory"], "general");
        assert_eq!(value["previousHash"], "00ff");
        assert!(value.get("body").is_none());

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, original);
        assert!(verify_chain(&[back]).is_ok());
    }

    #[test]
    fn test_bad_entry_id_is_a_database_error() {
        let mut doc = AuditEntryDoc::from(&entry());
        doc.entry_id = "not-a-uuid".into();
        let err = AuditEntry::try_from(doc).unwrap_err();
        assert!(matches!(err, CaseguardError::Database(_)));
    }
}
