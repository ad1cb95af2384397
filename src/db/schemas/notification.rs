//! Notification document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{EntityId, EntityType, UserId};
use crate::notify::{EventKind, Notification};
use crate::types::{CaseguardError, Result};

pub const NOTIFICATION_COLLECTION: &str = "notifications";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<bson::oid::ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub notification_id: String,
    pub user_id: UserId,
    pub message: String,
    pub kind: EventKind,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<EntityId>,
    pub dedup_key: Option<String>,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub read_at: Option<DateTime>,
}

impl From<&Notification> for NotificationDoc {
    fn from(n: &Notification) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            notification_id: n.id.to_string(),
            user_id: n.user_id,
            message: n.message.clone(),
            kind: n.kind,
            entity_type: n.entity_type,
            entity_id: n.entity_id,
            dedup_key: n.dedup_key.clone(),
            link: n.link.clone(),
            is_read: n.is_read,
            created_at: DateTime::from_chrono(n.created_at),
            updated_at: DateTime::from_chrono(n.updated_at),
            read_at: n.read_at.map(DateTime::from_chrono),
        }
    }
}

impl TryFrom<NotificationDoc> for Notification {
    type Error = CaseguardError;

    fn try_from(doc: NotificationDoc) -> Result<Self> {
        let id = Uuid::parse_str(&doc.notification_id)
            .map_err(|e| CaseguardError::Database(format!("bad notification id: {}", e)))?;
        Ok(Notification {
            id,
            user_id: doc.user_id,
            message: doc.message,
            kind: doc.kind,
            entity_type: doc.entity_type,
            entity_id: doc.entity_id,
            dedup_key: doc.dedup_key,
            link: doc.link,
            is_read: doc.is_read,
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
            read_at: doc.read_at.map(|d| d.to_chrono()),
        })
    }
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "notification_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("notification_id_unique".to_string())
                        .build(),
                ),
            ),
            // At most one unread row per (user, dedup key)
            (
                doc! { "user_id": 1, "dedup_key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! {
                            "is_read": false,
                            "dedup_key": { "$type": "string" },
                        })
                        .name("unread_dedup_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "user_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("user_feed_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
