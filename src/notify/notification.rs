//! Durable per-user notification rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::classifier::EventKind;
use super::intent::NotificationIntent;
use crate::model::{EntityId, EntityType, UserId};

/// One notification for one user. Goes from unread to read exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<EntityId>,
    pub dedup_key: Option<String>,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn from_intent(intent: &NotificationIntent, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            message: intent.message.clone(),
            kind: intent.kind,
            entity_type: Some(intent.entity_type),
            entity_id: Some(intent.entity_id),
            dedup_key: intent.dedup_key.clone(),
            link: intent.link.clone(),
            is_read: false,
            created_at: now,
            updated_at: now,
            read_at: None,
        }
    }

    /// Mark read; returns false if it already was
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        self.updated_at = at;
        true
    }
}
