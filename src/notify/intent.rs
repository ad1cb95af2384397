//! Classifier output

use serde::{Deserialize, Serialize};

use super::classifier::EventKind;
use crate::model::{EntityId, EntityType, UserId};

/// Who should hear about an event, before it becomes durable rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub recipient_user_ids: Vec<UserId>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub message: String,
    pub dedup_key: Option<String>,
    pub link: Option<String>,
}
