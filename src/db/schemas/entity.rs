//! Entity document schema
//!
//! One collection holds every auditable entity as its camelCase field map,
//! keyed by `(entity_type, entity_id)`. The columns the directory queries on
//! are lifted out of the field map.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{EntityId, EntitySnapshot, EntityType, FieldMap, OfficeId, Role};
use crate::types::Result;

pub const ENTITY_COLLECTION: &str = "entities";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EntityDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<bson::oid::ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub office_id: OfficeId,

    /// Set for users only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    pub values: FieldMap,
}

impl EntityDoc {
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Result<Self> {
        let (role, is_active) = match snapshot {
            EntitySnapshot::User(u) => (Some(u.role), Some(u.is_active)),
            _ => (None, None),
        };
        Ok(Self {
            _id: None,
            metadata: Metadata::new(),
            entity_type: snapshot.entity_type(),
            entity_id: snapshot.entity_id(),
            office_id: snapshot.office_id(),
            role,
            is_active,
            values: snapshot.to_fields()?,
        })
    }

    pub fn snapshot(&self) -> Result<EntitySnapshot> {
        EntitySnapshot::from_fields(self.entity_type, self.values.clone())
    }

    pub fn key_filter(entity_type: EntityType, entity_id: EntityId) -> Result<Document> {
        Ok(doc! {
            "entity_type": bson::to_bson(&entity_type)?,
            "entity_id": entity_id,
        })
    }
}

impl IntoIndexes for EntityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "entity_type": 1, "entity_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("entity_key_unique".to_string())
                        .build(),
                ),
            ),
            // Directory lookups: users of an office by role
            (
                doc! { "entity_type": 1, "office_id": 1, "role": 1 },
                Some(
                    IndexOptions::builder()
                        .name("office_role_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for EntityDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
