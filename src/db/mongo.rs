//! MongoDB backend
//!
//! `MongoClient` and `MongoCollection` are thin typed wrappers that apply
//! each schema's indexes on open. `MongoStore` runs every mutation inside a
//! `ClientSession` transaction; transient transaction errors and duplicate
//! keys surface as `Conflict` so the caller can retry the whole unit.

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    results::UpdateResult,
    Client, ClientSession, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::schemas::{
    AuditEntryDoc, EntityDoc, Metadata, NotificationDoc, AUDIT_COLLECTION, ENTITY_COLLECTION,
    NOTIFICATION_COLLECTION,
};
use super::{AuditLog, AuditQuery, Directory, NotificationRepository, Store, Transaction};
use crate::audit::{seal, AuditDraft, AuditEntry};
use crate::realtime::Backoff;
use crate::model::{
    CaseRecord, EntityId, EntitySnapshot, EntityType, OfficeId, Paginated, Pagination, Role,
    UserId,
};
use crate::notify::Notification;
use crate::types::{CaseguardError, Result};

const DUPLICATE_KEY: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY
    )
}

/// Duplicate keys mean another writer won a race we can retry
fn write_error(err: mongodb::error::Error) -> CaseguardError {
    if is_duplicate_key(&err) {
        CaseguardError::Conflict(err.to_string())
    } else {
        err.into()
    }
}

fn not_deleted(mut filter: Document) -> Document {
    filter.insert("metadata.is_deleted", doc! { "$ne": true });
    filter
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on an unreachable server instead of hanging startup
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| CaseguardError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CaseguardError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Connect, retrying on the backoff schedule while the server is
    /// unreachable
    pub async fn connect(uri: &str, db_name: &str, mut backoff: Backoff) -> Result<Self> {
        backoff
            .retry("MongoDB connection", || Self::new(uri, db_name))
            .await
    }

    /// Get a typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| CaseguardError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Find one live document
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.inner.find_one(not_deleted(filter)).await?)
    }

    /// One page of live documents plus the total match count
    pub async fn find_page(
        &self,
        filter: Document,
        sort: Document,
        page: Pagination,
    ) -> Result<(Vec<T>, u64)> {
        let filter = not_deleted(filter);
        let total = self.inner.count_documents(filter.clone()).await?;
        let items: Vec<T> = self
            .inner
            .find(filter)
            .sort(sort)
            .skip(page.offset() as u64)
            .limit(page.limit() as i64)
            .await?
            .try_collect()
            .await?;
        Ok((items, total))
    }

    pub async fn count(&self, filter: Document) -> Result<u64> {
        Ok(self.inner.count_documents(not_deleted(filter)).await?)
    }

    pub async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateResult> {
        Ok(self.inner.update_many(filter, update).await?)
    }

    /// Get the underlying collection for session-bound operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Insert a document, stamping metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<()> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(now);
        metadata.updated_at = Some(now);

        self.inner.insert_one(item).await.map_err(write_error)?;
        Ok(())
    }
}

/// Store backed by a MongoDB replica set
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    entities: MongoCollection<EntityDoc>,
    audit: MongoCollection<AuditEntryDoc>,
    notifications: MongoCollection<NotificationDoc>,
}

impl MongoStore {
    pub async fn new(client: MongoClient) -> Result<Self> {
        let entities = client.collection(ENTITY_COLLECTION).await?;
        let audit = client.collection(AUDIT_COLLECTION).await?;
        let notifications = client.collection(NOTIFICATION_COLLECTION).await?;
        Ok(Self {
            client,
            entities,
            audit,
            notifications,
        })
    }
}

pub struct MongoTransaction {
    session: ClientSession,
    entities: Collection<EntityDoc>,
    audit: Collection<AuditEntryDoc>,
}

impl MongoTransaction {
    async fn find_entity(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
        deleted: bool,
    ) -> Result<Option<EntitySnapshot>> {
        let mut filter = EntityDoc::key_filter(entity_type, id)?;
        filter.insert(
            "metadata.is_deleted",
            if deleted { doc! { "$eq": true } } else { doc! { "$ne": true } },
        );

        let found = self
            .entities
            .find_one(filter)
            .session(&mut self.session)
            .await?;
        found.map(|d| d.snapshot()).transpose()
    }
}

#[async_trait]
impl Transaction for MongoTransaction {
    async fn load(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<Option<EntitySnapshot>> {
        self.find_entity(entity_type, id, false).await
    }

    async fn load_deleted(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<Option<EntitySnapshot>> {
        self.find_entity(entity_type, id, true).await
    }

    async fn save(&mut self, snapshot: &EntitySnapshot) -> Result<()> {
        let row = EntityDoc::from_snapshot(snapshot)?;
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "office_id": row.office_id,
                "role": bson::to_bson(&row.role)?,
                "is_active": row.is_active,
                "values": bson::to_bson(&row.values)?,
                "metadata.is_deleted": false,
                "metadata.updated_at": now,
            },
            "$unset": { "metadata.deleted_at": "" },
            "$setOnInsert": { "metadata.created_at": now },
        };

        self.entities
            .update_one(EntityDoc::key_filter(row.entity_type, row.entity_id)?, update)
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn remove(&mut self, entity_type: EntityType, id: EntityId) -> Result<()> {
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": now,
                "metadata.updated_at": now,
            }
        };

        let result = self
            .entities
            .update_one(not_deleted(EntityDoc::key_filter(entity_type, id)?), update)
            .session(&mut self.session)
            .await?;

        if result.matched_count == 0 {
            return Err(CaseguardError::NotFound(format!("{} {}", entity_type, id)));
        }
        Ok(())
    }

    async fn append_audit(&mut self, draft: AuditDraft) -> Result<AuditEntry> {
        let last = self
            .audit
            .find_one(doc! {})
            .sort(doc! { "seq": -1 })
            .session(&mut self.session)
            .await?;

        let previous = last.map(|d| (d.seq as u64, d.hash));
        let entry = seal(
            draft,
            previous.as_ref().map(|(seq, hash)| (*seq, hash.as_str())),
        )?;

        self.audit
            .insert_one(AuditEntryDoc::from(&entry))
            .session(&mut self.session)
            .await
            .map_err(write_error)?;

        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.session.commit_transaction().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.session.abort_transaction().await?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut session = self.client.inner().start_session().await?;
        session.start_transaction().await?;
        Ok(Box::new(MongoTransaction {
            session,
            entities: self.entities.inner().clone(),
            audit: self.audit.inner().clone(),
        }))
    }
}

#[async_trait]
impl Directory for MongoStore {
    async fn case(&self, id: EntityId) -> Result<Option<CaseRecord>> {
        let found = self
            .entities
            .find_one(EntityDoc::key_filter(EntityType::Case, id)?)
            .await?;
        Ok(found
            .map(|d| d.snapshot())
            .transpose()?
            .and_then(|s| s.as_case().cloned()))
    }

    async fn office_users(&self, office_id: OfficeId, role: Role) -> Result<Vec<UserId>> {
        let filter = not_deleted(doc! {
            "entity_type": bson::to_bson(&EntityType::User)?,
            "office_id": office_id,
            "role": bson::to_bson(&role)?,
            "is_active": true,
        });
        let rows: Vec<EntityDoc> = self
            .entities
            .inner()
            .find(filter)
            .sort(doc! { "entity_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(rows.into_iter().map(|d| d.entity_id).collect())
    }
}

fn audit_filter(query: &AuditQuery, office_scope: Option<OfficeId>) -> Result<Document> {
    let mut filter = match query {
        AuditQuery::Entity {
            entity_type,
            entity_id,
        } => doc! {
            "entity_type": bson::to_bson(entity_type)?,
            "entity_id": *entity_id,
        },
        AuditQuery::Actor { actor_id, from, to } => {
            let mut filter = doc! { "actor_id": *actor_id };
            let mut range = Document::new();
            if let Some(from) = from {
                range.insert("$gte", DateTime::from_chrono(*from));
            }
            if let Some(to) = to {
                range.insert("$lt", DateTime::from_chrono(*to));
            }
            if !range.is_empty() {
                filter.insert("created_at", range);
            }
            filter
        }
    };
    if let Some(office) = office_scope {
        filter.insert("office_id", office);
    }
    Ok(filter)
}

#[async_trait]
impl AuditLog for MongoStore {
    async fn find_audit(
        &self,
        query: &AuditQuery,
        office_scope: Option<OfficeId>,
        page: Pagination,
    ) -> Result<Paginated<AuditEntry>> {
        let filter = audit_filter(query, office_scope)?;
        let (rows, total) = self
            .audit
            .find_page(filter, doc! { "seq": -1 }, page)
            .await?;
        let items = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(items, total, page))
    }

    async fn audit_chain(&self, after_seq: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows: Vec<AuditEntryDoc> = self
            .audit
            .inner()
            .find(doc! { "seq": { "$gt": after_seq as i64 } })
            .sort(doc! { "seq": 1 })
            .limit(limit as i64)
            .await?
            .try_collect()
            .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[async_trait]
impl NotificationRepository for MongoStore {
    async fn find_unread_by_key(
        &self,
        user_id: UserId,
        dedup_key: &str,
    ) -> Result<Option<Notification>> {
        let found = self
            .notifications
            .find_one(doc! { "user_id": user_id, "dedup_key": dedup_key, "is_read": false })
            .await?;
        found.map(Notification::try_from).transpose()
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .insert_one(NotificationDoc::from(notification))
            .await
    }

    async fn refresh_unread(
        &self,
        id: Uuid,
        message: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let at = DateTime::from_chrono(at);
        let updated = self
            .notifications
            .inner()
            .find_one_and_update(
                doc! { "notification_id": id.to_string(), "is_read": false },
                doc! { "$set": {
                    "message": message,
                    "updated_at": at,
                    "metadata.updated_at": at,
                } },
            )
            .return_document(ReturnDocument::After)
            .await?;
        updated.map(Notification::try_from).transpose()
    }

    async fn mark_read(
        &self,
        user_id: UserId,
        ids: &[Uuid],
        at: chrono::DateTime<Utc>,
    ) -> Result<u64> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let at = DateTime::from_chrono(at);
        let result = self
            .notifications
            .update_many(
                doc! { "user_id": user_id, "notification_id": { "$in": ids }, "is_read": false },
                doc! { "$set": { "is_read": true, "read_at": at, "updated_at": at } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn mark_all_read(&self, user_id: UserId, at: chrono::DateTime<Utc>) -> Result<u64> {
        let at = DateTime::from_chrono(at);
        let result = self
            .notifications
            .update_many(
                doc! { "user_id": user_id, "is_read": false },
                doc! { "$set": { "is_read": true, "read_at": at, "updated_at": at } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Paginated<Notification>> {
        let (rows, total) = self
            .notifications
            .find_page(
                doc! { "user_id": user_id },
                doc! { "created_at": -1, "_id": -1 },
                page,
            )
            .await?;
        let items = rows
            .into_iter()
            .map(Notification::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(items, total, page))
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64> {
        self.notifications
            .count(doc! { "user_id": user_id, "is_read": false })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round trips against a live server need a replica set; these cover
    // the pure pieces.

    #[test]
    fn test_entity_filter_uses_wire_names() {
        let filter = EntityDoc::key_filter(EntityType::CaseDocument, 7).unwrap();
        assert_eq!(filter.get_str("entity_type").unwrap(), "caseDocument");
        assert_eq!(filter.get_i64("entity_id").unwrap(), 7);
    }

    #[test]
    fn test_actor_filter_builds_time_range() {
        let from = Utc::now();
        let query = AuditQuery::Actor {
            actor_id: 11,
            from: Some(from),
            to: None,
        };
        let filter = audit_filter(&query, Some(1)).unwrap();
        assert_eq!(filter.get_i64("actor_id").unwrap(), 11);
        assert_eq!(filter.get_i64("office_id").unwrap(), 1);
        let range = filter.get_document("created_at").unwrap();
        assert!(range.contains_key("$gte"));
        assert!(!range.contains_key("$lt"));
    }

    #[test]
    fn test_entity_doc_keeps_snapshot() {
        let snapshot = EntitySnapshot::Case(CaseRecord::new(42, 1, "Custody review"));
        let row = EntityDoc::from_snapshot(&snapshot).unwrap();
        let encoded = bson::to_document(&row).unwrap();
        let decoded: EntityDoc = bson::from_document(encoded).unwrap();
        assert_eq!(decoded.snapshot().unwrap(), snapshot);
        assert_eq!(decoded.office_id, 1);
    }
}
