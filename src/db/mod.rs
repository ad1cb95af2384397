//! Persistence layer
//!
//! The core only talks to these traits. `MemoryStore` backs dev mode and
//! tests; `MongoStore` runs mutations inside MongoDB session transactions.

pub mod memory;
pub mod mongo;
pub mod schemas;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{AuditDraft, AuditEntry};
use crate::model::{
    CaseRecord, EntityId, EntitySnapshot, EntityType, OfficeId, Paginated, Pagination, Role,
    UserId,
};
use crate::notify::Notification;
use crate::types::Result;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoCollection, MongoStore};

/// A unit of work. Entity writes and audit appends land together on
/// `commit` or not at all; dropping an uncommitted transaction discards it.
#[async_trait]
pub trait Transaction: Send {
    /// Load a live (not soft-deleted) entity
    async fn load(&mut self, entity_type: EntityType, id: EntityId)
        -> Result<Option<EntitySnapshot>>;

    /// Load a soft-deleted entity, for restore
    async fn load_deleted(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<Option<EntitySnapshot>>;

    /// Insert or replace an entity, clearing any soft delete
    async fn save(&mut self, snapshot: &EntitySnapshot) -> Result<()>;

    /// Soft-delete an entity
    async fn remove(&mut self, entity_type: EntityType, id: EntityId) -> Result<()>;

    /// Place an audit draft on the chain and stage it
    async fn append_audit(&mut self, draft: AuditDraft) -> Result<AuditEntry>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Read-only relation lookups used to resolve notification recipients
#[async_trait]
pub trait Directory: Send + Sync {
    async fn case(&self, id: EntityId) -> Result<Option<CaseRecord>>;

    /// Active users of an office holding `role`
    async fn office_users(&self, office_id: OfficeId, role: Role) -> Result<Vec<UserId>>;
}

/// Audit trail lookups
#[derive(Debug, Clone, PartialEq)]
pub enum AuditQuery {
    Entity {
        entity_type: EntityType,
        entity_id: EntityId,
    },
    /// Entries by one actor with `from <= created_at < to`
    Actor {
        actor_id: UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        match self {
            AuditQuery::Entity {
                entity_type,
                entity_id,
            } => entry.entity_type == *entity_type && entry.entity_id == *entity_id,
            AuditQuery::Actor { actor_id, from, to } => {
                entry.actor_id == *actor_id
                    && from.map_or(true, |from| entry.created_at >= from)
                    && to.map_or(true, |to| entry.created_at < to)
            }
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Matching entries, newest first. `office_scope` restricts results to
    /// entries about one office.
    async fn find_audit(
        &self,
        query: &AuditQuery,
        office_scope: Option<OfficeId>,
        page: Pagination,
    ) -> Result<Paginated<AuditEntry>>;

    /// Entries with `seq > after_seq` in chain order
    async fn audit_chain(&self, after_seq: u64, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Row-level notification storage. Dedup serialization lives in
/// `NotificationStore`; implementations only need the primitives.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn find_unread_by_key(
        &self,
        user_id: UserId,
        dedup_key: &str,
    ) -> Result<Option<Notification>>;

    /// Insert a new row. Returns `Conflict` when an unread row with the same
    /// `(user_id, dedup_key)` already exists.
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    /// Refresh message and timestamp of a row that is still unread.
    /// Returns `None` if the row is gone or was read in the meantime.
    async fn refresh_unread(
        &self,
        id: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    /// Flip unread rows among `ids` owned by `user_id`; returns rows changed
    async fn mark_read(&self, user_id: UserId, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64>;

    async fn mark_all_read(&self, user_id: UserId, at: DateTime<Utc>) -> Result<u64>;

    /// Newest first
    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Paginated<Notification>>;

    async fn unread_count(&self, user_id: UserId) -> Result<u64>;
}

/// Everything the core needs from a backend
#[async_trait]
pub trait Store: Directory + AuditLog + NotificationRepository + Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
