//! In-process store
//!
//! Entity tables and the audit chain sit behind one async mutex. A
//! transaction holds that lock from `begin` to `commit`, stages its writes
//! and applies them only on commit, so a dropped transaction leaves no
//! trace. Notifications live behind their own lock and never block on an
//! open transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{AuditLog, AuditQuery, Directory, NotificationRepository, Store, Transaction};
use crate::audit::{seal, AuditDraft, AuditEntry};
use crate::model::{
    CaseRecord, EntityId, EntitySnapshot, EntityType, OfficeId, Paginated, Pagination, Role,
    UserId,
};
use crate::notify::Notification;
use crate::types::{CaseguardError, Result};

type EntityKey = (EntityType, EntityId);

#[derive(Debug, Clone)]
struct StoredEntity {
    snapshot: EntitySnapshot,
    deleted: bool,
}

#[derive(Default)]
struct Tables {
    entities: HashMap<EntityKey, StoredEntity>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    notifications: StdMutex<Vec<Notification>>,
    fail_audit_writes: Arc<AtomicBool>,
    conflicting_commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit append fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with `Conflict`
    pub fn conflict_next_commits(&self, count: u32) {
        self.conflicting_commits.store(count, Ordering::SeqCst);
    }

    /// Write an entity outside any transaction, without auditing
    pub async fn seed(&self, snapshot: EntitySnapshot) {
        let key = (snapshot.entity_type(), snapshot.entity_id());
        self.tables.lock().await.entities.insert(
            key,
            StoredEntity {
                snapshot,
                deleted: false,
            },
        );
    }

    /// Drop audit entries whose `expires_at` has passed, like the TTL index
    pub async fn purge_expired_audit(&self, now: DateTime<Utc>) -> usize {
        let mut tables = self.tables.lock().await;
        let before = tables.audit.len();
        tables
            .audit
            .retain(|e| e.expires_at.map_or(true, |at| at > now));
        before - tables.audit.len()
    }

    pub async fn audit_len(&self) -> usize {
        self.tables.lock().await.audit.len()
    }

    fn notifications(&self) -> Result<MutexGuard<'_, Vec<Notification>>> {
        self.notifications
            .lock()
            .map_err(|_| CaseguardError::Internal("notification table lock poisoned".into()))
    }
}

pub struct MemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    writes: HashMap<EntityKey, StoredEntity>,
    audit: Vec<AuditEntry>,
    fail_audit_writes: Arc<AtomicBool>,
    conflicting_commits: Arc<AtomicU32>,
}

impl MemoryTransaction {
    fn current(&self, key: &EntityKey) -> Option<&StoredEntity> {
        self.writes.get(key).or_else(|| self.tables.entities.get(key))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn load(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<Option<EntitySnapshot>> {
        Ok(self
            .current(&(entity_type, id))
            .filter(|e| !e.deleted)
            .map(|e| e.snapshot.clone()))
    }

    async fn load_deleted(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
    ) -> Result<Option<EntitySnapshot>> {
        Ok(self
            .current(&(entity_type, id))
            .filter(|e| e.deleted)
            .map(|e| e.snapshot.clone()))
    }

    async fn save(&mut self, snapshot: &EntitySnapshot) -> Result<()> {
        self.writes.insert(
            (snapshot.entity_type(), snapshot.entity_id()),
            StoredEntity {
                snapshot: snapshot.clone(),
                deleted: false,
            },
        );
        Ok(())
    }

    async fn remove(&mut self, entity_type: EntityType, id: EntityId) -> Result<()> {
        let key = (entity_type, id);
        let existing = self
            .current(&key)
            .filter(|e| !e.deleted)
            .cloned()
            .ok_or_else(|| CaseguardError::NotFound(format!("{} {}", entity_type, id)))?;

        self.writes.insert(
            key,
            StoredEntity {
                snapshot: existing.snapshot,
                deleted: true,
            },
        );
        Ok(())
    }

    async fn append_audit(&mut self, draft: AuditDraft) -> Result<AuditEntry> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(CaseguardError::AuditWriteFailure(
                "audit table unavailable".into(),
            ));
        }

        let previous = self.audit.last().or_else(|| self.tables.audit.last());
        let entry = seal(draft, previous.map(|e| (e.seq, e.hash.as_str())))?;
        self.audit.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let conflicted = self
            .conflicting_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(CaseguardError::Conflict("write conflict, retry".into()));
        }

        let MemoryTransaction {
            mut tables,
            writes,
            audit,
            ..
        } = *self;
        tables.entities.extend(writes);
        tables.audit.extend(audit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tables = Arc::clone(&self.tables).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            tables,
            writes: HashMap::new(),
            audit: Vec::new(),
            fail_audit_writes: Arc::clone(&self.fail_audit_writes),
            conflicting_commits: Arc::clone(&self.conflicting_commits),
        }))
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn case(&self, id: EntityId) -> Result<Option<CaseRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entities
            .get(&(EntityType::Case, id))
            .filter(|e| !e.deleted)
            .and_then(|e| e.snapshot.as_case().cloned()))
    }

    async fn office_users(&self, office_id: OfficeId, role: Role) -> Result<Vec<UserId>> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<UserId> = tables
            .entities
            .values()
            .filter(|e| !e.deleted)
            .filter_map(|e| match &e.snapshot {
                EntitySnapshot::User(u)
                    if u.is_active && u.office_id == office_id && u.role == role =>
                {
                    Some(u.id)
                }
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn find_audit(
        &self,
        query: &AuditQuery,
        office_scope: Option<OfficeId>,
        page: Pagination,
    ) -> Result<Paginated<AuditEntry>> {
        let tables = self.tables.lock().await;
        let matching: Vec<AuditEntry> = tables
            .audit
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .filter(|e| office_scope.map_or(true, |office| e.office_id == office))
            .cloned()
            .collect();
        Ok(page.apply(&matching))
    }

    async fn audit_chain(&self, after_seq: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| e.seq > after_seq)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn find_unread_by_key(
        &self,
        user_id: UserId,
        dedup_key: &str,
    ) -> Result<Option<Notification>> {
        let rows = self.notifications()?;
        Ok(rows
            .iter()
            .find(|n| n.user_id == user_id && !n.is_read && n.dedup_key.as_deref() == Some(dedup_key))
            .cloned())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut rows = self.notifications()?;
        if let Some(key) = notification.dedup_key.as_deref() {
            let taken = rows.iter().any(|n| {
                n.user_id == notification.user_id && !n.is_read && n.dedup_key.as_deref() == Some(key)
            });
            if taken {
                return Err(CaseguardError::Conflict(format!(
                    "unread notification exists for user {} key {}",
                    notification.user_id, key
                )));
            }
        }
        rows.push(notification.clone());
        Ok(())
    }

    async fn refresh_unread(
        &self,
        id: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let mut rows = self.notifications()?;
        Ok(rows.iter_mut().find(|n| n.id == id && !n.is_read).map(|n| {
            n.message = message.to_string();
            n.updated_at = at;
            n.clone()
        }))
    }

    async fn mark_read(&self, user_id: UserId, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.notifications()?;
        let changed = rows
            .iter_mut()
            .filter(|n| n.user_id == user_id && ids.contains(&n.id))
            .map(|n| n.mark_read(at))
            .filter(|changed| *changed)
            .count();
        Ok(changed as u64)
    }

    async fn mark_all_read(&self, user_id: UserId, at: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.notifications()?;
        let changed = rows
            .iter_mut()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.mark_read(at))
            .filter(|changed| *changed)
            .count();
        Ok(changed as u64)
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Pagination,
    ) -> Result<Paginated<Notification>> {
        let rows = self.notifications()?;
        // Insertion order is creation order
        let mine: Vec<Notification> = rows
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        Ok(page.apply(&mine))
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64> {
        let rows = self.notifications()?;
        Ok(rows
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{verify_chain, AuditAction, Severity};
    use crate::model::{Department, SensitivityCategory, UserRecord};

    fn user(id: UserId, office_id: OfficeId, role: Role, active: bool) -> EntitySnapshot {
        EntitySnapshot::User(UserRecord {
            id,
            office_id,
            email: format!("user{}@example.org", id),
            full_name: format!("User {}", id),
            role,
            department: Department::None,
            is_active: active,
        })
    }

    fn draft(entity_id: EntityId) -> AuditDraft {
        AuditDraft {
            id: Uuid::new_v4(),
            entity_type: EntityType::Case,
            entity_id,
            office_id: 1,
            sensitivity_category: SensitivityCategory::General,
            action: AuditAction::Create,
            actor_id: 1,
            actor_role: Role::Admin,
            actor_office_id: 1,
            actor_department: Department::Administration,
            old_values: None,
            new_values: None,
            changed_fields: vec![],
            reason: None,
            tags: vec![],
            severity: Severity::Info,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_leaves_nothing() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.save(&user(1, 1, Role::Admin, true)).await.unwrap();
            tx.append_audit(draft(1)).await.unwrap();
        }
        assert_eq!(store.audit_len().await, 0);
        assert!(store.office_users(1, Role::Admin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_writes_and_chain() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let mut tx = store.begin().await.unwrap();
            tx.save(&user(i, 1, Role::Admin, true)).await.unwrap();
            tx.append_audit(draft(i)).await.unwrap();
            tx.commit().await.unwrap();
        }

        let chain = store.audit_chain(0, 10).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert!(verify_chain(&chain).is_ok());
        assert_eq!(store.office_users(1, Role::Admin).await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore() {
        let store = MemoryStore::new();
        store.seed(user(5, 1, Role::Lawyer, true)).await;

        let mut tx = store.begin().await.unwrap();
        tx.remove(EntityType::User, 5).await.unwrap();
        assert!(tx.load(EntityType::User, 5).await.unwrap().is_none());
        let deleted = tx.load_deleted(EntityType::User, 5).await.unwrap().unwrap();
        tx.save(&deleted).await.unwrap();
        assert!(tx.load(EntityType::User, 5).await.unwrap().is_some());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.remove(EntityType::User, 99).await.unwrap_err();
        assert!(matches!(err, CaseguardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_skips_inactive_and_other_offices() {
        let store = MemoryStore::new();
        store.seed(user(1, 1, Role::Admin, true)).await;
        store.seed(user(2, 1, Role::Admin, false)).await;
        store.seed(user(3, 2, Role::Admin, true)).await;
        store.seed(user(4, 1, Role::OfficeManager, true)).await;

        assert_eq!(store.office_users(1, Role::Admin).await.unwrap(), vec![1]);
        assert_eq!(store.office_users(1, Role::OfficeManager).await.unwrap(), vec![4]);
    }
}
