//! Notification store
//!
//! Turns intents into rows with per-(user, dedup key) upsert semantics. An
//! unread row with the same key is refreshed in place; once read, a repeat
//! inserts a fresh row instead of reviving the old one.
//!
//! Upserts for one key are serialized by an in-process lock. Across
//! processes the backend's unique index on unread keys rejects the losing
//! insert with `Conflict`, and the upsert is retried as a refresh.

use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use super::intent::NotificationIntent;
use super::notification::Notification;
use crate::db::NotificationRepository;
use crate::model::{Paginated, Pagination, UserId};
use crate::types::{CaseguardError, Result};

const UPSERT_ATTEMPTS: usize = 3;

type KeyLock = Arc<Mutex<()>>;

pub struct NotificationStore<R: NotificationRepository + ?Sized> {
    repo: Arc<R>,
    key_locks: DashMap<(UserId, String), KeyLock>,
}

impl<R: NotificationRepository + ?Sized> NotificationStore<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            key_locks: DashMap::new(),
        }
    }

    /// Persist one row per recipient. Returns the rows as stored, new or
    /// refreshed, in recipient order. A recipient whose write fails is
    /// logged and skipped; the others still get their rows.
    pub async fn enqueue(&self, intent: &NotificationIntent) -> Vec<Notification> {
        let mut stored = Vec::with_capacity(intent.recipient_user_ids.len());
        for &user_id in &intent.recipient_user_ids {
            match self.enqueue_one(user_id, intent).await {
                Ok(row) => stored.push(row),
                Err(e) => error!(
                    user_id,
                    kind = %intent.kind,
                    entity_id = intent.entity_id,
                    error = %e,
                    "Notification enqueue failed"
                ),
            }
        }
        stored
    }

    async fn enqueue_one(&self, user_id: UserId, intent: &NotificationIntent) -> Result<Notification> {
        let Some(key) = intent.dedup_key.as_deref() else {
            let row = Notification::from_intent(intent, user_id, Utc::now().trunc_subsecs(3));
            self.repo.insert_notification(&row).await?;
            return Ok(row);
        };

        let map_key = (user_id, key.to_string());
        let lock = self
            .key_locks
            .entry(map_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.upsert(user_id, key, intent).await
        };

        drop(lock);
        self.key_locks
            .remove_if(&map_key, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn upsert(
        &self,
        user_id: UserId,
        key: &str,
        intent: &NotificationIntent,
    ) -> Result<Notification> {
        for _ in 0..UPSERT_ATTEMPTS {
            let now = Utc::now().trunc_subsecs(3);

            if let Some(existing) = self.repo.find_unread_by_key(user_id, key).await? {
                if let Some(refreshed) = self
                    .repo
                    .refresh_unread(existing.id, &intent.message, now)
                    .await?
                {
                    debug!(user_id, dedup_key = key, id = %refreshed.id, "Notification collapsed");
                    return Ok(refreshed);
                }
            }

            let row = Notification::from_intent(intent, user_id, now);
            match self.repo.insert_notification(&row).await {
                Ok(()) => return Ok(row),
                // Another writer got there first; pick up its row
                Err(CaseguardError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(CaseguardError::Conflict(format!(
            "notification upsert for user {} key {} kept conflicting",
            user_id, key
        )))
    }

    /// Mark rows read. Already-read and foreign ids are ignored.
    pub async fn mark_read(&self, user_id: UserId, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.repo
            .mark_read(user_id, ids, Utc::now().trunc_subsecs(3))
            .await
    }

    pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64> {
        self.repo
            .mark_all_read(user_id, Utc::now().trunc_subsecs(3))
            .await
    }

    pub async fn list(&self, user_id: UserId, page: Pagination) -> Result<Paginated<Notification>> {
        self.repo.list_notifications(user_id, page).await
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64> {
        self.repo.unread_count(user_id).await
    }

    /// Number of keys with an upsert in flight
    pub fn pending_keys(&self) -> usize {
        self.key_locks.len()
    }
}
