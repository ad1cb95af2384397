//! Session registry
//!
//! Live sessions indexed by user id, then by connection id. DashMap shards
//! by user, so connects and pushes for different users do not contend.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::session::{Session, SessionHandle};
use crate::model::UserId;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, HashMap<u64, Arc<Session>>>,
    next_connection_id: AtomicU64,
    count: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle that is never reused for this registry
    pub fn allocate(&self, user_id: UserId) -> SessionHandle {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        SessionHandle::new(user_id, id)
    }

    pub fn insert(&self, session: Arc<Session>) {
        let handle = session.handle();
        self.sessions
            .entry(handle.user_id())
            .or_default()
            .insert(handle.connection_id(), session);
        self.count.fetch_add(1, Ordering::Relaxed);

        debug!(
            session = %handle,
            count = self.count.load(Ordering::Relaxed),
            "Session registered"
        );
    }

    /// Remove a session; the user's entry goes with its last session
    pub fn remove(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .get_mut(&handle.user_id())
            .and_then(|mut conns| conns.remove(&handle.connection_id()));

        self.sessions
            .remove_if(&handle.user_id(), |_, conns| conns.is_empty());

        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            debug!(
                session = %handle,
                count = self.count.load(Ordering::Relaxed),
                "Session removed"
            );
        }
        removed
    }

    pub fn get(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.sessions
            .get(&handle.user_id())
            .and_then(|conns| conns.get(&handle.connection_id()).cloned())
    }

    /// Snapshot of a user's sessions, taken without holding the shard lock
    pub fn sessions_for(&self, user_id: UserId) -> Vec<Arc<Session>> {
        self.sessions
            .get(&user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn user_count(&self) -> usize {
        self.sessions.len()
    }
}
