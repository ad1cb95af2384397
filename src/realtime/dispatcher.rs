//! Realtime dispatcher
//!
//! Pushes frames to every live session of a user. Each session owns a
//! bounded FIFO queue drained by its transport task; a push that cannot be
//! queued within the timeout is dropped for that session and the pull path
//! covers it. Closed queues mean the transport is gone, so the session is
//! removed.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info};

use super::message::PushMessage;
use super::registry::SessionRegistry;
use super::session::{ConnectionState, RealtimeSession, Session, SessionHandle};
use crate::model::UserId;
use crate::notify::Notification;

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_SESSION_BUFFER: usize = 64;

/// What the transport gets back from `connect`
pub struct Connection {
    pub handle: SessionHandle,
    /// Frames for this connection, in push order
    pub outbound: mpsc::Receiver<PushMessage>,
}

#[derive(Clone)]
pub struct RealtimeDispatcher {
    registry: Arc<SessionRegistry>,
    push_timeout: Duration,
    buffer: usize,
}

impl Default for RealtimeDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_TIMEOUT, DEFAULT_SESSION_BUFFER)
    }
}

impl RealtimeDispatcher {
    pub fn new(push_timeout: Duration, buffer: usize) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            push_timeout,
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection for `user_id`
    pub fn connect(&self, user_id: UserId) -> Connection {
        let (tx, rx) = mpsc::channel(self.buffer);
        let handle = self.registry.allocate(user_id);
        let session = Arc::new(Session::new(handle, tx));

        self.registry.insert(Arc::clone(&session));
        session.transition(ConnectionState::Connected);

        info!(session = %handle, "Realtime session connected");
        Connection {
            handle,
            outbound: rx,
        }
    }

    /// Remove a session immediately. Returns false if it was already gone.
    pub fn disconnect(&self, handle: SessionHandle) -> bool {
        match self.registry.remove(handle) {
            Some(session) => {
                session.transition(ConnectionState::Disconnected);
                info!(session = %handle, "Realtime session disconnected");
                true
            }
            None => false,
        }
    }

    /// Queue a frame on every connected session of `user_id`. Returns how
    /// many sessions accepted it. Never fails.
    pub async fn push(&self, user_id: UserId, message: PushMessage) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .registry
            .sessions_for(user_id)
            .into_iter()
            .filter(|s| s.is_connected())
            .collect();

        if sessions.is_empty() {
            debug!(user_id, "No live sessions, notification left for pull");
            return 0;
        }

        let sends = sessions.iter().map(|session| {
            let message = message.clone();
            async move {
                match session
                    .sender()
                    .send_timeout(message, self.push_timeout)
                    .await
                {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(_)) => {
                        debug!(session = %session.handle(), "Push timed out");
                        false
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        debug!(session = %session.handle(), "Push to closed session");
                        self.disconnect(session.handle());
                        false
                    }
                }
            }
        });

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    pub async fn push_notification(&self, notification: &Notification) -> usize {
        self.push(
            notification.user_id,
            PushMessage::Notification {
                notification: notification.clone(),
            },
        )
        .await
    }

    /// Queue a frame on one session only
    pub async fn send_to(&self, handle: SessionHandle, message: PushMessage) -> bool {
        let Some(session) = self.registry.get(handle) else {
            return false;
        };
        session
            .sender()
            .send_timeout(message, self.push_timeout)
            .await
            .is_ok()
    }

    pub fn sessions(&self, user_id: UserId) -> Vec<RealtimeSession> {
        self.registry
            .sessions_for(user_id)
            .iter()
            .map(|s| s.info())
            .collect()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.registry
            .sessions_for(user_id)
            .iter()
            .any(|s| s.is_connected())
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> RealtimeDispatcher {
        RealtimeDispatcher::new(Duration::from_millis(50), 2)
    }

    #[tokio::test]
    async fn test_push_reaches_every_session_of_user() {
        let d = dispatcher();
        let mut a = d.connect(1);
        let mut b = d.connect(1);
        let mut other = d.connect(2);

        assert_eq!(d.push(1, PushMessage::Pong).await, 2);
        assert_eq!(a.outbound.recv().await, Some(PushMessage::Pong));
        assert_eq!(b.outbound.recv().await, Some(PushMessage::Pong));
        assert!(other.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_without_sessions_is_silent() {
        let d = dispatcher();
        assert_eq!(d.push(1, PushMessage::Pong).await, 0);
        assert!(!d.is_online(1));
    }

    #[tokio::test]
    async fn test_fifo_per_connection() {
        let d = RealtimeDispatcher::new(Duration::from_millis(50), 16);
        let mut conn = d.connect(1);
        for count in 0..10 {
            d.push(1, PushMessage::UnreadCount { count }).await;
        }
        for expected in 0..10 {
            assert_eq!(
                conn.outbound.recv().await,
                Some(PushMessage::UnreadCount { count: expected })
            );
        }
    }

    #[tokio::test]
    async fn test_full_queue_times_out_without_blocking() {
        let d = dispatcher();
        let _conn = d.connect(1);

        assert_eq!(d.push(1, PushMessage::Pong).await, 1);
        assert_eq!(d.push(1, PushMessage::Pong).await, 1);
        // Buffer of two is full and nobody drains it
        assert_eq!(d.push(1, PushMessage::Pong).await, 0);
        assert!(d.is_online(1));
    }

    #[tokio::test]
    async fn test_dropped_transport_is_removed_on_push() {
        let d = dispatcher();
        let conn = d.connect(1);
        drop(conn.outbound);

        assert_eq!(d.push(1, PushMessage::Pong).await, 0);
        assert_eq!(d.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_immediate_and_idempotent() {
        let d = dispatcher();
        let conn = d.connect(1);
        assert_eq!(d.sessions(1)[0].state, ConnectionState::Connected);

        assert!(d.disconnect(conn.handle));
        assert!(!d.disconnect(conn.handle));
        assert!(d.sessions(1).is_empty());
        assert_eq!(d.push(1, PushMessage::Pong).await, 0);
    }
}
