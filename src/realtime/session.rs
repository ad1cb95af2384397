//! Per-connection session state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

use super::message::PushMessage;
use crate::model::UserId;

/// Connection lifecycle: `Connecting -> Connected -> Disconnected`.
/// `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Disconnected)
                | (ConnectionState::Connected, ConnectionState::Disconnected)
        )
    }
}

/// Opaque, stable reference to one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    user_id: UserId,
    connection_id: u64,
}

impl SessionHandle {
    pub(crate) fn new(user_id: UserId, connection_id: u64) -> Self {
        Self {
            user_id,
            connection_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.user_id, self.connection_id)
    }
}

/// Public description of a session. Carries no transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSession {
    pub user_id: UserId,
    pub connection_id: u64,
    pub connected_at: DateTime<Utc>,
    pub state: ConnectionState,
}

pub struct Session {
    handle: SessionHandle,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
    outbound: mpsc::Sender<PushMessage>,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle, outbound: mpsc::Sender<PushMessage>) -> Self {
        Self {
            handle,
            connected_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Move to `next` if the current state allows it
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !ConnectionState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<PushMessage> {
        &self.outbound
    }

    pub fn info(&self) -> RealtimeSession {
        RealtimeSession {
            user_id: self.handle.user_id,
            connection_id: self.handle.connection_id,
            connected_at: self.connected_at,
            state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_is_one_way() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(SessionHandle::new(1, 1), tx);

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.transition(ConnectionState::Connected));
        assert!(!session.transition(ConnectionState::Connected));
        assert!(!session.transition(ConnectionState::Connecting));
        assert!(session.transition(ConnectionState::Disconnected));
        assert!(!session.transition(ConnectionState::Connected));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connecting_may_abort() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(SessionHandle::new(1, 2), tx);
        assert!(session.transition(ConnectionState::Disconnected));
        assert!(!session.is_connected());
    }
}
