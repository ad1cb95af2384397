//! Frames exchanged over a realtime connection

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notify::Notification;

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Notification { notification: Notification },
    UnreadCount { count: u64 },
    Pong,
    Error { message: String },
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Mark the listed notifications read
    Ack { ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_tags() {
        let json = serde_json::to_string(&PushMessage::UnreadCount { count: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"unread_count","count":3}"#);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        let id = Uuid::new_v4();
        let msg: ClientMessage =
            serde_json::from_str(&format!(r#"{{"type":"ack","ids":["{}"]}}"#, id)).unwrap();
        assert_eq!(msg, ClientMessage::Ack { ids: vec![id] });
    }
}
