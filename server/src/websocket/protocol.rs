//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use liquidata_engine::{Snapshot, Version};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current snapshot summary.
    Current {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The record cache published a new snapshot.
    Snapshot {
        /// Snapshot version, strictly increasing
        version: Version,
        /// Number of records in the snapshot
        total: usize,
        /// Request ID when answering a `current` request
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    /// Summarize a snapshot for push notification.
    pub fn snapshot(snapshot: &Snapshot) -> Self {
        ServerMessage::Snapshot {
            version: snapshot.version(),
            total: snapshot.len(),
            request_id: None,
        }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidata_engine::Record;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type": "current", "request_id": "req-7"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Current { request_id } => {
                assert_eq!(request_id, Some("req-7".to_string()));
            }
            _ => panic!("Expected Current message"),
        }

        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::Pong;
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let snapshot = Snapshot::new(4, vec![Record::new(1), Record::new(2)]);
        let json = serde_json::to_string(&ServerMessage::snapshot(&snapshot)).unwrap();
        assert_eq!(json, r#"{"type":"snapshot","version":4,"total":2}"#);

        let json = serde_json::to_string(&ServerMessage::error("bad frame")).unwrap();
        assert!(json.contains(r#""message":"bad frame""#));
    }
}
