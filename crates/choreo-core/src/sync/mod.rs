//! Wire protocol and transport contract for collaboration.
//!
//! Clients exchange JSON messages with a relay that fans them out to the other
//! members of a room. CRDT payloads travel base64 encoded inside those
//! messages. The relay also keeps its own merged copy of each room's document
//! so late joiners and reconnecting clients can catch up in one message.

mod memory;

pub use memory::{MemoryRelay, MemoryTransport};

use crate::formation::PerformerId;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Sync CRDT data (base64 encoded Loro bytes)
    Sync { data: String },
    /// Presence update (cursor, selection, drag lock)
    Awareness {
        peer_id: u64,
        #[serde(flatten)]
        state: AwarenessState,
    },
}

/// Messages received from the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Merged room document (if the room has history)
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    /// Peer joined the room
    PeerJoined { peer_id: String },
    /// Peer left the room
    PeerLeft { peer_id: String },
    /// Sync data from another peer
    Sync { from: String, data: String },
    /// Presence update from another peer
    Awareness {
        from: String,
        peer_id: u64,
        #[serde(flatten)]
        state: AwarenessState,
    },
    /// Error message
    Error { message: String },
}

impl ServerMessage {
    /// Decode into a transport event. Fails when a CRDT payload is not valid
    /// base64.
    pub fn into_event(self) -> Result<SyncEvent, base64::DecodeError> {
        let event = match self {
            ServerMessage::Joined { room, peer_count, initial_sync } => SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync: initial_sync.map(|s| STANDARD.decode(s)).transpose()?,
            },
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Sync { from, data } => SyncEvent::SyncReceived {
                from,
                data: STANDARD.decode(data)?,
            },
            ServerMessage::Awareness { from, peer_id, state } => {
                SyncEvent::AwarenessReceived { from, peer_id, state }
            }
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Ok(event)
    }
}

/// Ephemeral per-user state broadcast to the room. Never stored in the
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AwarenessState {
    /// Stable user identity, when the host has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User name/color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    /// Cursor position on stage (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_performer_ids: Vec<PerformerId>,
    /// Performer this user is dragging. Acts as an advisory lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dragging_performer_id: Option<PerformerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: String,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected to the relay
    Connected,
    /// Disconnected from the relay
    Disconnected,
    /// Joined a room
    JoinedRoom { room: String, peer_count: usize, initial_sync: Option<Vec<u8>> },
    /// A peer joined the room
    PeerJoined { peer_id: String },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// Received sync data from a peer
    SyncReceived { from: String, data: Vec<u8> },
    /// Received presence from a peer
    AwarenessReceived { from: String, peer_id: u64, state: AwarenessState },
    /// Error reported by the relay or the transport
    Error { message: String },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Bidirectional message channel to a relay.
///
/// Implementations are polled from the editor's thread; they never call
/// back into the caller.
pub trait Transport {
    /// Send a JSON-encoded [`ClientMessage`].
    fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<SyncEvent>;

    /// Get current connection state.
    fn state(&self) -> ConnectionState;

    /// Check if connected.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Base64 decoding
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    STANDARD.decode(input).ok()
}

/// Base64 encoding
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_payload_base64() {
        let payload = [0u8, 255, 16, 1];
        let encoded = base64_encode(&payload);
        assert_eq!(encoded, "AP8QAQ==");
        assert_eq!(base64_decode(&encoded).as_deref(), Some(&payload[..]));
        assert!(base64_decode("%%%").is_none());
    }

    #[test]
    fn test_join_wire_format() {
        let msg = ClientMessage::Join { room: "rehearsal".to_string() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"join","room":"rehearsal"}"#);
    }

    #[test]
    fn test_awareness_flattens_presence() {
        let msg = ClientMessage::Awareness {
            peer_id: 7,
            state: AwarenessState {
                dragging_performer_id: Some("p1".into()),
                selected_performer_ids: vec!["p1".into(), "p2".into()],
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "awareness");
        assert_eq!(value["dragging_performer_id"], "p1");
        assert!(value.get("cursor").is_none());
    }

    #[test]
    fn test_joined_without_history() {
        let json = r#"{"type":"joined","room":"finale","peer_count":2}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg.into_event() {
            Ok(SyncEvent::JoinedRoom { room, peer_count, initial_sync }) => {
                assert_eq!(room, "finale");
                assert_eq!(peer_count, 2);
                assert!(initial_sync.is_none());
            }
            other => panic!("Wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_awareness_without_presence_fields() {
        let json = r#"{"type":"awareness","from":"c1","peer_id":3,"cursor":{"x":1.0,"y":2.0}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let Ok(SyncEvent::AwarenessReceived { state, .. }) = msg.into_event() else {
            panic!("expected awareness");
        };
        assert_eq!(state.cursor, Some(CursorPosition { x: 1.0, y: 2.0 }));
        assert!(state.selected_performer_ids.is_empty());
        assert!(state.dragging_performer_id.is_none());
    }

    #[test]
    fn test_corrupt_payloads_fail_to_decode() {
        let msg = ServerMessage::Sync { from: "c1".into(), data: "%%%".into() };
        assert!(msg.into_event().is_err());
        let msg = ServerMessage::Joined {
            room: "finale".into(),
            peer_count: 1,
            initial_sync: Some("%%%".into()),
        };
        assert!(msg.into_event().is_err());
    }
}
