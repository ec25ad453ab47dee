//! In-process relay and transport.
//!
//! Behaves like the websocket relay: rooms, fan-out to other peers, and a
//! merged copy of each room's document for late joiners. Used by tests and by
//! single-process hosts that run several editors side by side.

use super::{
    ClientMessage, ConnectionState, ServerMessage, SyncEvent, Transport, TransportError,
    base64_decode, base64_encode,
};
use loro::{ExportMode, LoroDoc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

type ConnectionId = String;

/// Room state
struct Room {
    /// Connected peer IDs
    peers: HashSet<ConnectionId>,
    /// Every sync payload seen in this room, merged.
    doc: LoroDoc,
    has_history: bool,
}

impl Room {
    fn new() -> Self {
        Self {
            peers: HashSet::new(),
            doc: LoroDoc::new(),
            has_history: false,
        }
    }
}

enum Inbound {
    /// JSON-encoded `ServerMessage`, as it would arrive on a socket.
    Wire(String),
    /// Connection lifecycle event raised by the transport itself.
    Local(SyncEvent),
}

struct Connection {
    state: ConnectionState,
    room: Option<String>,
    inbox: VecDeque<Inbound>,
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<String, Room>,
    connections: HashMap<ConnectionId, Connection>,
    next_connection: u64,
}

impl RelayState {
    fn deliver(&mut self, to: &str, msg: &ServerMessage) {
        let Some(connection) = self.connections.get_mut(to) else {
            return;
        };
        match serde_json::to_string(msg) {
            Ok(json) => connection.inbox.push_back(Inbound::Wire(json)),
            Err(e) => log::error!("Failed to encode relay message: {}", e),
        }
    }

    /// Broadcast message to everyone in a room except `from`.
    fn broadcast(&mut self, room_id: &str, from: &str, msg: &ServerMessage) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let targets: Vec<ConnectionId> = room.peers.iter().filter(|p| p.as_str() != from).cloned().collect();
        for target in targets {
            self.deliver(&target, msg);
        }
    }

    fn join_room(&mut self, room_id: &str, peer_id: &str) {
        self.leave_room(peer_id);

        let room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        let peer_count = room.peers.len();
        let initial_sync = if room.has_history {
            room.doc.export(ExportMode::Snapshot).ok().map(|bytes| base64_encode(&bytes))
        } else {
            None
        };
        if let Some(connection) = self.connections.get_mut(peer_id) {
            connection.room = Some(room_id.to_string());
        }

        log::info!("Peer {} joined room {} ({} peers)", peer_id, room_id, peer_count);
        self.deliver(
            peer_id,
            &ServerMessage::Joined {
                room: room_id.to_string(),
                peer_count,
                initial_sync,
            },
        );
        self.broadcast(
            room_id,
            peer_id,
            &ServerMessage::PeerJoined {
                peer_id: peer_id.to_string(),
            },
        );
    }

    fn leave_room(&mut self, peer_id: &str) {
        let Some(room_id) = self.connections.get_mut(peer_id).and_then(|c| c.room.take()) else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.peers.remove(peer_id);
        }
        log::info!("Peer {} left room {}", peer_id, room_id);
        self.broadcast(
            &room_id,
            peer_id,
            &ServerMessage::PeerLeft {
                peer_id: peer_id.to_string(),
            },
        );
    }

    fn handle(&mut self, peer_id: &str, msg: ClientMessage) {
        match msg {
            ClientMessage::Join { room } => self.join_room(&room, peer_id),
            ClientMessage::Leave => self.leave_room(peer_id),
            ClientMessage::Sync { data } => {
                let Some(room_id) = self.connections.get(peer_id).and_then(|c| c.room.clone()) else {
                    self.reply_error(peer_id, "Not in a room");
                    return;
                };
                let imported = match (base64_decode(&data), self.rooms.get_mut(&room_id)) {
                    (Some(bytes), Some(room)) => match room.doc.import(&bytes) {
                        Ok(_) => {
                            room.has_history = true;
                            true
                        }
                        Err(e) => {
                            log::warn!("Rejected sync from {}: {}", peer_id, e);
                            false
                        }
                    },
                    _ => false,
                };
                if imported {
                    self.broadcast(
                        &room_id,
                        peer_id,
                        &ServerMessage::Sync {
                            from: peer_id.to_string(),
                            data,
                        },
                    );
                } else {
                    self.reply_error(peer_id, "Invalid sync payload");
                }
            }
            ClientMessage::Awareness { peer_id: crdt_peer, state } => {
                let Some(room_id) = self.connections.get(peer_id).and_then(|c| c.room.clone()) else {
                    return;
                };
                self.broadcast(
                    &room_id,
                    peer_id,
                    &ServerMessage::Awareness {
                        from: peer_id.to_string(),
                        peer_id: crdt_peer,
                        state,
                    },
                );
            }
        }
    }

    fn reply_error(&mut self, peer_id: &str, message: &str) {
        self.deliver(
            peer_id,
            &ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }
}

/// A relay shared by every [`MemoryTransport`] it hands out.
///
/// Rooms keep their merged document after the last peer leaves, so a client
/// reconnecting to an empty room still catches up.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Rc<RefCell<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection. It starts connected with a `Connected` event
    /// pending.
    pub fn connect(&self) -> MemoryTransport {
        let mut state = self.state.borrow_mut();
        state.next_connection += 1;
        let id = format!("conn-{}", state.next_connection);
        let mut inbox = VecDeque::new();
        inbox.push_back(Inbound::Local(SyncEvent::Connected));
        state.connections.insert(
            id.clone(),
            Connection {
                state: ConnectionState::Connected,
                room: None,
                inbox,
            },
        );
        MemoryTransport {
            relay: self.clone(),
            id,
        }
    }

    /// Number of connections currently in `room`.
    pub fn peer_count(&self, room: &str) -> usize {
        self.state.borrow().rooms.get(room).map_or(0, |r| r.peers.len())
    }

    /// Snapshot of the room's merged document, if anything was synced to it.
    pub fn room_snapshot(&self, room: &str) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        let room = state.rooms.get(room).filter(|r| r.has_history)?;
        room.doc.export(ExportMode::Snapshot).ok()
    }
}

/// One client's end of a [`MemoryRelay`].
pub struct MemoryTransport {
    relay: MemoryRelay,
    id: ConnectionId,
}

impl MemoryTransport {
    /// Relay-assigned connection id (the `from` other peers see).
    pub fn connection_id(&self) -> &str {
        &self.id
    }

    /// Drop the connection. Anything queued for this client is lost and the
    /// room sees it leave.
    pub fn disconnect(&mut self) {
        let mut state = self.relay.state.borrow_mut();
        state.leave_room(&self.id);
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.state = ConnectionState::Disconnected;
            connection.inbox.clear();
            connection.inbox.push_back(Inbound::Local(SyncEvent::Disconnected));
        }
    }

    /// Re-establish a dropped or failed connection. The transport reports
    /// `Connecting` until the `Connected` event is polled, and the client must
    /// join a room again.
    pub fn reconnect(&mut self) {
        let mut state = self.relay.state.borrow_mut();
        if let Some(connection) = state.connections.get_mut(&self.id) {
            if matches!(connection.state, ConnectionState::Disconnected | ConnectionState::Error) {
                connection.state = ConnectionState::Connecting;
                connection.inbox.push_back(Inbound::Local(SyncEvent::Connected));
            }
        }
    }

    /// Break the connection with an error, as a socket failure would. Pending
    /// messages are lost and the room sees this client leave.
    pub fn fail(&mut self, message: &str) {
        let mut state = self.relay.state.borrow_mut();
        state.leave_room(&self.id);
        if let Some(connection) = state.connections.get_mut(&self.id) {
            log::warn!("Connection {} failed: {}", self.id, message);
            connection.state = ConnectionState::Error;
            connection.inbox.clear();
            connection.inbox.push_back(Inbound::Local(SyncEvent::Error {
                message: message.to_string(),
            }));
            connection.inbox.push_back(Inbound::Local(SyncEvent::Disconnected));
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.relay.state.borrow_mut();
        match serde_json::from_str::<ClientMessage>(message) {
            Ok(msg) => {
                state.handle(&self.id, msg);
                Ok(())
            }
            Err(e) => {
                state.reply_error(&self.id, &format!("Invalid message: {e}"));
                Err(TransportError::InvalidMessage(e.to_string()))
            }
        }
    }

    fn poll_events(&mut self) -> Vec<SyncEvent> {
        let inbox = {
            let mut state = self.relay.state.borrow_mut();
            match state.connections.get_mut(&self.id) {
                Some(connection) => {
                    if connection.state == ConnectionState::Connecting {
                        connection.state = ConnectionState::Connected;
                    }
                    std::mem::take(&mut connection.inbox)
                }
                None => return Vec::new(),
            }
        };
        inbox
            .into_iter()
            .filter_map(|inbound| match inbound {
                Inbound::Local(event) => Some(event),
                Inbound::Wire(json) => match serde_json::from_str::<ServerMessage>(&json) {
                    Ok(msg) => Some(msg.into_event().unwrap_or_else(|e| SyncEvent::Error {
                        message: format!("Invalid payload: {e}"),
                    })),
                    Err(e) => {
                        log::warn!("Failed to parse server message: {}", e);
                        None
                    }
                },
            })
            .collect()
    }

    fn state(&self) -> ConnectionState {
        self.relay
            .state
            .borrow()
            .connections
            .get(&self.id)
            .map_or(ConnectionState::Disconnected, |c| c.state)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Ok(mut state) = self.relay.state.try_borrow_mut() {
            state.leave_room(&self.id);
            state.connections.remove(&self.id);
        }
    }
}
