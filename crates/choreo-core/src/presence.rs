//! Remote presence: who is in the room, where their cursor is, what they
//! have selected and which performer they are dragging.

use crate::sync::AwarenessState;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entries not refreshed within this window are considered stale.
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Answer to "is someone else dragging this performer?".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DragStatus {
    pub dragging: bool,
    /// User id of the dragging peer, or its connection id when it has none.
    pub by: Option<String>,
}

impl DragStatus {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn held_by(by: impl Into<String>) -> Self {
        Self {
            dragging: true,
            by: Some(by.into()),
        }
    }
}

/// Last known presence of one remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerPresence {
    /// Relay connection id.
    pub connection_id: String,
    /// Loro peer id of the remote replica.
    pub crdt_peer_id: u64,
    pub state: AwarenessState,
    pub last_seen: Instant,
}

impl PeerPresence {
    /// Name to report for this peer.
    pub fn identity(&self) -> &str {
        self.state.user_id.as_deref().unwrap_or(&self.connection_id)
    }
}

/// Remote presence keyed by connection id.
#[derive(Debug, Clone)]
pub struct PresenceManager {
    peers: HashMap<String, PeerPresence>,
    timeout: Duration,
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_TIMEOUT)
    }
}

impl PresenceManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, connection_id: &str) -> Option<&PeerPresence> {
        self.peers.get(connection_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerPresence> {
        self.peers.values()
    }

    /// Record an awareness broadcast. Replaces the previous state wholesale.
    pub fn update(&mut self, connection_id: &str, crdt_peer_id: u64, state: AwarenessState, now: Instant) {
        self.peers.insert(
            connection_id.to_string(),
            PeerPresence {
                connection_id: connection_id.to_string(),
                crdt_peer_id,
                state,
                last_seen: now,
            },
        );
    }

    pub fn remove(&mut self, connection_id: &str) -> Option<PeerPresence> {
        self.peers.remove(connection_id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Drop peers not heard from within the timeout. Returns their
    /// connection ids.
    pub fn prune_stale(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.timeout;
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > timeout)
            .map(|p| p.connection_id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
            log::debug!("Pruned stale presence for {}", id);
        }
        stale
    }

    /// Remote drag state of a performer. Ties between several peers claiming
    /// the same performer resolve to the smallest identity so every caller
    /// sees the same holder.
    pub fn drag_status(&self, performer_id: &str) -> DragStatus {
        self.peers
            .values()
            .filter(|p| p.state.dragging_performer_id.as_deref() == Some(performer_id))
            .map(PeerPresence::identity)
            .min()
            .map_or_else(DragStatus::free, DragStatus::held_by)
    }

    /// Remote peers that have `performer_id` selected.
    pub fn selected_by(&self, performer_id: &str) -> Vec<&PeerPresence> {
        self.peers
            .values()
            .filter(|p| p.state.selected_performer_ids.iter().any(|id| id == performer_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dragging(user: Option<&str>, performer: &str) -> AwarenessState {
        AwarenessState {
            user_id: user.map(str::to_string),
            dragging_performer_id: Some(performer.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_drag_status_reports_user_id() {
        let mut presence = PresenceManager::default();
        let now = Instant::now();
        presence.update("conn-1", 1, dragging(Some("alice"), "p1"), now);

        assert_eq!(presence.drag_status("p1"), DragStatus::held_by("alice"));
        assert_eq!(presence.drag_status("p2"), DragStatus::free());
    }

    #[test]
    fn test_drag_status_falls_back_to_connection() {
        let mut presence = PresenceManager::default();
        presence.update("conn-7", 7, dragging(None, "p1"), Instant::now());
        assert_eq!(presence.drag_status("p1").by.as_deref(), Some("conn-7"));
    }

    #[test]
    fn test_update_replaces_state() {
        let mut presence = PresenceManager::default();
        let now = Instant::now();
        presence.update("conn-1", 1, dragging(None, "p1"), now);
        presence.update("conn-1", 1, AwarenessState::default(), now);

        assert_eq!(presence.len(), 1);
        assert!(!presence.drag_status("p1").dragging);
    }

    #[test]
    fn test_remove_releases_drag() {
        let mut presence = PresenceManager::default();
        presence.update("conn-1", 1, dragging(None, "p1"), Instant::now());
        assert!(presence.remove("conn-1").is_some());
        assert!(!presence.drag_status("p1").dragging);
        assert!(presence.is_empty());
    }

    #[test]
    fn test_prune_stale() {
        let mut presence = PresenceManager::new(Duration::from_secs(10));
        let start = Instant::now();
        presence.update("old", 1, AwarenessState::default(), start);
        presence.update("fresh", 2, AwarenessState::default(), start + Duration::from_secs(8));

        let pruned = presence.prune_stale(start + Duration::from_secs(15));
        assert_eq!(pruned, vec!["old".to_string()]);
        assert!(presence.get("fresh").is_some());
    }

    #[test]
    fn test_selected_by() {
        let mut presence = PresenceManager::default();
        let state = AwarenessState {
            selected_performer_ids: vec!["p1".into(), "p2".into()],
            ..Default::default()
        };
        presence.update("conn-1", 1, state, Instant::now());
        assert_eq!(presence.selected_by("p2").len(), 1);
        assert!(presence.selected_by("p3").is_empty());
    }
}
