//! Multi-replica scenarios over the in-memory relay.

use choreo_core::{
    DragStart, EditorConfig, EditorSession, Formation, FormationReplica, MemoryRelay,
    MemoryTransport, Performer, Position, UndoSettings,
};
use std::time::Duration;

fn no_merge() -> UndoSettings {
    UndoSettings {
        max_steps: 100,
        merge_interval_ms: 0,
    }
}

fn config() -> EditorConfig {
    EditorConfig {
        crdt_undo_merge_interval_ms: 0,
        ..Default::default()
    }
}

fn duet() -> Formation {
    let mut formation = Formation::new("Duet");
    formation.performers.push(Performer::with_id("p1", "Ana", "A", "#ff0000"));
    formation.performers.push(Performer::with_id("p2", "Ben", "B", "#0000ff"));
    formation.keyframes[0].positions.insert("p1".into(), Position::new(25.0, 50.0));
    formation.keyframes[0].positions.insert("p2".into(), Position::new(75.0, 50.0));
    formation
}

/// Two replicas in the same room, fully synced.
fn joined_pair(relay: &MemoryRelay) -> (FormationReplica, MemoryTransport, FormationReplica, MemoryTransport) {
    let mut ta = relay.connect();
    let mut tb = relay.connect();
    let mut a = FormationReplica::new(&duet(), no_merge()).unwrap();
    let mut b = FormationReplica::joining(no_merge());
    a.set_peer_id(1).unwrap();
    b.set_peer_id(2).unwrap();

    a.join_room("studio");
    a.sync_with(&mut ta).unwrap();
    b.join_room("studio");
    b.sync_with(&mut tb).unwrap();
    a.sync_with(&mut ta).unwrap();
    assert_eq!(a.snapshot(), b.snapshot());
    (a, ta, b, tb)
}

fn first_keyframe(replica: &FormationReplica) -> String {
    replica.snapshot().keyframes[0].id().to_string()
}

#[test]
fn test_concurrent_moves_converge() {
    let relay = MemoryRelay::new();
    let (mut a, mut ta, mut b, mut tb) = joined_pair(&relay);
    let kf = first_keyframe(&a);

    // Neither side sees the other's write before making its own.
    a.update_position(&kf, "p1", Position::new(20.0, 20.0)).unwrap();
    b.update_position(&kf, "p1", Position::new(80.0, 80.0)).unwrap();
    a.sync_with(&mut ta).unwrap();
    b.sync_with(&mut tb).unwrap();
    a.sync_with(&mut ta).unwrap();

    let on_a = a.snapshot();
    let on_b = b.snapshot();
    assert_eq!(on_a, on_b);
    // Equal clocks: the higher peer id wins.
    assert_eq!(on_a.keyframes[0].position("p1"), Some(Position::new(80.0, 80.0)));
}

#[test]
fn test_drag_lock_between_sessions() {
    let relay = MemoryRelay::new();
    let mut ta = relay.connect();
    let mut tb = relay.connect();

    let mut sa = EditorSession::collaborative(FormationReplica::new(&duet(), no_merge()).unwrap(), &config());
    let mut sb = EditorSession::collaborative(FormationReplica::joining(no_merge()), &config());
    {
        let replica = sa.replica_mut().unwrap();
        replica.set_peer_id(1).unwrap();
        replica.set_user(Some("alice".into()), None);
        replica.join_room("studio");
    }
    {
        let replica = sb.replica_mut().unwrap();
        replica.set_peer_id(2).unwrap();
        replica.set_user(Some("bob".into()), None);
        replica.join_room("studio");
    }
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();
    sa.pump(&mut ta).unwrap();
    assert!(sb.formation().has_performer("p1"));

    assert_eq!(sa.handle_drag_start("p1"), DragStart::Started);
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();

    let status = sb.is_performer_being_dragged("p1");
    assert!(status.dragging);
    assert_eq!(status.by.as_deref(), Some("alice"));
    assert_eq!(
        sb.handle_drag_start("p1"),
        DragStart::Refused { by: Some("alice".into()) }
    );
    // Other performers stay free.
    assert_eq!(sb.handle_drag_start("p2"), DragStart::Started);
    assert!(sb.handle_drag_end());

    // A's own drag does not block A.
    assert!(!sa.is_performer_being_dragged("p1").dragging);
    assert!(sa.handle_drag_move(Position::new(30.0, 40.0)));
    assert!(sa.handle_drag_end());
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();

    assert!(!sb.is_performer_being_dragged("p1").dragging);
    assert_eq!(sb.current_positions().get("p1"), Some(&Position::new(30.0, 40.0)));
    assert_eq!(sb.handle_drag_start("p1"), DragStart::Started);
}

#[test]
fn test_offline_edits_replay_on_reconnect() {
    let relay = MemoryRelay::new();
    let (mut a, mut ta, mut b, mut tb) = joined_pair(&relay);
    let kf = first_keyframe(&a);

    ta.disconnect();
    a.sync_with(&mut ta).unwrap();
    assert!(!a.is_in_room());

    a.update_position(&kf, "p1", Position::new(5.0, 5.0)).unwrap();
    assert!(a.has_unsynced_changes());
    b.update_position(&kf, "p2", Position::new(95.0, 95.0)).unwrap();
    b.sync_with(&mut tb).unwrap();

    ta.reconnect();
    a.sync_with(&mut ta).unwrap();
    a.sync_with(&mut ta).unwrap();
    assert_eq!(a.current_room(), Some("studio"));
    assert!(!a.has_unsynced_changes());
    b.sync_with(&mut tb).unwrap();

    for replica in [&a, &b] {
        let keyframe = &replica.snapshot().keyframes[0];
        assert_eq!(keyframe.position("p1"), Some(Position::new(5.0, 5.0)));
        assert_eq!(keyframe.position("p2"), Some(Position::new(95.0, 95.0)));
    }
}

#[test]
fn test_concurrent_remove_and_move_leave_no_dangling_positions() {
    let relay = MemoryRelay::new();
    let (mut a, mut ta, mut b, mut tb) = joined_pair(&relay);
    let kf = first_keyframe(&a);

    assert!(a.remove_performer("p2").unwrap());
    assert!(b.update_position(&kf, "p2", Position::new(10.0, 90.0)).unwrap());
    a.sync_with(&mut ta).unwrap();
    b.sync_with(&mut tb).unwrap();
    a.sync_with(&mut ta).unwrap();

    for replica in [&a, &b] {
        let formation = replica.snapshot();
        assert!(!formation.has_performer("p2"));
        for keyframe in &formation.keyframes {
            assert!(keyframe.positions.keys().all(|id| formation.has_performer(id)));
        }
    }
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn test_late_joiner_receives_room_state() {
    let relay = MemoryRelay::new();
    let (mut a, mut ta, _b, _tb) = joined_pair(&relay);
    let kf = first_keyframe(&a);
    a.update_position(&kf, "p1", Position::new(60.0, 10.0)).unwrap();
    a.sync_with(&mut ta).unwrap();

    let mut tc = relay.connect();
    let mut c = FormationReplica::joining(no_merge());
    c.set_peer_id(3).unwrap();
    c.join_room("studio");
    assert!(c.sync_with(&mut tc).unwrap());
    assert_eq!(c.snapshot(), a.snapshot());
    assert_eq!(relay.peer_count("studio"), 3);
}

#[test]
fn test_drag_lock_outlives_presence_timeout() {
    let config = EditorConfig {
        presence_timeout_secs: 1,
        ..config()
    };
    let relay = MemoryRelay::new();
    let mut ta = relay.connect();
    let mut tb = relay.connect();
    let mut sa = EditorSession::collaborative(FormationReplica::new(&duet(), no_merge()).unwrap(), &config);
    let mut sb = EditorSession::collaborative(FormationReplica::joining(no_merge()), &config);
    sa.replica_mut().unwrap().join_room("studio");
    sb.replica_mut().unwrap().join_room("studio");
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();
    sa.pump(&mut ta).unwrap();

    assert_eq!(sa.handle_drag_start("p1"), DragStart::Started);
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();
    assert!(sb.is_performer_being_dragged("p1").dragging);

    // Hold the drag well past the timeout without any other awareness change.
    let interval = sa.replica().unwrap().heartbeat_interval();
    for _ in 0..4 {
        std::thread::sleep(interval + Duration::from_millis(50));
        sa.pump(&mut ta).unwrap();
        sb.pump(&mut tb).unwrap();
        assert!(sb.is_performer_being_dragged("p1").dragging);
    }

    assert!(sa.handle_drag_end());
    sa.pump(&mut ta).unwrap();
    sb.pump(&mut tb).unwrap();
    assert!(!sb.is_performer_being_dragged("p1").dragging);
}
