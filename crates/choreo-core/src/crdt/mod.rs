//! CRDT integration using Loro for collaborative editing.
//!
//! This module bridges the formation model and Loro's CRDT document. Local
//! edits go in as [`FormationOp`]s through [`CrdtFormation::apply`]; the merged
//! state comes back out as a plain [`Formation`](crate::Formation) through
//! [`CrdtFormation::snapshot`]. Nothing outside this module touches Loro
//! containers directly.
//!
//! Every position field is its own map entry, so concurrent moves of
//! different performers (or different axes of one performer) merge without
//! loss. Concurrent writes to the same field resolve last-writer-wins by
//! Lamport timestamp, ties going to the higher peer id.

mod convert;
mod op;
mod schema;

pub use convert::{
    audio_from_loro, audio_to_loro, keyframe_from_loro, keyframe_to_loro, meta_from_loro,
    meta_to_loro, performer_from_loro, performer_to_loro, position_from_loro, position_to_loro,
};
pub use op::FormationOp;
pub use schema::{
    AUDIO_KEY, CrdtFormation, KEYFRAMES_KEY, META_KEY, PERFORMER_ORDER_KEY, PERFORMERS_KEY,
    UndoSettings,
};

// Re-export Loro types that may be useful for collaboration
pub use loro::{ExportMode, VersionVector};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::{
        AudioTrack, Formation, Keyframe, MetaUpdate, Performer, PerformerUpdate, Position,
        PositionMap, Transition,
    };

    fn no_merge() -> UndoSettings {
        UndoSettings {
            max_steps: 100,
            merge_interval_ms: 0,
        }
    }

    fn sample_formation() -> Formation {
        let mut formation = Formation::new("Opening");
        formation.performers.push(Performer::with_id("p1", "Ana", "A", "#f00"));
        formation.performers.push(Performer::with_id("p2", "Ben", "B", "#0f0"));
        formation.keyframes[0].positions.insert("p1".into(), Position::new(10.0, 10.0));
        formation.keyframes[0].positions.insert("p2".into(), Position::new(90.0, 10.0));
        let mut end = Keyframe::with_id("k-end", 1000);
        end.transition = Some(Transition::EaseOut);
        end.positions.insert("p1".into(), Position::with_rotation(10.0, 90.0, 45.0));
        end.positions.insert("p2".into(), Position::new(90.0, 90.0));
        formation.keyframes.push(end);
        formation
    }

    fn first_keyframe_id(crdt: &CrdtFormation) -> String {
        crdt.snapshot().keyframes[0].id().to_string()
    }

    #[test]
    fn test_empty_document() {
        let crdt = CrdtFormation::new();
        assert!(crdt.is_empty());
        assert_eq!(crdt.performer_count(), 0);
        assert!(crdt.snapshot().keyframes.is_empty());
    }

    #[test]
    fn test_seed_and_snapshot_roundtrip() {
        let original = sample_formation();
        let crdt = CrdtFormation::from_formation(&original, no_merge()).unwrap();

        assert_eq!(crdt.formation_id().as_deref(), Some(original.id.as_str()));
        assert!(!crdt.can_undo());

        let snapshot = crdt.snapshot();
        assert_eq!(snapshot, original);
    }

    #[test]
    fn test_add_performer_places_in_every_keyframe() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let performer = Performer::with_id("p3", "Cy", "C", "#00f");
        let op = FormationOp::AddPerformer {
            performer: performer.clone(),
            position: Position::new(50.0, 50.0),
        };
        assert!(crdt.apply(&op).unwrap());
        assert!(!crdt.apply(&op).unwrap());

        let snapshot = crdt.snapshot();
        assert_eq!(snapshot.performers.last(), Some(&performer));
        for keyframe in &snapshot.keyframes {
            assert_eq!(keyframe.position("p3"), Some(Position::new(50.0, 50.0)));
        }
    }

    #[test]
    fn test_remove_performer_cascades() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let op = FormationOp::RemovePerformer { performer_id: "p1".into() };
        assert!(crdt.apply(&op).unwrap());

        let snapshot = crdt.snapshot();
        assert_eq!(snapshot.performer_ids(), vec!["p2".to_string()]);
        assert!(snapshot.keyframes.iter().all(|k| k.position("p1").is_none()));
        assert!(!crdt.apply(&op).unwrap());
    }

    #[test]
    fn test_update_position_and_performer() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let keyframe_id = first_keyframe_id(&crdt);

        let moved = FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p2".into(),
            position: Position::with_rotation(70.0, 20.0, 180.0),
        };
        assert!(crdt.apply(&moved).unwrap());

        let renamed = FormationOp::UpdatePerformer {
            performer_id: "p2".into(),
            update: PerformerUpdate {
                name: Some("Benji".into()),
                group: Some(Some("back".into())),
                ..Default::default()
            },
        };
        assert!(crdt.apply(&renamed).unwrap());

        let snapshot = crdt.snapshot();
        assert_eq!(
            snapshot.keyframe(&keyframe_id).unwrap().position("p2"),
            Some(Position::with_rotation(70.0, 20.0, 180.0))
        );
        let performer = snapshot.performer("p2").unwrap();
        assert_eq!(performer.name, "Benji");
        assert_eq!(performer.group.as_deref(), Some("back"));

        let ghost = FormationOp::UpdatePosition {
            keyframe_id,
            performer_id: "ghost".into(),
            position: Position::center(),
        };
        assert!(!crdt.apply(&ghost).unwrap());
    }

    #[test]
    fn test_keyframe_ops_keep_order() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut middle = Keyframe::with_id("k-mid", 500);
        middle.positions.insert("p1".into(), Position::new(10.0, 50.0));
        middle.positions.insert("ghost".into(), Position::new(0.0, 0.0));
        assert!(crdt.apply(&FormationOp::AddKeyframe { keyframe: middle }).unwrap());

        let snapshot = crdt.snapshot();
        assert_eq!(snapshot.keyframes[1].id(), "k-mid");
        assert!(snapshot.keyframes[1].position("ghost").is_none());

        let moved = FormationOp::MoveKeyframe { keyframe_id: "k-mid".into(), timestamp: 2000 };
        assert!(crdt.apply(&moved).unwrap());
        let snapshot = crdt.snapshot();
        assert!(snapshot.keyframes_sorted());
        assert_eq!(snapshot.keyframes[2].id(), "k-mid");

        let transition = FormationOp::SetTransition {
            keyframe_id: "k-mid".into(),
            transition: Some(Transition::EaseInOut),
        };
        assert!(crdt.apply(&transition).unwrap());
        assert_eq!(crdt.snapshot().keyframes[2].transition, Some(Transition::EaseInOut));

        assert!(crdt.apply(&FormationOp::RemoveKeyframe { keyframe_id: "k-mid".into() }).unwrap());
        assert_eq!(crdt.keyframe_count(), 2);
    }

    #[test]
    fn test_cannot_remove_last_keyframe() {
        let mut crdt = CrdtFormation::from_formation(&Formation::new("Solo"), no_merge()).unwrap();
        let only = first_keyframe_id(&crdt);
        assert!(!crdt.apply(&FormationOp::RemoveKeyframe { keyframe_id: only }).unwrap());
        assert_eq!(crdt.keyframe_count(), 1);
    }

    #[test]
    fn test_set_keyframe_positions_replaces() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut positions = PositionMap::new();
        positions.insert("p1".into(), Position::new(33.0, 33.0));
        let op = FormationOp::SetKeyframePositions { keyframe_id: "k-end".into(), positions };
        assert!(crdt.apply(&op).unwrap());

        let keyframe = crdt.snapshot().keyframe("k-end").cloned().unwrap();
        assert_eq!(keyframe.positions.len(), 1);
        assert_eq!(keyframe.position("p1"), Some(Position::new(33.0, 33.0)));
    }

    #[test]
    fn test_meta_and_audio() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let update = MetaUpdate {
            name: Some("Finale".into()),
            description: Some(Some("Big finish".into())),
            grid_size: Some(4.0),
            ..Default::default()
        };
        assert!(crdt.apply(&FormationOp::UpdateMeta(update)).unwrap());

        let track = AudioTrack {
            id: "a1".into(),
            url: "https://example.invalid/track.mp3".into(),
            filename: "track.mp3".into(),
            duration_ms: 5000,
        };
        crdt.apply(&FormationOp::SetAudioTrack(Some(track.clone()))).unwrap();

        let snapshot = crdt.snapshot();
        assert_eq!(snapshot.name, "Finale");
        assert_eq!(snapshot.description.as_deref(), Some("Big finish"));
        assert_eq!(snapshot.grid_size, 4.0);
        assert_eq!(snapshot.audio_track, Some(track));
        assert_eq!(snapshot.duration_ms(), 5000);

        crdt.apply(&FormationOp::SetAudioTrack(None)).unwrap();
        assert_eq!(crdt.snapshot().audio_track, None);
    }

    #[test]
    fn test_export_import() {
        let crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let bytes = crdt.export_snapshot();
        let copy = CrdtFormation::from_snapshot(&bytes, no_merge()).unwrap();
        assert_eq!(copy.snapshot(), crdt.snapshot());
    }

    #[test]
    fn test_concurrent_position_writes_converge() {
        let mut a = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut b = CrdtFormation::from_snapshot(&a.export_snapshot(), no_merge()).unwrap();
        a.set_peer_id(1).unwrap();
        b.set_peer_id(2).unwrap();

        let keyframe_id = first_keyframe_id(&a);
        let move_to = |x: f64| FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p1".into(),
            position: Position::new(x, 10.0),
        };
        a.apply(&move_to(20.0)).unwrap();
        b.apply(&move_to(80.0)).unwrap();

        let a_bytes = a.export_snapshot();
        let b_bytes = b.export_snapshot();
        a.import(&b_bytes).unwrap();
        b.import(&a_bytes).unwrap();

        let merged = a.snapshot();
        assert_eq!(merged, b.snapshot());
        assert_eq!(merged.keyframe(&keyframe_id).unwrap().position("p1").unwrap().x, 80.0);
    }

    #[test]
    fn test_concurrent_axis_edits_both_survive() {
        let mut a = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut b = CrdtFormation::from_snapshot(&a.export_snapshot(), no_merge()).unwrap();
        let keyframe_id = first_keyframe_id(&a);

        a.apply(&FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p1".into(),
            position: Position::new(40.0, 10.0),
        })
        .unwrap();
        b.apply(&FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p1".into(),
            position: Position::new(10.0, 60.0),
        })
        .unwrap();

        let a_bytes = a.export_snapshot();
        a.import(&b.export_snapshot()).unwrap();
        b.import(&a_bytes).unwrap();

        let position = a.snapshot().keyframe(&keyframe_id).unwrap().position("p1").unwrap();
        assert_eq!(position, Position::new(40.0, 60.0));
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_concurrent_remove_drops_dangling_positions() {
        let mut a = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut b = CrdtFormation::from_snapshot(&a.export_snapshot(), no_merge()).unwrap();

        a.apply(&FormationOp::RemovePerformer { performer_id: "p1".into() }).unwrap();
        let mut late = Keyframe::with_id("k-late", 3000);
        late.positions.insert("p1".into(), Position::center());
        b.apply(&FormationOp::AddKeyframe { keyframe: late }).unwrap();

        a.import(&b.export_snapshot()).unwrap();
        let snapshot = a.snapshot();
        assert!(!snapshot.has_performer("p1"));
        assert!(snapshot.keyframe("k-late").unwrap().positions.is_empty());
    }

    #[test]
    fn test_crdt_undo_redo_position() {
        let mut crdt = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let keyframe_id = first_keyframe_id(&crdt);
        crdt.apply(&FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p1".into(),
            position: Position::new(55.0, 55.0),
        })
        .unwrap();
        assert!(crdt.can_undo());

        assert!(crdt.undo());
        let position = |crdt: &CrdtFormation| {
            crdt.snapshot().keyframe(&keyframe_id).unwrap().position("p1").unwrap()
        };
        assert_eq!(position(&crdt), Position::new(10.0, 10.0));
        assert!(crdt.can_redo());

        assert!(crdt.redo());
        assert_eq!(position(&crdt), Position::new(55.0, 55.0));
    }

    #[test]
    fn test_crdt_undo_skips_remote_changes() {
        let mut a = CrdtFormation::from_formation(&sample_formation(), no_merge()).unwrap();
        let mut b = CrdtFormation::from_snapshot(&a.export_snapshot(), no_merge()).unwrap();
        let keyframe_id = first_keyframe_id(&a);

        a.apply(&FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p1".into(),
            position: Position::new(20.0, 10.0),
        })
        .unwrap();
        b.apply(&FormationOp::UpdatePosition {
            keyframe_id: keyframe_id.clone(),
            performer_id: "p2".into(),
            position: Position::new(70.0, 10.0),
        })
        .unwrap();
        a.import(&b.export_snapshot()).unwrap();

        assert!(a.undo());
        let keyframe = a.snapshot().keyframe(&keyframe_id).cloned().unwrap();
        assert_eq!(keyframe.position("p1"), Some(Position::new(10.0, 10.0)));
        assert_eq!(keyframe.position("p2"), Some(Position::new(70.0, 10.0)));
    }
}
