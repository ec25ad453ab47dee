//! Edits that can be applied to a replicated formation.

use crate::formation::{
    AudioTrack, Keyframe, KeyframeId, MetaUpdate, Performer, PerformerId, PerformerUpdate,
    Position, PositionMap, Transition,
};

/// One local edit. Applying an op commits it as a single CRDT change.
#[derive(Debug, Clone, PartialEq)]
pub enum FormationOp {
    UpdateMeta(MetaUpdate),
    SetAudioTrack(Option<AudioTrack>),
    /// Add a performer, placed at `position` in every existing keyframe.
    AddPerformer {
        performer: Performer,
        position: Position,
    },
    UpdatePerformer {
        performer_id: PerformerId,
        update: PerformerUpdate,
    },
    /// Remove a performer from the roster and from every keyframe.
    RemovePerformer {
        performer_id: PerformerId,
    },
    AddKeyframe {
        keyframe: Keyframe,
    },
    RemoveKeyframe {
        keyframe_id: KeyframeId,
    },
    MoveKeyframe {
        keyframe_id: KeyframeId,
        timestamp: u64,
    },
    SetTransition {
        keyframe_id: KeyframeId,
        transition: Option<Transition>,
    },
    UpdatePosition {
        keyframe_id: KeyframeId,
        performer_id: PerformerId,
        position: Position,
    },
    /// Replace every position of one keyframe.
    SetKeyframePositions {
        keyframe_id: KeyframeId,
        positions: PositionMap,
    },
}

impl FormationOp {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateMeta(_) => "update_meta",
            Self::SetAudioTrack(_) => "set_audio_track",
            Self::AddPerformer { .. } => "add_performer",
            Self::UpdatePerformer { .. } => "update_performer",
            Self::RemovePerformer { .. } => "remove_performer",
            Self::AddKeyframe { .. } => "add_keyframe",
            Self::RemoveKeyframe { .. } => "remove_keyframe",
            Self::MoveKeyframe { .. } => "move_keyframe",
            Self::SetTransition { .. } => "set_transition",
            Self::UpdatePosition { .. } => "update_position",
            Self::SetKeyframePositions { .. } => "set_keyframe_positions",
        }
    }
}
