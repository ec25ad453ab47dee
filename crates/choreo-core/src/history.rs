//! Bounded undo/redo history of keyframe position snapshots.
//!
//! History is scoped to the active formation and keyframe: callers `reset`
//! it whenever either changes. The stacks hold whole snapshots rather than
//! deltas, so undo never has to invert an edit.

use crate::formation::{Keyframe, PerformerId, PositionMap};
use std::collections::VecDeque;

/// Default number of undo states to keep.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Editable state of one keyframe at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistorySnapshot {
    pub positions: PositionMap,
    pub performer_ids: Vec<PerformerId>,
    /// Human-readable name of the edit that produced this state.
    pub label: String,
}

impl HistorySnapshot {
    pub fn new(positions: PositionMap, performer_ids: Vec<PerformerId>, label: impl Into<String>) -> Self {
        Self {
            positions,
            performer_ids,
            label: label.into(),
        }
    }

    /// Snapshot a keyframe against the given performer roster.
    pub fn of_keyframe(keyframe: &Keyframe, performer_ids: Vec<PerformerId>, label: impl Into<String>) -> Self {
        Self::new(keyframe.positions.clone(), performer_ids, label)
    }
}

/// Undo/redo stacks around a current snapshot.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    current: HistorySnapshot,
    undo_stack: VecDeque<HistorySnapshot>,
    redo_stack: Vec<HistorySnapshot>,
    capacity: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryManager {
    /// Create an empty history holding at most `capacity` undo states.
    pub fn new(capacity: usize) -> Self {
        Self {
            current: HistorySnapshot::default(),
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The state the editor is currently showing.
    pub fn current(&self) -> &HistorySnapshot {
        &self.current
    }

    /// Clear both stacks and start over from `initial`.
    pub fn reset(&mut self, initial: HistorySnapshot) {
        self.current = initial;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Record a new state. The previous state becomes undoable and any redo
    /// branch is discarded.
    pub fn push_state(&mut self, snapshot: HistorySnapshot) {
        let previous = std::mem::replace(&mut self.current, snapshot);
        self.undo_stack.push_back(previous);
        self.redo_stack.clear();

        while self.undo_stack.len() > self.capacity {
            self.undo_stack.pop_front();
        }
    }

    /// Step back one state. Returns the state to restore.
    pub fn undo(&mut self) -> Option<HistorySnapshot> {
        let previous = self.undo_stack.pop_back()?;
        let current = std::mem::replace(&mut self.current, previous.clone());
        self.redo_stack.push(current);
        Some(previous)
    }

    /// Step forward one state. Returns the state to restore.
    pub fn redo(&mut self) -> Option<HistorySnapshot> {
        let next = self.redo_stack.pop()?;
        let current = std::mem::replace(&mut self.current, next.clone());
        self.undo_stack.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }
}

/// Which undo implementation a session uses.
///
/// Solo sessions keep their own snapshot stack. Collaborative sessions hand
/// undo to the CRDT's undo manager, which only reverts this peer's changes and
/// so stays correct while remote edits interleave. The two never mix within a
/// session.
#[derive(Debug, Clone)]
pub enum HistoryStrategy {
    Local(HistoryManager),
    Shared,
}

impl HistoryStrategy {
    pub fn is_shared(&self) -> bool {
        matches!(self, HistoryStrategy::Shared)
    }

    /// The local stack, when this is a solo session.
    pub fn local(&self) -> Option<&HistoryManager> {
        match self {
            HistoryStrategy::Local(manager) => Some(manager),
            HistoryStrategy::Shared => None,
        }
    }

    pub fn local_mut(&mut self) -> Option<&mut HistoryManager> {
        match self {
            HistoryStrategy::Local(manager) => Some(manager),
            HistoryStrategy::Shared => None,
        }
    }
}
