//! The editor session: one logical thread driving one formation.
//!
//! Intents from the presentation layer come in as plain method calls. A solo
//! session edits a [`FormationStore`] and keeps its own undo stack; a
//! collaborative session edits a [`FormationReplica`] and hands undo to the
//! CRDT. Which one is fixed when the session starts.

use crate::collaboration::{CollabError, FormationReplica};
use crate::config::EditorConfig;
use crate::export::{ExportError, ExportOptions, export_formation};
use crate::formation::{
    AudioTrack, Formation, FormationId, FormationMeta, Keyframe, KeyframeId, MetaUpdate,
    Performer, PerformerId, PerformerUpdate, Position, PositionMap, Transition,
};
use crate::geometry::{
    Alignment, Distribution, SnapMode, align_positions, distribute_positions,
    generate_arc_positions, generate_block_positions, generate_line_positions, snap_position,
};
use crate::history::{HistoryManager, HistorySnapshot, HistoryStrategy};
use crate::playback::{PlaybackEngine, PlaybackStatus, positions_at_time};
use crate::presence::{DragStatus, PresenceManager};
use crate::storage::{AutoSaveManager, FormationStorage, StorageResult};
use crate::store::FormationStore;
use crate::sync::Transport;
use kurbo::Point;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Result of asking to start a drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragStart {
    Started,
    /// Another user is already dragging this performer.
    Refused { by: Option<String> },
    /// No such performer (or no keyframe to drag on).
    NotFound,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    performer_id: PerformerId,
    moved: bool,
}

enum Backend {
    Solo {
        store: FormationStore,
        formation_id: FormationId,
    },
    Shared(Box<FormationReplica>),
}

fn formation_of(backend: &Backend) -> Cow<'_, Formation> {
    match backend {
        Backend::Solo { store, formation_id } => match store.get_formation(formation_id) {
            Some(formation) => Cow::Borrowed(formation),
            None => Cow::Owned(Formation::from_meta(formation_id.clone(), FormationMeta::default())),
        },
        Backend::Shared(replica) => Cow::Owned(replica.snapshot()),
    }
}

fn snapped_in(formation: &Formation, mode: SnapMode, position: Position) -> Position {
    snap_position(
        position,
        mode,
        formation.grid_size,
        formation.stage_width,
        formation.stage_height,
    )
}

/// A performer taken off the roster, kept so undo can put it back with its
/// positions in every keyframe.
#[derive(Debug, Clone)]
struct RetiredPerformer {
    performer: Performer,
    positions: HashMap<KeyframeId, Position>,
}

impl RetiredPerformer {
    fn capture(formation: &Formation, performer_id: &str) -> Option<Self> {
        let performer = formation.performer(performer_id)?.clone();
        let positions = formation
            .keyframes
            .iter()
            .filter_map(|k| k.position(performer_id).map(|p| (k.id().to_string(), p)))
            .collect();
        Some(Self { performer, positions })
    }

    /// Put the performer back. Keyframes it was never placed in get
    /// `fallback`.
    fn reinstate(self, formation: &mut Formation, fallback: Position) {
        let id = self.performer.id().to_string();
        for keyframe in &mut formation.keyframes {
            let position = self.positions.get(keyframe.id()).copied().unwrap_or(fallback);
            keyframe.positions.insert(id.clone(), position);
        }
        formation.performers.push(self.performer);
    }
}

/// Make the roster match `snapshot.performer_ids`, in that order. Performers
/// leaving the roster are retired; returning ones come back from `retired`.
fn restore_roster(
    formation: &mut Formation,
    snapshot: &HistorySnapshot,
    retired: &mut HashMap<PerformerId, RetiredPerformer>,
) {
    let leaving: Vec<PerformerId> = formation
        .performer_ids()
        .into_iter()
        .filter(|id| !snapshot.performer_ids.contains(id))
        .collect();
    for id in leaving {
        if let Some(record) = RetiredPerformer::capture(formation, &id) {
            retired.insert(id.clone(), record);
        }
        formation.remove_performer(&id);
    }

    for id in &snapshot.performer_ids {
        if formation.has_performer(id) {
            continue;
        }
        let fallback = snapshot.positions.get(id).copied().unwrap_or_else(Position::center);
        match retired.remove(id) {
            Some(record) => record.reinstate(formation, fallback),
            None => log::warn!("Cannot restore unknown performer {}", id),
        }
    }

    let order = |id: &str| snapshot.performer_ids.iter().position(|p| p == id).unwrap_or(usize::MAX);
    formation.performers.sort_by_key(|p| order(p.id()));
}

fn collab_result(result: Result<bool, CollabError>, what: &str) -> bool {
    match result {
        Ok(changed) => changed,
        Err(e) => {
            log::error!("{} failed: {}", what, e);
            false
        }
    }
}

pub struct EditorSession {
    backend: Backend,
    history: HistoryStrategy,
    playback: PlaybackEngine,
    selected_keyframe: Option<KeyframeId>,
    drag: Option<ActiveDrag>,
    snap_mode: SnapMode,
    /// Show the playhead's positions while stopped, after a seek.
    show_playhead: bool,
    /// Performers removed by edits still reachable through local undo.
    retired: HashMap<PerformerId, RetiredPerformer>,
    autosave: Option<AutoSaveManager>,
}

impl EditorSession {
    /// Solo session over a formation in `store`. `None` if it is not there.
    pub fn solo(store: FormationStore, formation_id: &str, config: &EditorConfig) -> Option<Self> {
        store.get_formation(formation_id)?;
        let mut session = Self {
            backend: Backend::Solo {
                store,
                formation_id: formation_id.to_string(),
            },
            history: HistoryStrategy::Local(HistoryManager::new(config.history_capacity)),
            playback: PlaybackEngine::new(config.tick_interval()),
            selected_keyframe: None,
            drag: None,
            snap_mode: config.snap_mode,
            show_playhead: false,
            retired: HashMap::new(),
            autosave: None,
        };
        session.reset_history();
        Some(session)
    }

    /// Collaborative session over `replica`. Undo goes through the CRDT.
    pub fn collaborative(replica: FormationReplica, config: &EditorConfig) -> Self {
        let replica = replica.with_presence(PresenceManager::new(config.presence_timeout()));
        Self {
            backend: Backend::Shared(Box::new(replica)),
            history: HistoryStrategy::Shared,
            playback: PlaybackEngine::new(config.tick_interval()),
            selected_keyframe: None,
            drag: None,
            snap_mode: config.snap_mode,
            show_playhead: false,
            retired: HashMap::new(),
            autosave: None,
        }
    }

    /// Save the formation to `storage` on the configured interval. Drive it
    /// with [`EditorSession::autosave_tick`].
    pub fn with_autosave(mut self, storage: Arc<dyn FormationStorage>, config: &EditorConfig) -> Self {
        self.set_autosave(Some(AutoSaveManager::new(storage).with_interval(config.autosave_interval())));
        self
    }

    pub fn set_autosave(&mut self, manager: Option<AutoSaveManager>) {
        self.autosave = manager;
    }

    pub fn autosave(&self) -> Option<&AutoSaveManager> {
        self.autosave.as_ref()
    }

    pub fn autosave_mut(&mut self) -> Option<&mut AutoSaveManager> {
        self.autosave.as_mut()
    }

    /// Save if the formation changed since the last save and the interval
    /// elapsed. Returns whether a save ran.
    pub async fn autosave_tick(&mut self, now: Instant) -> StorageResult<bool> {
        let Some(manager) = self.autosave.as_mut() else {
            return Ok(false);
        };
        let formation = formation_of(&self.backend);
        manager.maybe_save(&formation, now).await
    }

    /// Save right away, regardless of the interval.
    pub async fn save_now(&mut self) -> StorageResult<bool> {
        let Some(manager) = self.autosave.as_mut() else {
            return Ok(false);
        };
        let formation = formation_of(&self.backend);
        manager.save(&formation).await?;
        Ok(true)
    }

    pub fn is_collaborative(&self) -> bool {
        matches!(self.backend, Backend::Shared(_))
    }

    /// Current state of the formation being edited.
    pub fn formation(&self) -> Cow<'_, Formation> {
        formation_of(&self.backend)
    }

    pub fn store(&self) -> Option<&FormationStore> {
        match &self.backend {
            Backend::Solo { store, .. } => Some(store),
            Backend::Shared(_) => None,
        }
    }

    pub fn replica(&self) -> Option<&FormationReplica> {
        match &self.backend {
            Backend::Shared(replica) => Some(replica),
            Backend::Solo { .. } => None,
        }
    }

    pub fn replica_mut(&mut self) -> Option<&mut FormationReplica> {
        match &mut self.backend {
            Backend::Shared(replica) => Some(replica),
            Backend::Solo { .. } => None,
        }
    }

    pub fn history(&self) -> &HistoryStrategy {
        &self.history
    }

    pub fn snap_mode(&self) -> SnapMode {
        self.snap_mode
    }

    pub fn set_snap_mode(&mut self, mode: SnapMode) {
        self.snap_mode = mode;
    }

    // --- Keyframe selection ---

    /// The keyframe edits apply to. Falls back to the first keyframe when
    /// nothing is selected or the selection was removed.
    pub fn selected_keyframe_id(&self) -> Option<KeyframeId> {
        self.selected_in(&self.formation())
    }

    fn selected_in(&self, formation: &Formation) -> Option<KeyframeId> {
        self.selected_keyframe
            .as_deref()
            .filter(|id| formation.keyframe(id).is_some())
            .or_else(|| formation.first_keyframe().map(Keyframe::id))
            .map(str::to_string)
    }

    fn selected_positions(&self, formation: &Formation) -> PositionMap {
        self.selected_in(formation)
            .and_then(|id| formation.keyframe(&id).map(|k| k.positions.clone()))
            .unwrap_or_default()
    }

    pub fn select_keyframe(&mut self, keyframe_id: &str) -> bool {
        if self.formation().keyframe(keyframe_id).is_none() {
            return false;
        }
        self.selected_keyframe = Some(keyframe_id.to_string());
        self.show_playhead = false;
        self.reset_history();
        true
    }

    /// Positions to display: the playhead's while playing, paused or after a
    /// seek, otherwise the selected keyframe's.
    pub fn current_positions(&self) -> PositionMap {
        let formation = self.formation();
        if self.show_playhead || self.playback.status() != PlaybackStatus::Stopped {
            return self.playback.positions(&formation);
        }
        self.selected_positions(&formation)
    }

    pub fn positions_at_time(&self, time_ms: f64) -> PositionMap {
        positions_at_time(&self.formation(), time_ms)
    }

    // --- History ---

    fn history_snapshot(&self, label: &str) -> HistorySnapshot {
        let formation = self.formation();
        HistorySnapshot::new(self.selected_positions(&formation), formation.performer_ids(), label)
    }

    fn reset_history(&mut self) {
        if self.history.is_shared() {
            return;
        }
        self.retired.clear();
        let snapshot = self.history_snapshot("Initial");
        if let Some(history) = self.history.local_mut() {
            history.reset(snapshot);
        }
    }

    /// Snapshot after a discrete edit.
    fn record(&mut self, label: &str) {
        if self.history.is_shared() {
            return;
        }
        let snapshot = self.history_snapshot(label);
        if let Some(history) = self.history.local_mut() {
            history.push_state(snapshot);
        }
    }

    /// Bring the solo formation back to `snapshot`: roster first, then the
    /// selected keyframe's positions.
    fn restore(&mut self, snapshot: HistorySnapshot) -> bool {
        let Some(keyframe_id) = self.selected_keyframe_id() else {
            return false;
        };
        log::debug!("Restoring '{}'", snapshot.label);
        let Backend::Solo { store, formation_id } = &mut self.backend else {
            return false;
        };
        let Some(formation) = store.get_formation_mut(formation_id) else {
            return false;
        };
        restore_roster(formation, &snapshot, &mut self.retired);

        let mut positions = snapshot.positions;
        positions.retain(|id, _| formation.has_performer(id));
        match formation.keyframe_mut(&keyframe_id) {
            Some(keyframe) => {
                keyframe.positions = positions;
                true
            }
            None => false,
        }
    }

    pub fn undo(&mut self) -> bool {
        if let Backend::Shared(replica) = &mut self.backend {
            return replica.undo();
        }
        match self.history.local_mut().and_then(HistoryManager::undo) {
            Some(snapshot) => self.restore(snapshot),
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if let Backend::Shared(replica) = &mut self.backend {
            return replica.redo();
        }
        match self.history.local_mut().and_then(HistoryManager::redo) {
            Some(snapshot) => self.restore(snapshot),
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        match (&self.backend, &self.history) {
            (Backend::Shared(replica), _) => replica.can_undo(),
            (_, HistoryStrategy::Local(history)) => history.can_undo(),
            _ => false,
        }
    }

    pub fn can_redo(&self) -> bool {
        match (&self.backend, &self.history) {
            (Backend::Shared(replica), _) => replica.can_redo(),
            (_, HistoryStrategy::Local(history)) => history.can_redo(),
            _ => false,
        }
    }

    // --- Backend writes ---

    fn write_position(&mut self, keyframe_id: &str, performer_id: &str, position: Position) -> bool {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => store
                .update_position(formation_id, keyframe_id, performer_id, position)
                .is_some(),
            Backend::Shared(replica) => collab_result(
                replica.update_position(keyframe_id, performer_id, position),
                "update_position",
            ),
        }
    }

    fn write_keyframe_positions(&mut self, keyframe_id: &str, positions: PositionMap) -> bool {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => {
                store.set_keyframe_positions(formation_id, keyframe_id, positions)
            }
            Backend::Shared(replica) => collab_result(
                replica.set_keyframe_positions(keyframe_id, positions),
                "set_keyframe_positions",
            ),
        }
    }

    // --- Performer intents ---

    pub fn add_performer(&mut self, performer: Performer, position: Position) -> bool {
        let position = snapped_in(&self.formation(), self.snap_mode, position);
        let added = match &mut self.backend {
            Backend::Solo { store, formation_id } => {
                store.add_performer(formation_id, performer, position).is_some()
            }
            Backend::Shared(replica) => {
                collab_result(replica.add_performer(performer, position), "add_performer")
            }
        };
        if added {
            self.record("Add performer");
        }
        added
    }

    pub fn update_performer(&mut self, performer_id: &str, update: PerformerUpdate) -> bool {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => store
                .update_performer(formation_id, performer_id, &update)
                .is_some(),
            Backend::Shared(replica) => {
                collab_result(replica.update_performer(performer_id, update), "update_performer")
            }
        }
    }

    pub fn remove_performer(&mut self, performer_id: &str) -> bool {
        if self.drag.as_ref().is_some_and(|d| d.performer_id == performer_id) {
            self.handle_drag_end();
        }
        let removed = match &mut self.backend {
            Backend::Solo { store, formation_id } => {
                let record = store
                    .get_formation(formation_id)
                    .and_then(|f| RetiredPerformer::capture(f, performer_id));
                let removed = store.remove_performer(formation_id, performer_id).is_some();
                if let Some(record) = record.filter(|_| removed) {
                    self.retired.insert(performer_id.to_string(), record);
                }
                removed
            }
            Backend::Shared(replica) => {
                collab_result(replica.remove_performer(performer_id), "remove_performer")
            }
        };
        if removed {
            self.record("Remove performer");
        }
        removed
    }

    /// Place a performer in the selected keyframe as one discrete edit.
    pub fn move_performer(&mut self, performer_id: &str, position: Position) -> bool {
        let (keyframe_id, position) = {
            let formation = self.formation();
            let Some(keyframe_id) = self.selected_in(&formation) else {
                return false;
            };
            (keyframe_id, snapped_in(&formation, self.snap_mode, position))
        };
        let moved = self.write_position(&keyframe_id, performer_id, position);
        if moved {
            self.record("Move performer");
        }
        moved
    }

    // --- Dragging ---

    /// Begin dragging a performer. Refused while another user holds it.
    pub fn handle_drag_start(&mut self, performer_id: &str) -> DragStart {
        let placeable = {
            let formation = self.formation();
            formation.has_performer(performer_id) && self.selected_in(&formation).is_some()
        };
        if !placeable {
            return DragStart::NotFound;
        }
        let status = self.is_performer_being_dragged(performer_id);
        if status.dragging {
            log::warn!(
                "Performer {} is being dragged by {}",
                performer_id,
                status.by.as_deref().unwrap_or("another user")
            );
            return DragStart::Refused { by: status.by };
        }
        if self.drag.is_some() {
            self.handle_drag_end();
        }
        if let Backend::Shared(replica) = &mut self.backend {
            replica.set_dragging_performer(Some(performer_id.to_string()));
        }
        self.drag = Some(ActiveDrag {
            performer_id: performer_id.to_string(),
            moved: false,
        });
        DragStart::Started
    }

    /// Move the dragged performer. No history entry until the drag ends.
    pub fn handle_drag_move(&mut self, position: Position) -> bool {
        let Some(performer_id) = self.drag.as_ref().map(|d| d.performer_id.clone()) else {
            return false;
        };
        let (keyframe_id, position) = {
            let formation = self.formation();
            let Some(keyframe_id) = self.selected_in(&formation) else {
                return false;
            };
            (keyframe_id, snapped_in(&formation, self.snap_mode, position))
        };
        let moved = self.write_position(&keyframe_id, &performer_id, position);
        if moved {
            if let Some(drag) = self.drag.as_mut() {
                drag.moved = true;
            }
        }
        moved
    }

    /// Release the drag lock. Safe to call on every exit path; returns
    /// whether a drag was active.
    pub fn handle_drag_end(&mut self) -> bool {
        if let Backend::Shared(replica) = &mut self.backend {
            replica.set_dragging_performer(None);
        }
        match self.drag.take() {
            Some(drag) => {
                if drag.moved {
                    self.record("Move performer");
                }
                true
            }
            None => false,
        }
    }

    pub fn dragging_performer(&self) -> Option<&str> {
        self.drag.as_ref().map(|d| d.performer_id.as_str())
    }

    /// Whether another user is dragging `performer_id`.
    pub fn is_performer_being_dragged(&self, performer_id: &str) -> DragStatus {
        match &self.backend {
            Backend::Shared(replica) => replica.is_performer_being_dragged(performer_id),
            Backend::Solo { .. } => DragStatus::free(),
        }
    }

    // --- Presence passthrough ---

    pub fn update_cursor(&mut self, x: f64, y: f64) {
        if let Some(replica) = self.replica_mut() {
            replica.update_cursor(x, y);
        }
    }

    pub fn clear_cursor(&mut self) {
        if let Some(replica) = self.replica_mut() {
            replica.clear_cursor();
        }
    }

    pub fn set_selected_performers(&mut self, performer_ids: Vec<PerformerId>) {
        if let Some(replica) = self.replica_mut() {
            replica.set_selected_performers(performer_ids);
        }
    }

    // --- Keyframe intents ---

    /// Add a keyframe and select it.
    pub fn add_keyframe(&mut self, timestamp: u64, positions: Option<PositionMap>) -> Option<Keyframe> {
        let keyframe = match &mut self.backend {
            Backend::Solo { store, formation_id } => store.add_keyframe(formation_id, timestamp, positions),
            Backend::Shared(replica) => match replica.add_keyframe(timestamp, positions) {
                Ok(keyframe) => keyframe,
                Err(e) => {
                    log::error!("add_keyframe failed: {}", e);
                    None
                }
            },
        }?;
        self.selected_keyframe = Some(keyframe.id().to_string());
        self.show_playhead = false;
        self.reset_history();
        self.sync_playback_duration();
        Some(keyframe)
    }

    pub fn remove_keyframe(&mut self, keyframe_id: &str) -> bool {
        let removed = match &mut self.backend {
            Backend::Solo { store, formation_id } => {
                store.remove_keyframe(formation_id, keyframe_id).is_some()
            }
            Backend::Shared(replica) => {
                collab_result(replica.remove_keyframe(keyframe_id), "remove_keyframe")
            }
        };
        if removed {
            if self.selected_keyframe.as_deref() == Some(keyframe_id) {
                self.selected_keyframe = None;
                self.reset_history();
            }
            self.sync_playback_duration();
        }
        removed
    }

    pub fn move_keyframe(&mut self, keyframe_id: &str, timestamp: u64) -> bool {
        let moved = match &mut self.backend {
            Backend::Solo { store, formation_id } => {
                store.move_keyframe(formation_id, keyframe_id, timestamp).is_some()
            }
            Backend::Shared(replica) => {
                collab_result(replica.move_keyframe(keyframe_id, timestamp), "move_keyframe")
            }
        };
        if moved {
            self.sync_playback_duration();
        }
        moved
    }

    pub fn set_transition(&mut self, keyframe_id: &str, transition: Option<Transition>) -> bool {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => store
                .set_transition(formation_id, keyframe_id, transition)
                .is_some(),
            Backend::Shared(replica) => {
                collab_result(replica.set_transition(keyframe_id, transition), "set_transition")
            }
        }
    }

    // --- Formation intents ---

    pub fn update_meta(&mut self, update: MetaUpdate) -> Option<FormationMeta> {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => store.update_meta(formation_id, &update),
            Backend::Shared(replica) => match replica.update_meta(update) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    log::error!("update_meta failed: {}", e);
                    None
                }
            },
        }
    }

    pub fn set_audio_track(&mut self, track: Option<AudioTrack>) -> bool {
        match &mut self.backend {
            Backend::Solo { store, formation_id } => store.set_audio_track(formation_id, track),
            Backend::Shared(replica) => collab_result(replica.set_audio_track(track), "set_audio_track"),
        }
    }

    // --- Geometry intents ---

    /// Rearrange the selected keyframe. `targets` receives the current
    /// positions of the performers in `performer_ids` that have one, and
    /// returns their new positions pairwise. Rotation is kept from the current
    /// position.
    fn arrange_with(
        &mut self,
        performer_ids: &[PerformerId],
        label: &str,
        targets: impl FnOnce(&[Position]) -> Vec<Position>,
    ) -> bool {
        let (keyframe_id, mut positions) = {
            let formation = self.formation();
            let keyframe = self.selected_in(&formation).and_then(|id| formation.keyframe(&id).cloned());
            let Some(keyframe) = keyframe else {
                return false;
            };
            (keyframe.id().to_string(), keyframe.positions)
        };
        let (ids, current): (Vec<&PerformerId>, Vec<Position>) = performer_ids
            .iter()
            .filter_map(|id| positions.get(id).map(|p| (id, *p)))
            .unzip();

        let mut changed = false;
        for (id, target) in ids.into_iter().zip(targets(&current)) {
            if let Some(slot) = positions.get_mut(id) {
                let target = Position {
                    rotation: slot.rotation,
                    ..target
                };
                if *slot != target {
                    *slot = target;
                    changed = true;
                }
            }
        }
        if !changed {
            return false;
        }
        let written = self.write_keyframe_positions(&keyframe_id, positions);
        if written {
            self.record(label);
        }
        written
    }

    pub fn align(&mut self, performer_ids: &[PerformerId], alignment: Alignment) -> bool {
        self.arrange_with(performer_ids, "Align", |current| align_positions(current, alignment))
    }

    pub fn distribute(&mut self, performer_ids: &[PerformerId], distribution: Distribution) -> bool {
        self.arrange_with(performer_ids, "Distribute", |current| {
            distribute_positions(current, distribution)
        })
    }

    pub fn arrange_line(&mut self, performer_ids: &[PerformerId], start: Point, end: Point) -> bool {
        self.arrange_with(performer_ids, "Line", |current| {
            generate_line_positions(start, end, current.len())
        })
    }

    pub fn arrange_arc(
        &mut self,
        performer_ids: &[PerformerId],
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> bool {
        self.arrange_with(performer_ids, "Arc", |current| {
            generate_arc_positions(center, radius, start_angle, end_angle, current.len())
        })
    }

    pub fn arrange_block(&mut self, performer_ids: &[PerformerId], top_left: Point, bottom_right: Point) -> bool {
        self.arrange_with(performer_ids, "Block", |current| {
            generate_block_positions(top_left, bottom_right, current.len())
        })
    }

    // --- Playback ---

    pub fn playback(&self) -> &PlaybackEngine {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackEngine {
        &mut self.playback
    }

    pub fn play(&mut self, on_tick: impl FnMut(f64) + 'static) {
        let formation = formation_of(&self.backend);
        self.playback.play(&formation, on_tick);
        self.show_playhead = true;
    }

    pub fn pause(&mut self) {
        self.playback.pause();
    }

    /// Stop playback and return the first keyframe's positions.
    pub fn stop(&mut self) -> PositionMap {
        self.show_playhead = false;
        let formation = formation_of(&self.backend);
        self.playback.stop(&formation)
    }

    /// Move the playhead. Works before the first play; the positions at the
    /// playhead are shown until playback stops or a keyframe is selected.
    pub fn seek(&mut self, time_ms: f64) {
        let formation = formation_of(&self.backend);
        self.playback.load(&formation);
        self.playback.seek(time_ms);
        self.show_playhead = true;
    }

    /// Drive the playback clock. Returns the positions to show when a tick
    /// fired.
    pub fn tick(&mut self, now: Instant) -> Option<PositionMap> {
        let time = self.playback.poll(now)?;
        Some(positions_at_time(&formation_of(&self.backend), time))
    }

    fn sync_playback_duration(&mut self) {
        let duration = formation_of(&self.backend).duration_ms() as f64;
        self.playback.set_duration(duration);
    }

    // --- Collaboration ---

    /// Exchange messages with the relay and fold remote changes in. Returns
    /// whether remote changes arrived. Solo sessions have nothing to do.
    pub fn pump(&mut self, transport: &mut dyn Transport) -> Result<bool, CollabError> {
        let Backend::Shared(replica) = &mut self.backend else {
            return Ok(false);
        };
        let now = Instant::now();
        replica.heartbeat(now);
        let changed = replica.sync_with(transport)?;
        replica.presence_mut().prune_stale(now);
        if changed {
            let (dragged_gone, duration) = {
                let formation = formation_of(&self.backend);
                let gone = self.drag.as_ref().is_some_and(|d| !formation.has_performer(&d.performer_id));
                (gone, formation.duration_ms() as f64)
            };
            if dragged_gone {
                log::info!("Dragged performer was removed remotely");
                self.handle_drag_end();
            }
            self.playback.set_duration(duration);
        }
        Ok(changed)
    }

    pub fn export(&self, options: &ExportOptions) -> Result<Vec<u8>, ExportError> {
        export_formation(&self.formation(), options)
    }
}
