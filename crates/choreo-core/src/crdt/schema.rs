//! Loro document schema and operations.

use super::convert::{
    KEY_COLOR, KEY_DESCRIPTION, KEY_GRID_SIZE, KEY_GROUP, KEY_ID, KEY_LABEL, KEY_NAME,
    KEY_POSITIONS, KEY_STAGE_HEIGHT, KEY_STAGE_WIDTH, KEY_TIMESTAMP, KEY_TRANSITION,
    audio_from_loro, audio_to_loro, keyframe_from_loro, keyframe_to_loro, meta_from_loro,
    meta_to_loro, ms_to_loro, performer_from_loro, performer_to_loro, position_diff_to_loro,
    position_to_loro,
};
use super::op::FormationOp;
use crate::formation::{Formation, FormationMeta, Keyframe, MetaUpdate, Performer, PositionMap};
use loro::{
    Container, ExportMode, LoroDoc, LoroList, LoroMap, LoroMapValue, LoroResult, LoroValue,
    UndoManager, ValueOrContainer, VersionVector,
};
use std::collections::HashSet;

/// Key for the formation meta map.
pub const META_KEY: &str = "meta";
/// Key for the performers map.
pub const PERFORMERS_KEY: &str = "performers";
/// Key for the performer roster order.
pub const PERFORMER_ORDER_KEY: &str = "performer_order";
/// Key for the keyframes map.
pub const KEYFRAMES_KEY: &str = "keyframes";
/// Key for the audio track map.
pub const AUDIO_KEY: &str = "audio";

/// Undo manager tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoSettings {
    pub max_steps: usize,
    /// Local edits closer together than this merge into one undo step.
    pub merge_interval_ms: i64,
}

impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            merge_interval_ms: 300,
        }
    }
}

fn child_map(parent: &LoroMap, key: &str) -> Option<LoroMap> {
    match parent.get(key)? {
        ValueOrContainer::Container(Container::Map(map)) => Some(map),
        _ => None,
    }
}

fn performer_entry(performers: &LoroMapValue, id: &str) -> Option<Performer> {
    match performers.get(id)? {
        LoroValue::Map(entry) => performer_from_loro(entry),
        _ => None,
    }
}

fn map_keys(map: &LoroMap) -> Vec<String> {
    match map.get_value() {
        LoroValue::Map(entries) => entries.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn remove_from_list(list: &LoroList, id: &str) -> LoroResult<()> {
    let mut index = list.len();
    while index > 0 {
        index -= 1;
        if let Some(ValueOrContainer::Value(LoroValue::String(s))) = list.get(index) {
            if s.as_ref() == id {
                list.delete(index, 1)?;
            }
        }
    }
    Ok(())
}

/// A CRDT-backed formation.
///
/// Wraps a `LoroDoc` with a formation schema and an `UndoManager` that only
/// reverts changes made by this peer.
///
/// ```text
/// LoroDoc
/// ├── "meta": LoroMap { id, name, description?, stage_width, stage_height, grid_size }
/// ├── "performers": LoroMap<PerformerId, LoroMap { id, name, label, color, group? }>
/// ├── "performer_order": LoroList<PerformerId>
/// ├── "keyframes": LoroMap<KeyframeId, LoroMap {
/// │       id, timestamp, transition?, duration?,
/// │       positions: LoroMap<PerformerId, LoroMap { x, y, rotation }> }>
/// └── "audio": LoroMap { id, url, filename, duration_ms } (empty when unset)
/// ```
pub struct CrdtFormation {
    doc: LoroDoc,
    undo_manager: UndoManager,
    undo_settings: UndoSettings,
}

impl CrdtFormation {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::with_undo_settings(UndoSettings::default())
    }

    pub fn with_undo_settings(undo_settings: UndoSettings) -> Self {
        let doc = LoroDoc::new();
        let undo_manager = Self::make_undo_manager(&doc, undo_settings);
        Self {
            doc,
            undo_manager,
            undo_settings,
        }
    }

    /// Create a document holding `formation`. The seeding itself is not
    /// undoable.
    pub fn from_formation(formation: &Formation, undo_settings: UndoSettings) -> LoroResult<Self> {
        let crdt = Self::with_undo_settings(undo_settings);
        crdt.seed(formation)?;
        crdt.clear_undo_history();
        Ok(crdt)
    }

    /// Create a document from a snapshot.
    pub fn from_snapshot(bytes: &[u8], undo_settings: UndoSettings) -> LoroResult<Self> {
        let crdt = Self::with_undo_settings(undo_settings);
        crdt.doc.import(bytes)?;
        Ok(crdt)
    }

    fn make_undo_manager(doc: &LoroDoc, settings: UndoSettings) -> UndoManager {
        let mut undo_manager = UndoManager::new(doc);
        undo_manager.set_max_undo_steps(settings.max_steps);
        undo_manager.set_merge_interval(settings.merge_interval_ms);
        undo_manager
    }

    fn seed(&self, formation: &Formation) -> LoroResult<()> {
        meta_to_loro(&formation.id, &formation.meta(), &self.meta_map())?;

        let performers = self.performers_map();
        let order = self.order_list();
        for performer in &formation.performers {
            let entry = performers.insert_container(performer.id(), LoroMap::new())?;
            performer_to_loro(performer, &entry)?;
            order.push(performer.id())?;
        }

        let keyframes = self.keyframes_map();
        for keyframe in &formation.keyframes {
            let entry = keyframes.insert_container(keyframe.id(), LoroMap::new())?;
            keyframe_to_loro(keyframe, &entry)?;
        }

        if let Some(track) = &formation.audio_track {
            audio_to_loro(track, &self.audio_map())?;
        }
        self.doc.commit();
        Ok(())
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    /// Set this replica's peer id. Resets undo history.
    pub fn set_peer_id(&mut self, peer_id: u64) -> LoroResult<()> {
        self.doc.set_peer_id(peer_id)?;
        self.undo_manager = Self::make_undo_manager(&self.doc, self.undo_settings);
        Ok(())
    }

    fn meta_map(&self) -> LoroMap {
        self.doc.get_map(META_KEY)
    }

    fn performers_map(&self) -> LoroMap {
        self.doc.get_map(PERFORMERS_KEY)
    }

    fn order_list(&self) -> LoroList {
        self.doc.get_list(PERFORMER_ORDER_KEY)
    }

    fn keyframes_map(&self) -> LoroMap {
        self.doc.get_map(KEYFRAMES_KEY)
    }

    fn audio_map(&self) -> LoroMap {
        self.doc.get_map(AUDIO_KEY)
    }

    /// True until a formation has been seeded or imported.
    pub fn is_empty(&self) -> bool {
        self.formation_id().is_none()
    }

    pub fn formation_id(&self) -> Option<String> {
        match self.meta_map().get(KEY_ID)? {
            ValueOrContainer::Value(LoroValue::String(id)) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn performer_count(&self) -> usize {
        self.performers_map().len()
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes_map().len()
    }

    pub fn has_performer(&self, id: &str) -> bool {
        child_map(&self.performers_map(), id).is_some()
    }

    pub fn has_keyframe(&self, id: &str) -> bool {
        child_map(&self.keyframes_map(), id).is_some()
    }

    /// Apply one edit and commit it. Returns `false` when the edit targets
    /// something that does not exist (or already exists, for additions) and
    /// nothing changed.
    pub fn apply(&mut self, op: &FormationOp) -> LoroResult<bool> {
        let changed = match op {
            FormationOp::UpdateMeta(update) => self.update_meta(update)?,
            FormationOp::SetAudioTrack(track) => {
                let audio = self.audio_map();
                match track {
                    Some(track) => audio_to_loro(track, &audio)?,
                    None => {
                        for key in map_keys(&audio) {
                            audio.delete(&key)?;
                        }
                    }
                }
                true
            }
            FormationOp::AddPerformer { performer, position } => {
                if self.has_performer(performer.id()) {
                    false
                } else {
                    let entry = self.performers_map().insert_container(performer.id(), LoroMap::new())?;
                    performer_to_loro(performer, &entry)?;
                    self.order_list().push(performer.id())?;
                    let keyframes = self.keyframes_map();
                    for keyframe_id in map_keys(&keyframes) {
                        if let Some(keyframe) = child_map(&keyframes, &keyframe_id) {
                            let positions = keyframe.get_or_create_container(KEY_POSITIONS, LoroMap::new())?;
                            let slot = positions.insert_container(performer.id(), LoroMap::new())?;
                            position_to_loro(position, &slot)?;
                        }
                    }
                    true
                }
            }
            FormationOp::UpdatePerformer { performer_id, update } => {
                match child_map(&self.performers_map(), performer_id) {
                    Some(entry) => {
                        if let Some(name) = &update.name {
                            entry.insert(KEY_NAME, name.as_str())?;
                        }
                        if let Some(label) = &update.label {
                            entry.insert(KEY_LABEL, label.as_str())?;
                        }
                        if let Some(color) = &update.color {
                            entry.insert(KEY_COLOR, color.as_str())?;
                        }
                        match &update.group {
                            Some(Some(group)) => entry.insert(KEY_GROUP, group.as_str())?,
                            Some(None) => entry.delete(KEY_GROUP)?,
                            None => {}
                        }
                        true
                    }
                    None => false,
                }
            }
            FormationOp::RemovePerformer { performer_id } => {
                if !self.has_performer(performer_id) {
                    false
                } else {
                    self.performers_map().delete(performer_id)?;
                    remove_from_list(&self.order_list(), performer_id)?;
                    let keyframes = self.keyframes_map();
                    for keyframe_id in map_keys(&keyframes) {
                        let positions = child_map(&keyframes, &keyframe_id)
                            .and_then(|keyframe| child_map(&keyframe, KEY_POSITIONS))
                            .filter(|positions| positions.get(performer_id).is_some());
                        if let Some(positions) = positions {
                            positions.delete(performer_id)?;
                        }
                    }
                    true
                }
            }
            FormationOp::AddKeyframe { keyframe } => {
                if self.has_keyframe(keyframe.id()) {
                    false
                } else {
                    let mut keyframe = keyframe.clone();
                    keyframe.positions.retain(|id, _| self.has_performer(id));
                    let entry = self.keyframes_map().insert_container(keyframe.id(), LoroMap::new())?;
                    keyframe_to_loro(&keyframe, &entry)?;
                    true
                }
            }
            FormationOp::RemoveKeyframe { keyframe_id } => {
                if !self.has_keyframe(keyframe_id) {
                    false
                } else if self.keyframe_count() <= 1 {
                    log::debug!("Refusing to remove the only keyframe");
                    false
                } else {
                    self.keyframes_map().delete(keyframe_id)?;
                    true
                }
            }
            FormationOp::MoveKeyframe { keyframe_id, timestamp } => {
                match child_map(&self.keyframes_map(), keyframe_id) {
                    Some(entry) => {
                        entry.insert(KEY_TIMESTAMP, ms_to_loro(*timestamp))?;
                        true
                    }
                    None => false,
                }
            }
            FormationOp::SetTransition { keyframe_id, transition } => {
                match child_map(&self.keyframes_map(), keyframe_id) {
                    Some(entry) => {
                        match transition {
                            Some(transition) => entry.insert(KEY_TRANSITION, transition.as_str())?,
                            None => entry.delete(KEY_TRANSITION)?,
                        }
                        true
                    }
                    None => false,
                }
            }
            FormationOp::UpdatePosition { keyframe_id, performer_id, position } => {
                let keyframe = child_map(&self.keyframes_map(), keyframe_id);
                match keyframe {
                    Some(keyframe) if self.has_performer(performer_id) => {
                        let positions = keyframe.get_or_create_container(KEY_POSITIONS, LoroMap::new())?;
                        let slot = positions.get_or_create_container(performer_id, LoroMap::new())?;
                        position_diff_to_loro(position, &slot)?;
                        true
                    }
                    _ => false,
                }
            }
            FormationOp::SetKeyframePositions { keyframe_id, positions } => {
                match child_map(&self.keyframes_map(), keyframe_id) {
                    Some(keyframe) => {
                        self.replace_positions(&keyframe, positions)?;
                        true
                    }
                    None => false,
                }
            }
        };

        if changed {
            self.doc.commit();
            log::debug!("Applied {} to CRDT formation", op.kind());
        }
        Ok(changed)
    }

    fn update_meta(&self, update: &MetaUpdate) -> LoroResult<bool> {
        let meta = self.meta_map();
        if let Some(name) = &update.name {
            meta.insert(KEY_NAME, name.as_str())?;
        }
        match &update.description {
            Some(Some(description)) => meta.insert(KEY_DESCRIPTION, description.as_str())?,
            Some(None) => meta.delete(KEY_DESCRIPTION)?,
            None => {}
        }
        if let Some(width) = update.stage_width {
            meta.insert(KEY_STAGE_WIDTH, width)?;
        }
        if let Some(height) = update.stage_height {
            meta.insert(KEY_STAGE_HEIGHT, height)?;
        }
        if let Some(grid) = update.grid_size {
            meta.insert(KEY_GRID_SIZE, grid)?;
        }
        Ok(true)
    }

    fn replace_positions(&self, keyframe: &LoroMap, positions: &PositionMap) -> LoroResult<()> {
        let slots = keyframe.get_or_create_container(KEY_POSITIONS, LoroMap::new())?;
        for performer_id in map_keys(&slots) {
            if !positions.contains_key(&performer_id) {
                slots.delete(&performer_id)?;
            }
        }
        for (performer_id, position) in positions {
            if !self.has_performer(performer_id) {
                continue;
            }
            let slot = slots.get_or_create_container(performer_id, LoroMap::new())?;
            position_diff_to_loro(position, &slot)?;
        }
        Ok(())
    }

    pub fn meta(&self) -> FormationMeta {
        match self.meta_map().get_deep_value() {
            LoroValue::Map(map) => meta_from_loro(&map),
            _ => FormationMeta::default(),
        }
    }

    /// Materialize the merged state as a plain formation.
    ///
    /// Keyframes come out sorted by timestamp (ties by id, so every replica
    /// agrees) and positions of performers removed concurrently are dropped.
    pub fn snapshot(&self) -> Formation {
        let id = self.formation_id().unwrap_or_default();
        let mut formation = Formation::from_meta(id, self.meta());
        formation.keyframes.clear();

        if let LoroValue::Map(performers) = self.performers_map().get_deep_value() {
            let mut seen = HashSet::new();
            let order = self.order_list();
            for index in 0..order.len() {
                let Some(ValueOrContainer::Value(LoroValue::String(id))) = order.get(index) else {
                    continue;
                };
                let id = id.to_string();
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(performer) = performer_entry(&performers, &id) {
                    formation.performers.push(performer);
                }
            }
            // Entries whose order slot was lost to a concurrent edit.
            let mut stragglers: Vec<&String> =
                performers.keys().filter(|id| !seen.contains(*id)).collect();
            stragglers.sort();
            for id in stragglers {
                if let Some(performer) = performer_entry(&performers, id) {
                    formation.performers.push(performer);
                }
            }
        }

        if let LoroValue::Map(keyframes) = self.keyframes_map().get_deep_value() {
            let mut loaded: Vec<Keyframe> = keyframes
                .values()
                .filter_map(|value| match value {
                    LoroValue::Map(entry) => keyframe_from_loro(entry),
                    _ => None,
                })
                .collect();
            loaded.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id().cmp(b.id())));
            formation.keyframes = loaded;
        }

        if let LoroValue::Map(audio) = self.audio_map().get_deep_value() {
            formation.audio_track = audio_from_loro(&audio);
        }

        formation.prune_dangling_positions();
        formation
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> Vec<u8> {
        self.doc.export(ExportMode::Snapshot).unwrap_or_default()
    }

    /// Export incremental updates since a version.
    pub fn export_updates(&self, since: &VersionVector) -> Vec<u8> {
        self.doc.export(ExportMode::updates(since)).unwrap_or_default()
    }

    /// Import updates or a snapshot from another replica. Importing the same
    /// bytes twice is harmless.
    pub fn import(&mut self, bytes: &[u8]) -> LoroResult<()> {
        self.doc.import(bytes)?;
        Ok(())
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    // --- Undo/Redo API ---

    /// Undo the last change made by this peer.
    /// Returns true if undo was performed, false if nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.undo_manager.undo().unwrap_or(false)
    }

    /// Redo the last undone change.
    pub fn redo(&mut self) -> bool {
        self.undo_manager.redo().unwrap_or(false)
    }

    pub fn can_undo(&self) -> bool {
        self.undo_manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_manager.can_redo()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_manager.undo_count()
    }

    pub fn redo_count(&self) -> usize {
        self.undo_manager.redo_count()
    }

    /// Clear undo/redo history.
    pub fn clear_undo_history(&self) {
        self.undo_manager.clear();
    }
}

impl Default for CrdtFormation {
    fn default() -> Self {
        Self::new()
    }
}
