//! In-process registry of formations for solo editing.
//!
//! The store is the authoritative copy when collaboration is off. Mutators
//! return the updated entity or `None`/`false` and never notify anyone;
//! callers re-read whatever view state depends on the change.

use crate::export::{ExportError, ExportOptions, export_formation};
use crate::formation::{
    AudioTrack, Formation, FormationId, FormationMeta, Keyframe, MetaUpdate, Performer,
    PerformerUpdate, Position, PositionMap, Transition, new_id,
};
use crate::playback::positions_at_time;
use std::collections::HashMap;

/// Formations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct FormationStore {
    formations: HashMap<FormationId, Formation>,
}

impl FormationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.formations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formations.is_empty()
    }

    /// Create an empty formation with one keyframe at time zero.
    pub fn create_formation(&mut self, meta: FormationMeta) -> &Formation {
        let formation = Formation::from_meta(new_id(), meta);
        log::debug!("Created formation {} ({})", formation.id, formation.name);
        let id = formation.id.clone();
        self.formations.entry(id).or_insert(formation)
    }

    pub fn get_formation(&self, id: &str) -> Option<&Formation> {
        self.formations.get(id)
    }

    pub fn get_formation_mut(&mut self, id: &str) -> Option<&mut Formation> {
        self.formations.get_mut(id)
    }

    /// Insert or replace a formation by id. Keyframes are re-sorted and
    /// positions of unknown performers dropped. Returns the replaced formation.
    pub fn register_formation(&mut self, mut formation: Formation) -> Option<Formation> {
        formation.sort_keyframes();
        formation.prune_dangling_positions();
        if formation.keyframes.is_empty() {
            formation.keyframes.push(Keyframe::new(0));
        }
        self.formations.insert(formation.id.clone(), formation)
    }

    pub fn remove_formation(&mut self, id: &str) -> Option<Formation> {
        self.formations.remove(id)
    }

    /// All formations, ordered by name then id.
    pub fn list(&self) -> Vec<&Formation> {
        let mut formations: Vec<&Formation> = self.formations.values().collect();
        formations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        formations
    }

    pub fn update_meta(&mut self, id: &str, update: &MetaUpdate) -> Option<FormationMeta> {
        let formation = self.formations.get_mut(id)?;
        formation.apply_meta(update);
        Some(formation.meta())
    }

    pub fn set_audio_track(&mut self, id: &str, track: Option<AudioTrack>) -> bool {
        match self.formations.get_mut(id) {
            Some(formation) => {
                formation.audio_track = track;
                true
            }
            None => false,
        }
    }

    /// Add a performer and place it at `position` in every keyframe.
    ///
    /// Fails if the formation is unknown or the performer id is taken.
    pub fn add_performer(
        &mut self,
        formation_id: &str,
        performer: Performer,
        position: Position,
    ) -> Option<Performer> {
        let formation = self.formations.get_mut(formation_id)?;
        if formation.has_performer(performer.id()) {
            log::debug!("Performer {} already in {}", performer.id(), formation_id);
            return None;
        }
        for keyframe in &mut formation.keyframes {
            keyframe.positions.insert(performer.id().to_string(), position);
        }
        formation.performers.push(performer.clone());
        Some(performer)
    }

    pub fn update_performer(
        &mut self,
        formation_id: &str,
        performer_id: &str,
        update: &PerformerUpdate,
    ) -> Option<Performer> {
        let performer = self.formations.get_mut(formation_id)?.performer_mut(performer_id)?;
        update.apply_to(performer);
        Some(performer.clone())
    }

    /// Remove a performer from the roster and from every keyframe.
    pub fn remove_performer(&mut self, formation_id: &str, performer_id: &str) -> Option<Performer> {
        self.formations.get_mut(formation_id)?.remove_performer(performer_id)
    }

    /// Add a keyframe at `timestamp`.
    ///
    /// Without explicit positions the keyframe captures the interpolated
    /// positions at that time, so adding a keyframe never moves anyone.
    pub fn add_keyframe(
        &mut self,
        formation_id: &str,
        timestamp: u64,
        positions: Option<PositionMap>,
    ) -> Option<Keyframe> {
        let formation = self.formations.get_mut(formation_id)?;
        let mut positions =
            positions.unwrap_or_else(|| positions_at_time(formation, timestamp as f64));
        positions.retain(|id, _| formation.has_performer(id));

        let keyframe = Keyframe::new(timestamp).with_positions(positions);
        formation.keyframes.push(keyframe.clone());
        formation.sort_keyframes();
        Some(keyframe)
    }

    /// Remove a keyframe. The last remaining keyframe cannot be removed.
    pub fn remove_keyframe(&mut self, formation_id: &str, keyframe_id: &str) -> Option<Keyframe> {
        let formation = self.formations.get_mut(formation_id)?;
        let index = formation.keyframe_index(keyframe_id)?;
        if formation.keyframes.len() <= 1 {
            log::debug!("Refusing to remove the only keyframe of {formation_id}");
            return None;
        }
        Some(formation.keyframes.remove(index))
    }

    /// Change a keyframe's timestamp and re-sort.
    pub fn move_keyframe(
        &mut self,
        formation_id: &str,
        keyframe_id: &str,
        timestamp: u64,
    ) -> Option<Keyframe> {
        let formation = self.formations.get_mut(formation_id)?;
        let keyframe = formation.keyframe_mut(keyframe_id)?;
        keyframe.timestamp = timestamp;
        let moved = keyframe.clone();
        formation.sort_keyframes();
        Some(moved)
    }

    pub fn set_transition(
        &mut self,
        formation_id: &str,
        keyframe_id: &str,
        transition: Option<Transition>,
    ) -> Option<Keyframe> {
        let keyframe = self.formations.get_mut(formation_id)?.keyframe_mut(keyframe_id)?;
        keyframe.transition = transition;
        Some(keyframe.clone())
    }

    /// Set one performer's position in one keyframe.
    pub fn update_position(
        &mut self,
        formation_id: &str,
        keyframe_id: &str,
        performer_id: &str,
        position: Position,
    ) -> Option<Position> {
        let formation = self.formations.get_mut(formation_id)?;
        if !formation.has_performer(performer_id) {
            return None;
        }
        let keyframe = formation.keyframe_mut(keyframe_id)?;
        keyframe.positions.insert(performer_id.to_string(), position);
        Some(position)
    }

    /// Replace every position of a keyframe, e.g. when restoring history.
    /// Positions of unknown performers are dropped.
    pub fn set_keyframe_positions(
        &mut self,
        formation_id: &str,
        keyframe_id: &str,
        mut positions: PositionMap,
    ) -> bool {
        let Some(formation) = self.formations.get_mut(formation_id) else {
            return false;
        };
        positions.retain(|id, _| formation.has_performer(id));
        match formation.keyframe_mut(keyframe_id) {
            Some(keyframe) => {
                keyframe.positions = positions;
                true
            }
            None => false,
        }
    }

    pub fn positions_at_time(&self, formation_id: &str, time_ms: f64) -> Option<PositionMap> {
        self.formations
            .get(formation_id)
            .map(|formation| positions_at_time(formation, time_ms))
    }

    pub fn export_formation(&self, formation_id: &str, options: &ExportOptions) -> Result<Vec<u8>, ExportError> {
        let formation = self
            .formations
            .get(formation_id)
            .ok_or_else(|| ExportError::FormationNotFound(formation_id.to_string()))?;
        export_formation(formation, options)
    }
}
