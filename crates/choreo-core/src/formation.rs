//! Formation document model.
//!
//! A [`Formation`] owns its performers and an ordered list of keyframes. Every
//! keyframe maps performer ids to [`Position`] values; positions are plain
//! `Copy` values so snapshots never alias across keyframes.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Formation identifier.
pub type FormationId = String;
/// Performer identifier.
pub type PerformerId = String;
/// Keyframe identifier.
pub type KeyframeId = String;
/// Positions of one keyframe, keyed by performer.
pub type PositionMap = HashMap<PerformerId, Position>;

/// Default stage width in stage units.
pub const DEFAULT_STAGE_WIDTH: f64 = 40.0;
/// Default stage height in stage units.
pub const DEFAULT_STAGE_HEIGHT: f64 = 30.0;
/// Default grid spacing in stage units.
pub const DEFAULT_GRID_SIZE: f64 = 2.0;
/// Upper bound of the percentage coordinate space.
pub const STAGE_EXTENT: f64 = 100.0;

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A performer's location on stage, in percent of the stage size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// Facing, in degrees.
    #[serde(default)]
    pub rotation: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, rotation: 0.0 }
    }

    pub fn with_rotation(x: f64, y: f64, rotation: f64) -> Self {
        Self { x, y, rotation }
    }

    /// Centre of the stage.
    pub fn center() -> Self {
        Self::new(STAGE_EXTENT / 2.0, STAGE_EXTENT / 2.0)
    }

    pub fn to_point(self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Same rotation, new coordinates.
    pub fn moved_to(self, point: Point) -> Self {
        Self { x: point.x, y: point.y, rotation: self.rotation }
    }
}

impl From<Point> for Position {
    fn from(point: Point) -> Self {
        Self::new(point.x, point.y)
    }
}

/// An individually positioned entity within a formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    id: PerformerId,
    pub name: String,
    pub label: String,
    /// CSS-style color string, e.g. `#ff8800`.
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Performer {
    /// Create a performer with a fresh id.
    pub fn new(name: impl Into<String>, label: impl Into<String>, color: impl Into<String>) -> Self {
        Self::with_id(new_id(), name, label, color)
    }

    /// Create a performer with a known id (loaded or replicated).
    pub fn with_id(
        id: impl Into<PerformerId>,
        name: impl Into<String>,
        label: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            label: label.into(),
            color: color.into(),
            group: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Mutable performer fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformerUpdate {
    pub name: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
    /// `Some(None)` clears the group.
    pub group: Option<Option<String>>,
}

impl PerformerUpdate {
    pub fn apply_to(&self, performer: &mut Performer) {
        if let Some(name) = &self.name {
            performer.name = name.clone();
        }
        if let Some(label) = &self.label {
            performer.label = label.clone();
        }
        if let Some(color) = &self.color {
            performer.color = color.clone();
        }
        if let Some(group) = &self.group {
            performer.group = group.clone();
        }
    }
}

/// Easing used when moving into a keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Transition {
    /// Map linear progress in `[0, 1]` to eased progress. Endpoints are fixed.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::EaseIn => "ease_in",
            Self::EaseOut => "ease_out",
            Self::EaseInOut => "ease_in_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "linear" => Some(Self::Linear),
            "ease_in" => Some(Self::EaseIn),
            "ease_out" => Some(Self::EaseOut),
            "ease_in_out" => Some(Self::EaseInOut),
            _ => None,
        }
    }
}

/// A named instant with a full or partial position assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    id: KeyframeId,
    /// Milliseconds from the start of the formation.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    /// How long the keyframe holds, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub positions: PositionMap,
}

impl Keyframe {
    pub fn new(timestamp: u64) -> Self {
        Self::with_id(new_id(), timestamp)
    }

    pub fn with_id(id: impl Into<KeyframeId>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            transition: None,
            duration: None,
            positions: PositionMap::new(),
        }
    }

    pub fn with_positions(mut self, positions: PositionMap) -> Self {
        self.positions = positions;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self, performer_id: &str) -> Option<Position> {
        self.positions.get(performer_id).copied()
    }

    /// Time at which this keyframe stops holding.
    pub fn end_time(&self) -> u64 {
        self.timestamp.saturating_add(self.duration.unwrap_or(0))
    }
}

/// Reference to an audio file played under the formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub duration_ms: u64,
}

/// Descriptive and stage fields of a formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub stage_width: f64,
    pub stage_height: f64,
    pub grid_size: f64,
}

impl FormationMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for FormationMeta {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            description: None,
            stage_width: DEFAULT_STAGE_WIDTH,
            stage_height: DEFAULT_STAGE_HEIGHT,
            grid_size: DEFAULT_GRID_SIZE,
        }
    }
}

/// Partial update of [`FormationMeta`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub stage_width: Option<f64>,
    pub stage_height: Option<f64>,
    pub grid_size: Option<f64>,
}

/// A named document containing performers and their keyframed positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    pub id: FormationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub stage_width: f64,
    pub stage_height: f64,
    pub grid_size: f64,
    #[serde(default)]
    pub performers: Vec<Performer>,
    /// Sorted by timestamp, ascending.
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_track: Option<AudioTrack>,
}

impl Formation {
    /// Create an empty formation with a single keyframe at time zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_meta(new_id(), FormationMeta::named(name))
    }

    /// Create an empty formation with explicit id and stage settings.
    pub fn from_meta(id: impl Into<FormationId>, meta: FormationMeta) -> Self {
        Self {
            id: id.into(),
            name: meta.name,
            description: meta.description,
            stage_width: meta.stage_width,
            stage_height: meta.stage_height,
            grid_size: meta.grid_size,
            performers: Vec::new(),
            keyframes: vec![Keyframe::new(0)],
            audio_track: None,
        }
    }

    pub fn meta(&self) -> FormationMeta {
        FormationMeta {
            name: self.name.clone(),
            description: self.description.clone(),
            stage_width: self.stage_width,
            stage_height: self.stage_height,
            grid_size: self.grid_size,
        }
    }

    pub fn apply_meta(&mut self, update: &MetaUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(width) = update.stage_width {
            self.stage_width = width;
        }
        if let Some(height) = update.stage_height {
            self.stage_height = height;
        }
        if let Some(grid) = update.grid_size {
            self.grid_size = grid;
        }
    }

    pub fn performer(&self, id: &str) -> Option<&Performer> {
        self.performers.iter().find(|p| p.id == id)
    }

    pub fn performer_mut(&mut self, id: &str) -> Option<&mut Performer> {
        self.performers.iter_mut().find(|p| p.id == id)
    }

    pub fn has_performer(&self, id: &str) -> bool {
        self.performer(id).is_some()
    }

    /// Performer ids in roster order.
    pub fn performer_ids(&self) -> Vec<PerformerId> {
        self.performers.iter().map(|p| p.id.clone()).collect()
    }

    /// Remove a performer and its position from every keyframe.
    pub fn remove_performer(&mut self, id: &str) -> Option<Performer> {
        let index = self.performers.iter().position(|p| p.id == id)?;
        let performer = self.performers.remove(index);
        for keyframe in &mut self.keyframes {
            keyframe.positions.remove(id);
        }
        Some(performer)
    }

    pub fn keyframe(&self, id: &str) -> Option<&Keyframe> {
        self.keyframes.iter().find(|k| k.id == id)
    }

    pub fn keyframe_mut(&mut self, id: &str) -> Option<&mut Keyframe> {
        self.keyframes.iter_mut().find(|k| k.id == id)
    }

    pub fn keyframe_index(&self, id: &str) -> Option<usize> {
        self.keyframes.iter().position(|k| k.id == id)
    }

    pub fn first_keyframe(&self) -> Option<&Keyframe> {
        self.keyframes.first()
    }

    pub fn last_keyframe(&self) -> Option<&Keyframe> {
        self.keyframes.last()
    }

    /// Re-establish timestamp ordering. The sort is stable so keyframes that
    /// share a timestamp keep their insertion order.
    pub fn sort_keyframes(&mut self) {
        self.keyframes.sort_by_key(|k| k.timestamp);
    }

    pub fn keyframes_sorted(&self) -> bool {
        self.keyframes.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// Length of the formation in milliseconds: the end of the last keyframe's
    /// hold, or the audio track if that runs longer.
    pub fn duration_ms(&self) -> u64 {
        let keyframes_end = self.keyframes.iter().map(Keyframe::end_time).max().unwrap_or(0);
        let audio_end = self.audio_track.as_ref().map(|a| a.duration_ms).unwrap_or(0);
        keyframes_end.max(audio_end)
    }

    /// Drop positions that reference performers no longer in the roster.
    pub fn prune_dangling_positions(&mut self) {
        let ids: std::collections::HashSet<&str> =
            self.performers.iter().map(|p| p.id.as_str()).collect();
        for keyframe in &mut self.keyframes {
            keyframe.positions.retain(|pid, _| ids.contains(pid.as_str()));
        }
    }

    /// Serialize the formation to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a formation from JSON, re-sorting keyframes.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut formation: Self = serde_json::from_str(json)?;
        formation.sort_keyframes();
        Ok(formation)
    }
}
