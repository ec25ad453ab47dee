//! Snapping positions to the stage grid and timestamps to musical counts.

use crate::formation::{Position, STAGE_EXTENT};
use serde::{Deserialize, Serialize};

/// Snap mode for placing performers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapMode {
    /// Free placement, clamped to the stage.
    #[default]
    None,
    /// Snap to grid intersections.
    Grid,
}

impl SnapMode {
    /// Cycle to the next snap mode.
    pub fn next(self) -> Self {
        match self {
            SnapMode::None => SnapMode::Grid,
            SnapMode::Grid => SnapMode::None,
        }
    }

    /// Check if grid snapping is enabled.
    pub fn snaps_to_grid(self) -> bool {
        matches!(self, SnapMode::Grid)
    }
}

/// Clamp a position into the `[0, 100]` stage-percentage square.
pub fn clamp_to_stage(position: Position) -> Position {
    Position {
        x: position.x.clamp(0.0, STAGE_EXTENT),
        y: position.y.clamp(0.0, STAGE_EXTENT),
        rotation: position.rotation,
    }
}

/// Snap a position to the nearest grid intersection and clamp it to the stage.
///
/// `grid_size` is in stage units, so one grid step is `grid_size / stage_width`
/// of the width horizontally and `grid_size / stage_height` of the height
/// vertically. Rotation is preserved.
pub fn snap_to_grid(position: Position, grid_size: f64, stage_width: f64, stage_height: f64) -> Position {
    Position {
        x: snap_axis(position.x, grid_size, stage_width),
        y: snap_axis(position.y, grid_size, stage_height),
        rotation: position.rotation,
    }
}

fn snap_axis(percent: f64, grid_size: f64, stage_extent: f64) -> f64 {
    if grid_size <= 0.0 || stage_extent <= 0.0 {
        return percent.clamp(0.0, STAGE_EXTENT);
    }
    let units = percent * stage_extent / STAGE_EXTENT;
    let snapped = ((units / grid_size).round() * grid_size).clamp(0.0, stage_extent);
    snapped * STAGE_EXTENT / stage_extent
}

/// Snap a position according to `mode`.
pub fn snap_position(
    position: Position,
    mode: SnapMode,
    grid_size: f64,
    stage_width: f64,
    stage_height: f64,
) -> Position {
    match mode {
        SnapMode::None => clamp_to_stage(position),
        SnapMode::Grid => snap_to_grid(position, grid_size, stage_width, stage_height),
    }
}

/// Tempo settings for count-based time display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountSettings {
    /// Beats per minute; one count is one beat.
    pub bpm: f64,
    /// Counts in one phrase (usually 8).
    pub counts_per_phrase: u32,
    /// Time of count one of phrase one.
    pub start_offset_ms: u64,
}

impl Default for CountSettings {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            counts_per_phrase: 8,
            start_offset_ms: 0,
        }
    }
}

impl CountSettings {
    /// Length of a single count in milliseconds.
    pub fn count_duration_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }
}

/// Phrase and count (both 1-based) at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountPosition {
    pub phrase: u32,
    pub count: u32,
}

/// Quantize a timestamp to the nearest count boundary.
///
/// Returns the input unchanged for a non-positive tempo. Never goes below zero.
pub fn snap_to_count(timestamp_ms: u64, settings: &CountSettings) -> u64 {
    if settings.bpm <= 0.0 || !settings.bpm.is_finite() {
        return timestamp_ms;
    }
    let count = settings.count_duration_ms();
    let offset = settings.start_offset_ms as f64;
    let index = ((timestamp_ms as f64 - offset) / count).round();
    let snapped = offset + index * count;
    if snapped <= 0.0 { 0 } else { snapped.round() as u64 }
}

/// The phrase and count a timestamp falls in, or `None` before the offset.
pub fn count_at(timestamp_ms: u64, settings: &CountSettings) -> Option<CountPosition> {
    if settings.bpm <= 0.0 || timestamp_ms < settings.start_offset_ms {
        return None;
    }
    let per_phrase = settings.counts_per_phrase.max(1) as u64;
    let elapsed = (timestamp_ms - settings.start_offset_ms) as f64;
    let index = (elapsed / settings.count_duration_ms()).floor() as u64;
    Some(CountPosition {
        phrase: (index / per_phrase + 1) as u32,
        count: (index % per_phrase + 1) as u32,
    })
}
