//! Flattened, time-sampled export of a formation.
//!
//! The export walks the formation from zero to its duration in fixed steps and
//! writes every performer's interpolated position at each step. The last
//! sample always lands exactly on the duration.

use crate::formation::{Formation, Keyframe, Position};
use crate::playback::positions_at_time;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default distance between samples, in milliseconds.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Formation not found: {0}")]
    FormationNotFound(String),
    #[error("Sample interval must be positive")]
    InvalidInterval,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub sample_interval_ms: u64,
    /// Also embed the raw keyframes (JSON only).
    pub include_keyframes: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            include_keyframes: true,
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    id: &'a str,
    name: &'a str,
    stage_width: f64,
    stage_height: f64,
    duration_ms: u64,
    sample_interval_ms: u64,
    performers: Vec<ExportPerformer<'a>>,
    frames: Vec<ExportFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyframes: Option<&'a [Keyframe]>,
}

#[derive(Serialize)]
struct ExportPerformer<'a> {
    id: &'a str,
    name: &'a str,
    label: &'a str,
    color: &'a str,
}

#[derive(Serialize)]
struct ExportFrame {
    time_ms: u64,
    /// One entry per performer, in roster order. `None` where the performer
    /// has no position at that time.
    positions: Vec<Option<Position>>,
}

/// Sample times from zero to `duration` inclusive.
pub fn sample_times(duration_ms: u64, interval_ms: u64) -> Vec<u64> {
    if interval_ms == 0 {
        return vec![0];
    }
    let mut times: Vec<u64> = (0..=duration_ms).step_by(interval_ms as usize).collect();
    if times.last() != Some(&duration_ms) {
        times.push(duration_ms);
    }
    times
}

fn sample_frames(formation: &Formation, interval_ms: u64) -> Vec<ExportFrame> {
    sample_times(formation.duration_ms(), interval_ms)
        .into_iter()
        .map(|time_ms| {
            let positions = positions_at_time(formation, time_ms as f64);
            ExportFrame {
                time_ms,
                positions: formation
                    .performers
                    .iter()
                    .map(|p| positions.get(p.id()).copied())
                    .collect(),
            }
        })
        .collect()
}

/// Render `formation` into the requested format.
pub fn export_formation(formation: &Formation, options: &ExportOptions) -> Result<Vec<u8>, ExportError> {
    if options.sample_interval_ms == 0 {
        return Err(ExportError::InvalidInterval);
    }
    let frames = sample_frames(formation, options.sample_interval_ms);
    log::debug!(
        "Exporting formation {} as {:?}: {} frames",
        formation.id,
        options.format,
        frames.len()
    );

    match options.format {
        ExportFormat::Json => export_json(formation, options, frames),
        ExportFormat::Csv => Ok(export_csv(formation, &frames)),
    }
}

fn export_json(
    formation: &Formation,
    options: &ExportOptions,
    frames: Vec<ExportFrame>,
) -> Result<Vec<u8>, ExportError> {
    let document = ExportDocument {
        id: &formation.id,
        name: &formation.name,
        stage_width: formation.stage_width,
        stage_height: formation.stage_height,
        duration_ms: formation.duration_ms(),
        sample_interval_ms: options.sample_interval_ms,
        performers: formation
            .performers
            .iter()
            .map(|p| ExportPerformer {
                id: p.id(),
                name: &p.name,
                label: &p.label,
                color: &p.color,
            })
            .collect(),
        frames,
        keyframes: options.include_keyframes.then_some(formation.keyframes.as_slice()),
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

fn export_csv(formation: &Formation, frames: &[ExportFrame]) -> Vec<u8> {
    let mut out = String::from("time_ms,performer_id,performer_name,x,y,rotation\n");
    for frame in frames {
        for (performer, position) in formation.performers.iter().zip(&frame.positions) {
            let Some(position) = position else {
                continue;
            };
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                frame.time_ms,
                csv_field(performer.id()),
                csv_field(&performer.name),
                position.x,
                position.y,
                position.rotation
            ));
        }
    }
    out.into_bytes()
}

/// Quote a field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
