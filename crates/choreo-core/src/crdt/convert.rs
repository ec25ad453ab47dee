//! Conversion between formation types and Loro values.

use crate::formation::{AudioTrack, FormationMeta, Keyframe, Performer, Position, Transition};
use loro::{LoroMap, LoroMapValue, LoroResult, LoroValue};

// Shared keys
pub(crate) const KEY_ID: &str = "id";
pub(crate) const KEY_NAME: &str = "name";

// Meta keys
pub(crate) const KEY_DESCRIPTION: &str = "description";
pub(crate) const KEY_STAGE_WIDTH: &str = "stage_width";
pub(crate) const KEY_STAGE_HEIGHT: &str = "stage_height";
pub(crate) const KEY_GRID_SIZE: &str = "grid_size";

// Performer keys
pub(crate) const KEY_LABEL: &str = "label";
pub(crate) const KEY_COLOR: &str = "color";
pub(crate) const KEY_GROUP: &str = "group";

// Keyframe keys
pub(crate) const KEY_TIMESTAMP: &str = "timestamp";
pub(crate) const KEY_TRANSITION: &str = "transition";
pub(crate) const KEY_DURATION: &str = "duration";
pub(crate) const KEY_POSITIONS: &str = "positions";

// Position keys
pub(crate) const KEY_X: &str = "x";
pub(crate) const KEY_Y: &str = "y";
pub(crate) const KEY_ROTATION: &str = "rotation";

// Audio keys
pub(crate) const KEY_URL: &str = "url";
pub(crate) const KEY_FILENAME: &str = "filename";
pub(crate) const KEY_DURATION_MS: &str = "duration_ms";

pub(crate) fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

pub(crate) fn get_u64(map: &LoroMapValue, key: &str) -> Option<u64> {
    match map.get(key)? {
        LoroValue::I64(i) => u64::try_from(*i).ok(),
        LoroValue::Double(d) if *d >= 0.0 => Some(*d as u64),
        _ => None,
    }
}

pub(crate) fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_map<'a>(map: &'a LoroMapValue, key: &str) -> Option<&'a LoroMapValue> {
    match map.get(key)? {
        LoroValue::Map(m) => Some(m),
        _ => None,
    }
}

/// Millisecond values are stored as `i64`, Loro's integer type.
pub(crate) fn ms_to_loro(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

pub fn meta_to_loro(id: &str, meta: &FormationMeta, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, id)?;
    map.insert(KEY_NAME, meta.name.as_str())?;
    match &meta.description {
        Some(description) => map.insert(KEY_DESCRIPTION, description.as_str())?,
        None => map.delete(KEY_DESCRIPTION)?,
    }
    map.insert(KEY_STAGE_WIDTH, meta.stage_width)?;
    map.insert(KEY_STAGE_HEIGHT, meta.stage_height)?;
    map.insert(KEY_GRID_SIZE, meta.grid_size)?;
    Ok(())
}

/// Read meta fields, falling back to defaults for anything missing.
pub fn meta_from_loro(map: &LoroMapValue) -> FormationMeta {
    let defaults = FormationMeta::default();
    FormationMeta {
        name: get_string(map, KEY_NAME).unwrap_or(defaults.name),
        description: get_string(map, KEY_DESCRIPTION),
        stage_width: get_double(map, KEY_STAGE_WIDTH).unwrap_or(defaults.stage_width),
        stage_height: get_double(map, KEY_STAGE_HEIGHT).unwrap_or(defaults.stage_height),
        grid_size: get_double(map, KEY_GRID_SIZE).unwrap_or(defaults.grid_size),
    }
}

pub fn performer_to_loro(performer: &Performer, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, performer.id())?;
    map.insert(KEY_NAME, performer.name.as_str())?;
    map.insert(KEY_LABEL, performer.label.as_str())?;
    map.insert(KEY_COLOR, performer.color.as_str())?;
    if let Some(group) = &performer.group {
        map.insert(KEY_GROUP, group.as_str())?;
    }
    Ok(())
}

pub fn performer_from_loro(map: &LoroMapValue) -> Option<Performer> {
    let mut performer = Performer::with_id(
        get_string(map, KEY_ID)?,
        get_string(map, KEY_NAME).unwrap_or_default(),
        get_string(map, KEY_LABEL).unwrap_or_default(),
        get_string(map, KEY_COLOR).unwrap_or_default(),
    );
    performer.group = get_string(map, KEY_GROUP);
    Some(performer)
}

pub fn position_to_loro(position: &Position, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_X, position.x)?;
    map.insert(KEY_Y, position.y)?;
    map.insert(KEY_ROTATION, position.rotation)?;
    Ok(())
}

/// Write only the fields that differ from what `map` already holds, so
/// concurrent edits to different fields of one position both survive.
pub fn position_diff_to_loro(position: &Position, map: &LoroMap) -> LoroResult<bool> {
    let current = match map.get_deep_value() {
        LoroValue::Map(existing) => position_from_loro(&existing),
        _ => None,
    };
    let mut changed = false;
    for (key, value, old) in [
        (KEY_X, position.x, current.map(|p| p.x)),
        (KEY_Y, position.y, current.map(|p| p.y)),
        (KEY_ROTATION, position.rotation, current.map(|p| p.rotation)),
    ] {
        if old != Some(value) {
            map.insert(key, value)?;
            changed = true;
        }
    }
    Ok(changed)
}

pub fn position_from_loro(map: &LoroMapValue) -> Option<Position> {
    Some(Position {
        x: get_double(map, KEY_X)?,
        y: get_double(map, KEY_Y)?,
        rotation: get_double(map, KEY_ROTATION).unwrap_or(0.0),
    })
}

/// Write a keyframe into an empty map. Positions go into a nested map of
/// per-performer maps.
pub fn keyframe_to_loro(keyframe: &Keyframe, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, keyframe.id())?;
    map.insert(KEY_TIMESTAMP, ms_to_loro(keyframe.timestamp))?;
    if let Some(transition) = keyframe.transition {
        map.insert(KEY_TRANSITION, transition.as_str())?;
    }
    if let Some(duration) = keyframe.duration {
        map.insert(KEY_DURATION, ms_to_loro(duration))?;
    }
    let positions = map.insert_container(KEY_POSITIONS, LoroMap::new())?;
    for (performer_id, position) in &keyframe.positions {
        let entry = positions.insert_container(performer_id, LoroMap::new())?;
        position_to_loro(position, &entry)?;
    }
    Ok(())
}

pub fn keyframe_from_loro(map: &LoroMapValue) -> Option<Keyframe> {
    let mut keyframe = Keyframe::with_id(get_string(map, KEY_ID)?, get_u64(map, KEY_TIMESTAMP)?);
    keyframe.transition = get_string(map, KEY_TRANSITION).and_then(|t| Transition::parse(&t));
    keyframe.duration = get_u64(map, KEY_DURATION);
    if let Some(positions) = get_map(map, KEY_POSITIONS) {
        for (performer_id, value) in positions.iter() {
            let LoroValue::Map(entry) = value else {
                continue;
            };
            if let Some(position) = position_from_loro(entry) {
                keyframe.positions.insert(performer_id.clone(), position);
            }
        }
    }
    Some(keyframe)
}

pub fn audio_to_loro(track: &AudioTrack, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, track.id.as_str())?;
    map.insert(KEY_URL, track.url.as_str())?;
    map.insert(KEY_FILENAME, track.filename.as_str())?;
    map.insert(KEY_DURATION_MS, ms_to_loro(track.duration_ms))?;
    Ok(())
}

pub fn audio_from_loro(map: &LoroMapValue) -> Option<AudioTrack> {
    Some(AudioTrack {
        id: get_string(map, KEY_ID)?,
        url: get_string(map, KEY_URL)?,
        filename: get_string(map, KEY_FILENAME).unwrap_or_default(),
        duration_ms: get_u64(map, KEY_DURATION_MS).unwrap_or(0),
    })
}
