//! Position sampling between keyframes.

use crate::formation::{Formation, Keyframe, Position, PositionMap};

/// Signed shortest rotation from `from` to `to`, in degrees within `(-180, 180]`.
pub fn shortest_angle_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

/// Interpolate an angle along the shortest arc.
///
/// The result is wrapped into `[0, 360)` only when it leaves that range, so
/// in-range inputs come back bit-exact at `t = 0`.
pub fn lerp_angle(from: f64, to: f64, t: f64) -> f64 {
    if t <= 0.0 {
        return from;
    }
    let angle = from + shortest_angle_delta(from, to) * t;
    if (0.0..360.0).contains(&angle) {
        angle
    } else {
        angle.rem_euclid(360.0)
    }
}

/// Interpolate two positions: x and y linearly, rotation by shortest path.
pub fn lerp_position(a: Position, b: Position, t: f64) -> Position {
    Position {
        x: a.x + (b.x - a.x) * t,
        y: a.y + (b.y - a.y) * t,
        rotation: lerp_angle(a.rotation, b.rotation, t),
    }
}

/// Positions of every performer at `time_ms`.
///
/// Uses the keyframes bracketing the time (`before.timestamp <= t <
/// after.timestamp`). Performers present in both are interpolated with the
/// destination keyframe's easing; performers present in only one hold that
/// keyframe's position. Before the first keyframe the first keyframe is
/// used, after the last keyframe the last one holds.
pub fn positions_at_time(formation: &Formation, time_ms: f64) -> PositionMap {
    let keyframes = &formation.keyframes;
    let (Some(first), Some(last)) = (keyframes.first(), keyframes.last()) else {
        return PositionMap::new();
    };

    let after = keyframes.partition_point(|k| k.timestamp as f64 <= time_ms);
    if after == 0 {
        return first.positions.clone();
    }
    if after >= keyframes.len() {
        return last.positions.clone();
    }

    interpolate_keyframes(&keyframes[after - 1], &keyframes[after], time_ms)
}

fn interpolate_keyframes(before: &Keyframe, after: &Keyframe, time_ms: f64) -> PositionMap {
    let span = after.timestamp.saturating_sub(before.timestamp) as f64;
    let progress = if span > 0.0 {
        (time_ms - before.timestamp as f64) / span
    } else {
        0.0
    };
    let eased = after.transition.unwrap_or_default().apply(progress);

    let mut positions = PositionMap::with_capacity(before.positions.len().max(after.positions.len()));
    for (id, from) in &before.positions {
        let position = match after.positions.get(id) {
            Some(to) => lerp_position(*from, *to, eased),
            None => *from,
        };
        positions.insert(id.clone(), position);
    }
    for (id, to) in &after.positions {
        positions.entry(id.clone()).or_insert(*to);
    }
    positions
}
