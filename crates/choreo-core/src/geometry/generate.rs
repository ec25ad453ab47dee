//! Shape generators: turn a couple of clicks into N performer positions.
//!
//! Angles are in degrees at the API, measured from the +x axis towards +y.
//! Since stage y grows downwards this reads clockwise on screen.

use crate::formation::Position;
use kurbo::{Point, Rect};

/// `count` points evenly spaced from `start` to `end`, endpoints included.
///
/// A single point lands on the midpoint.
pub fn generate_line_positions(start: Point, end: Point, count: usize) -> Vec<Position> {
    match count {
        0 => Vec::new(),
        1 => vec![start.midpoint(end).into()],
        _ => {
            let last = (count - 1) as f64;
            (0..count)
                .map(|i| start.lerp(end, i as f64 / last).into())
                .collect()
        }
    }
}

/// `count` points evenly spaced by angle along an arc.
///
/// The angle is interpolated linearly in radians, so `end_angle < start_angle`
/// simply walks the other way.
pub fn generate_arc_positions(
    center: Point,
    radius: f64,
    start_angle: f64,
    end_angle: f64,
    count: usize,
) -> Vec<Position> {
    let start = start_angle.to_radians();
    let end = end_angle.to_radians();
    let point_at = |t: f64| {
        let angle = start + (end - start) * t;
        Position::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
    };

    match count {
        0 => Vec::new(),
        1 => vec![point_at(0.5)],
        _ => {
            let last = (count - 1) as f64;
            (0..count).map(|i| point_at(i as f64 / last)).collect()
        }
    }
}

/// `count` points in a near-square grid filling the rectangle, row-major.
///
/// Uses `ceil(sqrt(n))` rows and `ceil(n / rows)` columns. A lone row or column
/// sits on the rectangle's centre line.
pub fn generate_block_positions(top_left: Point, bottom_right: Point, count: usize) -> Vec<Position> {
    if count == 0 {
        return Vec::new();
    }

    let rect = Rect::from_points(top_left, bottom_right);
    let rows = (count as f64).sqrt().ceil() as usize;
    let cols = count.div_ceil(rows);
    let center = rect.center();

    let x_at = |col: usize| {
        if cols == 1 {
            center.x
        } else {
            (rect.x0 + rect.width() * col as f64 / (cols - 1) as f64).clamp(rect.x0, rect.x1)
        }
    };
    let y_at = |row: usize| {
        if rows == 1 {
            center.y
        } else {
            (rect.y0 + rect.height() * row as f64 / (rows - 1) as f64).clamp(rect.y0, rect.y1)
        }
    };

    (0..count)
        .map(|i| Position::new(x_at(i % cols), y_at(i / cols)))
        .collect()
}
