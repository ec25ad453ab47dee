//! Alignment and distribution of a selection of positions.
//!
//! Both operations are order-preserving: `output[i]` is the new position of
//! `input[i]`.

use crate::formation::Position;
use serde::{Deserialize, Serialize};

/// Which edge or centre line to align to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Top,
    Middle,
    Bottom,
}

impl Alignment {
    fn collapses_x(self) -> bool {
        matches!(self, Alignment::Left | Alignment::Center | Alignment::Right)
    }
}

/// How to space a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Horizontal,
    Vertical,
    /// Equal Euclidean spacing between the two extreme positions.
    Equal,
}

/// Collapse one axis to the min, mean or max of the selection.
///
/// Needs at least two positions; smaller inputs come back unchanged.
pub fn align_positions(positions: &[Position], alignment: Alignment) -> Vec<Position> {
    if positions.len() < 2 {
        log::debug!("align_positions: need at least 2 positions, got {}", positions.len());
        return positions.to_vec();
    }

    let axis: Vec<f64> = if alignment.collapses_x() {
        positions.iter().map(|p| p.x).collect()
    } else {
        positions.iter().map(|p| p.y).collect()
    };
    let min = axis.iter().copied().fold(f64::INFINITY, f64::min);
    let max = axis.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = axis.iter().sum::<f64>() / axis.len() as f64;

    let target = match alignment {
        Alignment::Left | Alignment::Top => min,
        Alignment::Center | Alignment::Middle => mean,
        Alignment::Right | Alignment::Bottom => max,
    };

    positions
        .iter()
        .map(|p| {
            if alignment.collapses_x() {
                Position { x: target, ..*p }
            } else {
                Position { y: target, ..*p }
            }
        })
        .collect()
}

/// Respace the interior of a selection at equal intervals, keeping the two
/// extremes fixed.
///
/// Needs at least three positions; smaller inputs come back unchanged.
pub fn distribute_positions(positions: &[Position], distribution: Distribution) -> Vec<Position> {
    if positions.len() < 3 {
        log::debug!("distribute_positions: need at least 3 positions, got {}", positions.len());
        return positions.to_vec();
    }

    let mut result = positions.to_vec();
    match distribution {
        Distribution::Horizontal => respace_axis(&mut result, |p| p.x, |p, v| p.x = v),
        Distribution::Vertical => respace_axis(&mut result, |p| p.y, |p, v| p.y = v),
        Distribution::Equal => respace_along_span(&mut result),
    }
    result
}

/// Indices of `positions` sorted by `key`. Stable, so ties keep input order.
fn sorted_order(positions: &[Position], key: impl Fn(&Position) -> f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by(|&a, &b| key(&positions[a]).total_cmp(&key(&positions[b])));
    order
}

fn respace_axis(
    positions: &mut [Position],
    get: impl Fn(&Position) -> f64,
    set: impl Fn(&mut Position, f64),
) {
    let order = sorted_order(positions, &get);
    let last = order.len() - 1;
    let first_value = get(&positions[order[0]]);
    let step = (get(&positions[order[last]]) - first_value) / last as f64;

    for (rank, &index) in order.iter().enumerate().take(last).skip(1) {
        set(&mut positions[index], first_value + step * rank as f64);
    }
}

fn respace_along_span(positions: &mut [Position]) {
    let (min_x, max_x, min_y, max_y) = positions.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(x0, x1, y0, y1), p| (x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y)),
    );

    let order = if max_x - min_x >= max_y - min_y {
        sorted_order(positions, |p| p.x)
    } else {
        sorted_order(positions, |p| p.y)
    };
    let last = order.len() - 1;
    let start = positions[order[0]].to_point();
    let end = positions[order[last]].to_point();

    for (rank, &index) in order.iter().enumerate().take(last).skip(1) {
        let point = start.lerp(end, rank as f64 / last as f64);
        positions[index] = positions[index].moved_to(point);
    }
}
