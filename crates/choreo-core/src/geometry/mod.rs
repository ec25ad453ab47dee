//! Geometry toolkit: snapping, shape generators, alignment and distribution.
//!
//! Everything here is a pure function of its inputs. Collaborating clients
//! may compute positions locally before a remote echo arrives, so identical
//! inputs must give identical outputs on every client.

mod arrange;
mod generate;
mod snap;

pub use arrange::{Alignment, Distribution, align_positions, distribute_positions};
pub use generate::{generate_arc_positions, generate_block_positions, generate_line_positions};
pub use snap::{
    CountPosition, CountSettings, SnapMode, clamp_to_stage, count_at, snap_position, snap_to_count,
    snap_to_grid,
};
