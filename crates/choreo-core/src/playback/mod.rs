//! Time-based playback: interpolation between keyframes and the clock that
//! drives it.

mod engine;
mod interpolate;

pub use engine::{DEFAULT_TICK_INTERVAL, PlaybackEngine, PlaybackState, PlaybackStatus};
pub use interpolate::{lerp_angle, lerp_position, positions_at_time, shortest_angle_delta};
