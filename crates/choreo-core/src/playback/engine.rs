//! Playback clock.

use super::positions_at_time;
use crate::formation::{Formation, FormationId, PositionMap};
use std::time::{Duration, Instant};

/// Default cadence of [`PlaybackEngine::poll`], about 60 ticks per second.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Where the clock is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Transient playback state, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub looping: bool,
    pub speed: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            looping: false,
            speed: 1.0,
        }
    }
}

type TickCallback = Box<dyn FnMut(f64)>;

/// A time cursor over one formation's keyframes.
///
/// The engine never reads a clock on its own. Drive it either with
/// [`advance`](Self::advance) for deterministic steps or with
/// [`poll`](Self::poll) from the host's frame loop.
pub struct PlaybackEngine {
    state: PlaybackState,
    status: PlaybackStatus,
    formation_id: Option<FormationId>,
    on_tick: Option<TickCallback>,
    tick_interval: Duration,
    last_tick: Option<Instant>,
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &self.state)
            .field("status", &self.status)
            .field("formation_id", &self.formation_id)
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl PlaybackEngine {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            state: PlaybackState::default(),
            status: PlaybackStatus::Stopped,
            formation_id: None,
            on_tick: None,
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            last_tick: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn current_time(&self) -> f64 {
        self.state.current_time
    }

    /// The formation the clock was last started on.
    pub fn formation_id(&self) -> Option<&str> {
        self.formation_id.as_deref()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Point the clock at `formation` without starting it, so the cursor can
    /// be positioned before the first play. A different formation rewinds to
    /// zero.
    pub fn load(&mut self, formation: &Formation) {
        if self.formation_id.as_deref() != Some(formation.id.as_str()) {
            self.formation_id = Some(formation.id.clone());
            self.state.current_time = 0.0;
        }
        self.set_duration(formation.duration_ms() as f64);
    }

    /// Start (or resume) the clock over `formation`.
    ///
    /// Switching to a different formation rewinds to zero. Playing again after
    /// the clock ran off the end also rewinds.
    pub fn play(&mut self, formation: &Formation, on_tick: impl FnMut(f64) + 'static) {
        self.load(formation);
        if self.state.current_time >= self.state.duration {
            self.state.current_time = 0.0;
        }

        self.on_tick = Some(Box::new(on_tick));
        self.status = PlaybackStatus::Playing;
        self.state.is_playing = true;
        self.last_tick = None;
        log::debug!(
            "Playback started on {} at {:.0}ms of {:.0}ms",
            formation.id,
            self.state.current_time,
            self.state.duration
        );
    }

    /// Resume a paused clock with its existing callback.
    pub fn resume(&mut self) -> bool {
        if self.status != PlaybackStatus::Paused || self.on_tick.is_none() {
            return false;
        }
        self.status = PlaybackStatus::Playing;
        self.state.is_playing = true;
        self.last_tick = None;
        true
    }

    pub fn pause(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Paused;
            self.state.is_playing = false;
            self.last_tick = None;
        }
    }

    /// Stop the clock, rewind to zero and return the first keyframe's
    /// positions as stored.
    pub fn stop(&mut self, formation: &Formation) -> PositionMap {
        self.status = PlaybackStatus::Stopped;
        self.state.is_playing = false;
        self.state.current_time = 0.0;
        self.on_tick = None;
        self.last_tick = None;
        formation
            .first_keyframe()
            .map(|k| k.positions.clone())
            .unwrap_or_default()
    }

    /// Move the cursor. Does not start or stop the clock.
    pub fn seek(&mut self, time_ms: f64) {
        let time = if time_ms.is_finite() { time_ms } else { 0.0 };
        self.state.current_time = time.clamp(0.0, self.state.duration.max(0.0));
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.state.speed = speed;
        } else {
            log::debug!("Ignoring playback speed {speed}");
        }
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.state.looping = looping;
    }

    /// Update the duration after the formation was edited. The cursor is
    /// clamped into the new range.
    pub fn set_duration(&mut self, duration_ms: f64) {
        self.state.duration = duration_ms.max(0.0);
        if self.state.current_time > self.state.duration {
            self.state.current_time = self.state.duration;
        }
    }

    /// Step the clock by `elapsed` wall time, scaled by speed.
    ///
    /// At the end the cursor wraps when looping, otherwise it clamps to the
    /// duration and the clock stops. Returns the new time when a tick fired.
    pub fn advance(&mut self, elapsed: Duration) -> Option<f64> {
        if self.status != PlaybackStatus::Playing {
            return None;
        }

        let duration = self.state.duration;
        let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        let mut time = self.state.current_time + elapsed_ms * self.state.speed;
        if time >= duration {
            if self.state.looping && duration > 0.0 {
                time = time.rem_euclid(duration);
            } else {
                time = duration;
                self.status = PlaybackStatus::Stopped;
                self.state.is_playing = false;
                self.last_tick = None;
            }
        }
        self.state.current_time = time;

        if let Some(on_tick) = self.on_tick.as_mut() {
            on_tick(time);
        }
        Some(time)
    }

    /// Wall-clock driver. Call as often as convenient; a tick fires at most
    /// once per tick interval.
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        if self.status != PlaybackStatus::Playing {
            return None;
        }
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return None;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.tick_interval {
            return None;
        }
        self.last_tick = Some(now);
        self.advance(elapsed)
    }

    /// Positions at the cursor.
    pub fn positions(&self, formation: &Formation) -> PositionMap {
        positions_at_time(formation, self.state.current_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::{Keyframe, Position};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn two_second_formation() -> Formation {
        let mut formation = Formation::new("Clock");
        formation.keyframes[0].positions.insert("p".into(), Position::new(0.0, 0.0));
        let mut end = Keyframe::new(2000);
        end.positions.insert("p".into(), Position::new(100.0, 0.0));
        formation.keyframes.push(end);
        formation
    }

    fn recorder() -> (Rc<RefCell<Vec<f64>>>, impl FnMut(f64) + 'static) {
        let ticks = Rc::new(RefCell::new(Vec::new()));
        let sink = ticks.clone();
        (ticks, move |t| sink.borrow_mut().push(t))
    }

    #[test]
    fn test_advance_fires_tick_and_moves_cursor() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        let (ticks, on_tick) = recorder();
        engine.play(&formation, on_tick);

        assert_eq!(engine.advance(Duration::from_millis(500)), Some(500.0));
        assert_eq!(*ticks.borrow(), vec![500.0]);
        assert_eq!(engine.positions(&formation)["p"].x, 25.0);
    }

    #[test]
    fn test_speed_scales_elapsed_time() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.set_speed(2.0);
        engine.play(&formation, |_| {});
        assert_eq!(engine.advance(Duration::from_millis(250)), Some(500.0));

        engine.set_speed(0.0);
        assert_eq!(engine.state().speed, 2.0);
    }

    #[test]
    fn test_end_without_loop_clamps_and_stops() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.play(&formation, |_| {});
        assert_eq!(engine.advance(Duration::from_millis(2500)), Some(2000.0));
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert!(!engine.state().is_playing);
        assert_eq!(engine.advance(Duration::from_millis(10)), None);

        // Playing again rewinds.
        engine.play(&formation, |_| {});
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_loop_wraps_modulo_duration() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.set_loop(true);
        engine.play(&formation, |_| {});
        assert_eq!(engine.advance(Duration::from_millis(2300)), Some(300.0));
        assert!(engine.is_playing());
    }

    #[test]
    fn test_pause_resume_and_seek() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        let (ticks, on_tick) = recorder();
        engine.play(&formation, on_tick);
        engine.advance(Duration::from_millis(100));
        engine.pause();
        assert_eq!(engine.advance(Duration::from_millis(100)), None);

        engine.seek(5000.0);
        assert_eq!(engine.current_time(), 2000.0);
        engine.seek(-3.0);
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.status(), PlaybackStatus::Paused);

        assert!(engine.resume());
        engine.advance(Duration::from_millis(40));
        assert_eq!(*ticks.borrow(), vec![100.0, 40.0]);
    }

    #[test]
    fn test_stop_returns_first_keyframe_verbatim() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.play(&formation, |_| {});
        engine.advance(Duration::from_millis(700));

        let positions = engine.stop(&formation);
        assert_eq!(positions, formation.keyframes[0].positions);
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert!(!engine.resume());
    }

    #[test]
    fn test_poll_ticks_at_fixed_cadence() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::new(Duration::from_millis(16));
        engine.play(&formation, |_| {});

        let start = Instant::now();
        assert_eq!(engine.poll(start), None);
        assert_eq!(engine.poll(start + Duration::from_millis(10)), None);
        assert_eq!(engine.poll(start + Duration::from_millis(16)), Some(16.0));
        assert_eq!(engine.poll(start + Duration::from_millis(20)), None);
        assert_eq!(engine.poll(start + Duration::from_millis(40)), Some(40.0));
    }

    #[test]
    fn test_seek_before_play_keeps_cursor() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.seek(500.0);
        assert_eq!(engine.current_time(), 0.0);

        engine.load(&formation);
        engine.seek(500.0);
        assert_eq!(engine.current_time(), 500.0);
        assert_eq!(engine.status(), PlaybackStatus::Stopped);
        assert_eq!(engine.positions(&formation)["p"].x, 25.0);

        // Playing starts from the cursor.
        engine.play(&formation, |_| {});
        assert_eq!(engine.advance(Duration::from_millis(100)), Some(600.0));

        // Another formation rewinds.
        engine.load(&Formation::new("Other"));
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_set_duration_clamps_cursor() {
        let formation = two_second_formation();
        let mut engine = PlaybackEngine::default();
        engine.play(&formation, |_| {});
        engine.seek(1800.0);
        engine.set_duration(1000.0);
        assert_eq!(engine.current_time(), 1000.0);
    }
}
