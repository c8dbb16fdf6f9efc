//! Frame timing for the external driver.
//!
//! [`FrameClock`] turns wall-clock frames into the `(dt, time)` pair the
//! backends expect. Delta is clamped to `max_delta` so a frame hitch (tab
//! switch, debugger pause) never feeds the physics one huge step.
//!
//! # Example
//!
//! ```ignore
//! use textsplash::time::FrameClock;
//!
//! let mut clock = FrameClock::new();
//! loop {
//!     let (time, dt) = clock.tick();
//!     system.update(dt, time)?;
//! }
//! ```

use std::time::{Duration, Instant};

/// Largest step handed to the physics by default (1/30 s).
pub const DEFAULT_MAX_DELTA: f32 = 1.0 / 30.0;

/// Clamped frame clock.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    /// Simulated seconds since start (sum of clamped deltas).
    elapsed_secs: f32,
    delta_secs: f32,
    frame_count: u64,
    max_delta: f32,
    /// Fixed delta for deterministic runs.
    fixed_delta: Option<f32>,
    paused: bool,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            frame_count: 0,
            max_delta: DEFAULT_MAX_DELTA,
            fixed_delta: None,
            paused: false,
        }
    }

    /// Clock that always advances by `dt`, ignoring the wall clock.
    pub fn fixed(dt: f32) -> Self {
        let mut clock = Self::new();
        clock.set_fixed_delta(Some(dt));
        clock
    }

    pub fn with_max_delta(mut self, max_delta: f32) -> Self {
        self.max_delta = max_delta.max(0.0);
        self
    }

    /// Advance one frame. Returns `(elapsed, delta)`.
    pub fn tick(&mut self) -> (f32, f32) {
        let now = Instant::now();
        if self.paused {
            self.delta_secs = 0.0;
            self.last_frame = now;
            return (self.elapsed_secs, 0.0);
        }

        let raw = self
            .fixed_delta
            .unwrap_or_else(|| now.duration_since(self.last_frame).as_secs_f32());
        self.delta_secs = raw.clamp(0.0, self.max_delta);
        self.elapsed_secs += self.delta_secs;
        self.last_frame = now;
        self.frame_count += 1;

        (self.elapsed_secs, self.delta_secs)
    }

    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn max_delta(&self) -> f32 {
        self.max_delta
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Wall-clock time since the clock was created or reset.
    pub fn wall_time(&self) -> Duration {
        self.start.elapsed()
    }

    /// While paused, `tick` returns a zero delta and elapsed stops.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.last_frame = Instant::now();
            self.paused = false;
        }
    }

    pub fn set_fixed_delta(&mut self, delta: Option<f32>) {
        self.fixed_delta = delta;
    }

    /// Restart from zero, e.g. when the loop restarts.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_frame = now;
        self.elapsed_secs = 0.0;
        self.delta_secs = 0.0;
        self.frame_count = 0;
        self.paused = false;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clock_new() {
        let clock = FrameClock::new();
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.elapsed(), 0.0);
        assert!(!clock.is_paused());
        assert_eq!(clock.max_delta(), DEFAULT_MAX_DELTA);
    }

    #[test]
    fn test_clock_tick() {
        let mut clock = FrameClock::new();
        thread::sleep(Duration::from_millis(5));
        let (elapsed, delta) = clock.tick();
        assert!(delta > 0.0);
        assert_eq!(elapsed, delta);
        assert_eq!(clock.frame(), 1);
    }

    #[test]
    fn test_delta_is_clamped() {
        let mut clock = FrameClock::new().with_max_delta(0.01);
        thread::sleep(Duration::from_millis(50));
        let (_, delta) = clock.tick();
        assert_eq!(delta, 0.01);
    }

    #[test]
    fn test_fixed_delta() {
        let mut clock = FrameClock::fixed(1.0 / 120.0);
        for _ in 0..120 {
            clock.tick();
        }
        assert!((clock.elapsed() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_fixed_delta_still_clamped() {
        let mut clock = FrameClock::fixed(1.0);
        let (_, delta) = clock.tick();
        assert_eq!(delta, DEFAULT_MAX_DELTA);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut clock = FrameClock::fixed(0.01);
        clock.tick();
        clock.pause();
        let (elapsed, delta) = clock.tick();
        assert_eq!(delta, 0.0);
        assert!((elapsed - 0.01).abs() < 1e-6);
        assert_eq!(clock.frame(), 1);

        clock.resume();
        clock.tick();
        assert!((clock.elapsed() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut clock = FrameClock::fixed(0.01);
        clock.tick();
        clock.pause();
        clock.reset();
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.elapsed(), 0.0);
        assert!(!clock.is_paused());
    }
}
