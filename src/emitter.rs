//! Spawn cues and batch builders for the external driver.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SpawnWindow`] | Fires once per loop when a looping timestamp enters `[start, end)` |
//! | [`SplashEmitter`] | Builds a [`SpawnBatch`] over a box-shaped source region |
//!
//! # Example
//!
//! ```ignore
//! let mut window = SpawnWindow::new(1.2, 1.6);
//! let emitter = SplashEmitter::default();
//!
//! if window.poll(video_time) {
//!     system.spawn(&emitter.emit(5000, &mut rng))?;
//! }
//! ```

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::particles::SpawnBatch;
use crate::rng::SplashRng;

/// Timestamp window that triggers one spawn per loop.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnWindow {
    pub start: f32,
    pub end: f32,
    armed: bool,
    last: Option<f32>,
}

impl SpawnWindow {
    pub fn new(start: f32, end: f32) -> Self {
        Self {
            start,
            end: end.max(start),
            armed: true,
            last: None,
        }
    }

    /// Feed the current loop timestamp. Returns `true` once when it enters
    /// the window, including when a long frame jumps over it entirely.
    /// A timestamp smaller than the previous one means the loop wrapped and
    /// re-arms the window.
    pub fn poll(&mut self, timestamp: f32) -> bool {
        let jumped_over = match self.last {
            Some(last) if timestamp < last => {
                self.armed = true;
                false
            }
            Some(last) => last < self.start && timestamp >= self.end,
            None => false,
        };
        self.last = Some(timestamp);

        let inside = timestamp >= self.start && timestamp < self.end;
        if self.armed && (inside || jumped_over) {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Re-arm without waiting for a wrap, e.g. after a manual reset.
    pub fn rearm(&mut self) {
        self.armed = true;
        self.last = None;
    }
}

/// Source of a splash: a box of spawn positions plus velocity, size and
/// seed ranges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplashEmitter {
    pub region_min: Vec3,
    pub region_max: Vec3,
    /// Base velocity of every drop.
    pub velocity: Vec3,
    /// Per-axis uniform jitter added to `velocity`.
    pub velocity_jitter: Vec3,
    pub size_min: f32,
    pub size_max: f32,
    /// Range of the per-particle timing seed.
    pub seed_min: f32,
    pub seed_max: f32,
}

impl Default for SplashEmitter {
    fn default() -> Self {
        Self {
            region_min: Vec3::new(-1.5, -0.2, 1.0),
            region_max: Vec3::new(1.5, 1.0, 1.3),
            velocity: Vec3::new(0.0, 0.5, -3.0),
            velocity_jitter: Vec3::new(0.3, 0.3, 0.4),
            size_min: 0.01,
            size_max: 0.03,
            seed_min: 0.0,
            seed_max: 1.0,
        }
    }
}

impl SplashEmitter {
    pub fn with_region(mut self, min: Vec3, max: Vec3) -> Self {
        self.region_min = min.min(max);
        self.region_max = min.max(max);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3, jitter: Vec3) -> Self {
        self.velocity = velocity;
        self.velocity_jitter = jitter.abs();
        self
    }

    pub fn with_sizes(mut self, min: f32, max: f32) -> Self {
        self.size_min = min.min(max).max(0.0);
        self.size_max = min.max(max).max(0.0);
        self
    }

    /// Build a batch of `count` falling drops.
    pub fn emit<R: SplashRng + ?Sized>(&self, count: usize, rng: &mut R) -> SpawnBatch {
        let mut batch = SpawnBatch::with_capacity(count);
        for _ in 0..count {
            let position = Vec3::new(
                rng.range(self.region_min.x, self.region_max.x),
                rng.range(self.region_min.y, self.region_max.y),
                rng.range(self.region_min.z, self.region_max.z),
            );
            let j = self.velocity_jitter;
            let velocity = self.velocity
                + Vec3::new(rng.range(-j.x, j.x), rng.range(-j.y, j.y), rng.range(-j.z, j.z));
            let size = rng.range(self.size_min, self.size_max);
            let seed = rng.range(self.seed_min, self.seed_max).clamp(0.0, 1.0);
            batch.push(position, velocity, size, seed);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded_rng;

    // ========== SpawnWindow Tests ==========

    #[test]
    fn test_window_fires_once_per_loop() {
        let mut window = SpawnWindow::new(1.0, 2.0);
        assert!(!window.poll(0.5));
        assert!(window.poll(1.1));
        assert!(!window.poll(1.5));
        assert!(!window.poll(2.5));
        assert!(!window.is_armed());
    }

    #[test]
    fn test_window_rearms_on_wrap() {
        let mut window = SpawnWindow::new(1.0, 2.0);
        assert!(window.poll(1.2));
        // Loop restarts
        assert!(!window.poll(0.1));
        assert!(window.is_armed());
        assert!(window.poll(1.3));
    }

    #[test]
    fn test_window_fires_when_jumped_over() {
        let mut window = SpawnWindow::new(1.0, 1.1);
        assert!(!window.poll(0.9));
        assert!(window.poll(1.5));
    }

    #[test]
    fn test_window_manual_rearm() {
        let mut window = SpawnWindow::new(0.0, 1.0);
        assert!(window.poll(0.5));
        window.rearm();
        assert!(window.poll(0.6));
    }

    // ========== SplashEmitter Tests ==========

    #[test]
    fn test_emit_stays_in_ranges() {
        let emitter = SplashEmitter::default()
            .with_region(Vec3::new(-1.0, 2.0, 0.0), Vec3::new(1.0, 3.0, 0.5))
            .with_velocity(Vec3::NEG_Y, Vec3::splat(0.1))
            .with_sizes(0.02, 0.04);
        let mut rng = seeded_rng(Some(3));
        let batch = emitter.emit(500, &mut rng);

        assert_eq!(batch.len(), 500);
        for i in 0..batch.len() {
            let p = batch.positions[i];
            assert!(p.x >= -1.0 && p.x <= 1.0);
            assert!(p.y >= 2.0 && p.y <= 3.0);
            assert!(p.z >= 0.0 && p.z <= 0.5);
            assert!((batch.velocities[i] - Vec3::NEG_Y).abs().max_element() <= 0.1 + 1e-6);
            assert!(batch.sizes[i] >= 0.02 && batch.sizes[i] <= 0.04);
            assert!((0.0..=1.0).contains(&batch.slide_speeds[i]));
        }
    }

    #[test]
    fn test_emit_is_reproducible_with_seed() {
        let emitter = SplashEmitter::default();
        let a = emitter.emit(50, &mut seeded_rng(Some(11)));
        let b = emitter.emit(50, &mut seeded_rng(Some(11)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_emitter_json_defaults() {
        let emitter: SplashEmitter = serde_json::from_str(r#"{"size_min": 0.05}"#).unwrap();
        assert_eq!(emitter.size_min, 0.05);
        assert_eq!(emitter.size_max, SplashEmitter::default().size_max);
    }
}
