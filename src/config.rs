//! Configuration for the particle simulation and field generation.
//!
//! Every physics constant lives in [`SplashConfig`]; nothing is hardcoded in
//! the state machine. Values are plain data so an external driver can load
//! them from JSON, and [`SplashConfig::validate`] checks ranges before a
//! backend is built.
//!
//! # Example
//!
//! ```ignore
//! let config = SplashConfig::default()
//!     .with_capacity(200_000)
//!     .with_bounce_chance(0.4)
//!     .with_seed(7);
//! config.validate()?;
//! ```

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::ConfigError;
use crate::field::{MAX_RESOLUTION, MIN_RESOLUTION};
use crate::generate::FieldStrategy;

/// What a STUCK particle turns into once its stick time runs out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StuckExit {
    /// Fall straight off the surface.
    #[default]
    Drip,
    /// Run down the surface along the gravity tangent first.
    Slide,
}

/// Which backends the selector may try.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendPreference {
    /// GPU, then shared-memory threads, then single-threaded.
    #[default]
    Auto,
    /// Only the named backend (single-threaded still backs it up).
    Only(BackendKind),
}

/// Physics and capacity settings for the particle simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplashConfig {
    /// Number of pre-allocated particle slots.
    pub capacity: usize,
    /// Downward acceleration (units/s²).
    pub gravity: f32,

    // Impact
    /// Field distance below which a falling particle has hit the surface.
    pub impact_threshold: f32,
    /// Distance from the surface an impacting particle is snapped to.
    pub surface_offset: f32,
    /// Reject impacts that are not on the front face of the mesh.
    pub front_gating: bool,
    /// Direction the front face looks toward (normalized on use).
    pub front_axis: Vec3,
    /// Minimum `normal · front_axis` for an impact to count.
    pub front_normal_min: f32,
    /// Depth band behind the mesh's front plane where impacts are allowed.
    pub front_band: f32,

    // Bounce
    /// Probability of bouncing rather than sticking (0.0-1.0).
    pub bounce_chance: f32,
    pub restitution_min: f32,
    pub restitution_max: f32,
    /// How much a head-on impact reduces restitution (0.0-1.0).
    pub restitution_alignment_falloff: f32,
    /// Maximum spray speed tangent to the surface.
    pub spray_speed: f32,
    /// Maximum extra upward scatter speed.
    pub spray_upward: f32,
    pub bounce_shrink_min: f32,
    pub bounce_shrink_max: f32,
    /// Extra shrink per unit of impact speed.
    pub bounce_shrink_speed_factor: f32,
    /// Lateral velocity kept per 60 Hz frame while bouncing.
    pub bounce_drag: f32,
    /// Continuous shrink rate while bouncing (fraction per second).
    pub bounce_shrink_rate: f32,

    // Stick / slide / drip
    pub stick_duration_min: f32,
    pub stick_duration_max: f32,
    pub stuck_exit: StuckExit,
    pub slide_speed_min: f32,
    pub slide_speed_max: f32,
    /// A sliding particle longer than this drips regardless.
    pub slide_duration_max: f32,
    /// Sliding particles farther than this from the surface start dripping.
    pub leave_surface_threshold: f32,
    /// Sliding particles closer than this are pushed back to `surface_offset`.
    pub resnap_threshold: f32,
    /// Downward speed given to a particle when it starts dripping.
    pub drip_initial_speed: f32,
    /// Lateral velocity kept per 60 Hz frame while dripping.
    pub drip_drag: f32,
    /// Continuous shrink rate while dripping (fraction per second).
    pub drip_shrink_rate: f32,

    // Jitter
    pub jitter_amount: f32,
    pub jitter_speed: f32,

    // Removal
    /// Particles below this height are deactivated.
    pub removal_y: f32,
    /// Falling particles behind this depth are deactivated.
    pub removal_z: f32,
    /// Particles smaller than this are deactivated.
    pub min_size: f32,

    /// Seed for the backend RNGs. `None` seeds from the clock.
    pub seed: Option<u64>,
    /// Worker threads for the shared-memory backend. `None` = all cores.
    pub worker_threads: Option<usize>,
    pub backend: BackendPreference,
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            gravity: 9.8,
            impact_threshold: 0.05,
            surface_offset: 0.02,
            front_gating: true,
            front_axis: Vec3::Z,
            front_normal_min: 0.3,
            front_band: 0.25,
            bounce_chance: 0.3,
            restitution_min: 0.2,
            restitution_max: 0.5,
            restitution_alignment_falloff: 0.5,
            spray_speed: 1.2,
            spray_upward: 0.8,
            bounce_shrink_min: 0.5,
            bounce_shrink_max: 0.8,
            bounce_shrink_speed_factor: 0.02,
            bounce_drag: 0.98,
            bounce_shrink_rate: 0.6,
            stick_duration_min: 0.3,
            stick_duration_max: 1.5,
            stuck_exit: StuckExit::Drip,
            slide_speed_min: 0.1,
            slide_speed_max: 0.4,
            slide_duration_max: 2.0,
            leave_surface_threshold: 0.08,
            resnap_threshold: 0.005,
            drip_initial_speed: 0.2,
            drip_drag: 0.995,
            drip_shrink_rate: 0.3,
            jitter_amount: 0.002,
            jitter_speed: 8.0,
            removal_y: -5.0,
            removal_z: -5.0,
            min_size: 0.002,
            seed: None,
            worker_threads: None,
            backend: BackendPreference::Auto,
        }
    }
}

fn check_range(field: &'static str, value: f32, lo: f32, hi: f32, expected: &'static str) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, expected })
    }
}

fn check_pair(min_field: &'static str, min: f32, max_field: &'static str, max: f32) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(ConfigError::InvertedRange { min_field, max_field })
    }
}

impl SplashConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_gravity(mut self, gravity: f32) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the bounce probability (clamped to 0.0-1.0).
    pub fn with_bounce_chance(mut self, chance: f32) -> Self {
        self.bounce_chance = chance.clamp(0.0, 1.0);
        self
    }

    pub fn with_stuck_exit(mut self, exit: StuckExit) -> Self {
        self.stuck_exit = exit;
        self
    }

    /// Set the direction the text's front face looks toward.
    pub fn with_front_axis(mut self, axis: Vec3) -> Self {
        self.front_axis = axis;
        self
    }

    pub fn with_front_gating(mut self, enabled: bool) -> Self {
        self.front_gating = enabled;
        self
    }

    pub fn with_jitter(mut self, amount: f32, speed: f32) -> Self {
        self.jitter_amount = amount;
        self.jitter_speed = speed;
        self
    }

    pub fn with_removal(mut self, removal_y: f32, removal_z: f32) -> Self {
        self.removal_y = removal_y;
        self.removal_z = removal_z;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Unit-length front axis, falling back to +Z for a zero vector.
    pub fn front_direction(&self) -> Vec3 {
        self.front_axis.try_normalize().unwrap_or(Vec3::Z)
    }

    /// Check every numeric range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > u32::MAX as usize {
            return Err(ConfigError::OutOfRange {
                field: "capacity",
                value: self.capacity as f32,
                expected: "1..=u32::MAX",
            });
        }
        check_range("gravity", self.gravity, f32::MIN_POSITIVE, f32::MAX, "> 0")?;
        check_range("impact_threshold", self.impact_threshold, f32::MIN_POSITIVE, f32::MAX, "> 0")?;
        check_range("surface_offset", self.surface_offset, 0.0, f32::MAX, ">= 0")?;
        check_range("front_normal_min", self.front_normal_min, -1.0, 1.0, "-1.0..=1.0")?;
        check_range("front_band", self.front_band, 0.0, f32::MAX, ">= 0")?;
        check_range("bounce_chance", self.bounce_chance, 0.0, 1.0, "0.0..=1.0")?;
        check_range("restitution_min", self.restitution_min, 0.0, 1.0, "0.0..=1.0")?;
        check_range("restitution_max", self.restitution_max, 0.0, 1.0, "0.0..=1.0")?;
        check_pair("restitution_min", self.restitution_min, "restitution_max", self.restitution_max)?;
        check_range(
            "restitution_alignment_falloff",
            self.restitution_alignment_falloff,
            0.0,
            1.0,
            "0.0..=1.0",
        )?;
        check_range("spray_speed", self.spray_speed, 0.0, f32::MAX, ">= 0")?;
        check_range("spray_upward", self.spray_upward, 0.0, f32::MAX, ">= 0")?;
        check_range("bounce_shrink_min", self.bounce_shrink_min, 0.0, 1.0, "0.0..=1.0")?;
        check_range("bounce_shrink_max", self.bounce_shrink_max, 0.0, 1.0, "0.0..=1.0")?;
        check_pair("bounce_shrink_min", self.bounce_shrink_min, "bounce_shrink_max", self.bounce_shrink_max)?;
        check_range("bounce_drag", self.bounce_drag, f32::MIN_POSITIVE, 1.0, "(0.0, 1.0]")?;
        check_range("drip_drag", self.drip_drag, f32::MIN_POSITIVE, 1.0, "(0.0, 1.0]")?;
        check_range("bounce_shrink_rate", self.bounce_shrink_rate, 0.0, f32::MAX, ">= 0")?;
        check_range("drip_shrink_rate", self.drip_shrink_rate, 0.0, f32::MAX, ">= 0")?;
        check_range("stick_duration_min", self.stick_duration_min, 0.0, f32::MAX, ">= 0")?;
        check_pair("stick_duration_min", self.stick_duration_min, "stick_duration_max", self.stick_duration_max)?;
        check_range("slide_speed_min", self.slide_speed_min, 0.0, f32::MAX, ">= 0")?;
        check_pair("slide_speed_min", self.slide_speed_min, "slide_speed_max", self.slide_speed_max)?;
        check_range("slide_duration_max", self.slide_duration_max, 0.0, f32::MAX, ">= 0")?;
        check_pair(
            "resnap_threshold",
            self.resnap_threshold,
            "leave_surface_threshold",
            self.leave_surface_threshold,
        )?;
        check_range("leave_surface_threshold", self.leave_surface_threshold, 0.0, f32::MAX, ">= 0")?;
        check_range("resnap_threshold", self.resnap_threshold, 0.0, f32::MAX, ">= 0")?;
        check_range("min_size", self.min_size, 0.0, f32::MAX, ">= 0")?;
        check_range("jitter_amount", self.jitter_amount, 0.0, f32::MAX, ">= 0")?;
        check_range("jitter_speed", self.jitter_speed, f32::MIN, f32::MAX, "finite")?;
        check_range("removal_y", self.removal_y, f32::MIN, f32::MAX, "finite")?;
        check_range("removal_z", self.removal_z, f32::MIN, f32::MAX, "finite")?;
        check_range("front_axis", self.front_axis.length(), 0.0, f32::MAX, "finite")?;
        Ok(())
    }
}

/// Settings for distance-field generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldGenConfig {
    /// Voxels per axis (total = resolution³). Typical: 48, 64, 96.
    pub resolution: u32,
    /// World-space padding added around the mesh bounds.
    pub padding: f32,
    /// Use a BVH for the CPU strategies instead of scanning every triangle.
    pub use_bvh: bool,
    pub bvh_max_depth: u32,
    pub bvh_min_leaf_size: usize,
    /// Upper bound on sliced workers.
    pub max_workers: usize,
    /// Strategies to try, in order.
    pub strategies: Vec<FieldStrategy>,
    /// Voxel stride per axis for post-generation validation.
    pub validation_stride: u32,
    /// Minimum value range a valid field must show.
    pub validation_epsilon: f32,
}

impl Default for FieldGenConfig {
    fn default() -> Self {
        Self {
            resolution: 64,
            padding: 0.3,
            use_bvh: true,
            bvh_max_depth: crate::bvh::DEFAULT_MAX_DEPTH,
            bvh_min_leaf_size: crate::bvh::DEFAULT_MIN_LEAF_SIZE,
            max_workers: 8,
            strategies: vec![FieldStrategy::Gpu, FieldStrategy::Sliced, FieldStrategy::Sequential],
            validation_stride: 4,
            validation_epsilon: 1e-5,
        }
    }
}

impl FieldGenConfig {
    /// Create a configuration with the given resolution.
    ///
    /// # Memory Usage
    ///
    /// - 32³ = 128KB
    /// - 64³ = 1MB
    /// - 128³ = 8MB
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Self::default()
        }
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding.max(0.0);
        self
    }

    pub fn with_bvh(mut self, use_bvh: bool) -> Self {
        self.use_bvh = use_bvh;
        self
    }

    pub fn with_strategies(mut self, strategies: &[FieldStrategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Check resolution, padding, worker and validation settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&self.resolution) {
            return Err(ConfigError::OutOfRange {
                field: "resolution",
                value: self.resolution as f32,
                expected: "8..=256",
            });
        }
        check_range("padding", self.padding, 0.0, f32::MAX, ">= 0")?;
        check_range("validation_epsilon", self.validation_epsilon, 0.0, f32::MAX, ">= 0")?;
        for (field, value) in [
            ("validation_stride", self.validation_stride as usize),
            ("max_workers", self.max_workers),
            ("bvh_min_leaf_size", self.bvh_min_leaf_size),
        ] {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: 0.0,
                    expected: ">= 1",
                });
            }
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::Empty("strategies"));
        }
        Ok(())
    }

    /// Total number of voxels.
    pub fn total_voxels(&self) -> usize {
        let r = self.resolution as usize;
        r * r * r
    }
}
