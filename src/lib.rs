//! # textsplash - water splashing onto 3D text
//!
//! Point-particle drops fall onto extruded text and bounce, stick, slide
//! and drip off it. The collision geometry is a precomputed distance field
//! of the text mesh; the per-particle update runs on the GPU, on a rayon
//! pool, or in a single-threaded loop, with the same state machine on each.
//!
//! ## Quick Start
//!
//! ```ignore
//! use textsplash::prelude::*;
//!
//! let mut system = SplashSystem::new(SplashConfig::default(), FieldGenConfig::new(64))?
//!     .with_default_gpu()
//!     .with_cache(MemoryFieldCache::new(), 8);
//!
//! let triangles = extract_triangles(&positions, Some(&indices))?;
//! system.load_shape(&triangles, &ShapeDescriptor::new("SPLASH", "sans"), &|_| {})?;
//!
//! let mut rng = seeded_rng(Some(7));
//! system.spawn(&SplashEmitter::default().emit(10_000, &mut rng))?;
//!
//! let mut clock = FrameClock::new();
//! loop {
//!     let (time, dt) = clock.tick();
//!     let active = system.update(dt, time)?;
//!     let drawn = system.copy_to_render_buffers(&mut positions_out, &mut states_out);
//! }
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | Mesh to triangles | [`mesh`] |
//! | Exact point-triangle distance | [`distance`] |
//! | Nearest-triangle acceleration | [`bvh`] |
//! | Field grid, sampling and validation | [`field`] |
//! | GPU → sliced → sequential generation | [`generate`] |
//! | Keyed field storage | [`cache`] |
//! | Particle arrays | [`particles`] |
//! | State machine | [`physics`] |
//! | Execution strategies | [`backend`], [`gpu`] |
//! | Orchestration | [`simulation`] |

pub mod backend;
pub mod bvh;
pub mod cache;
pub mod config;
pub mod distance;
pub mod emitter;
pub mod error;
pub mod field;
pub mod generate;
pub mod gpu;
pub mod mesh;
pub mod particles;
pub mod physics;
pub mod rng;
pub mod simulation;
pub mod time;

pub use bytemuck;
pub use glam::Vec3;

pub use backend::{select_backend, Backend, BackendKind, ComputeBackend};
pub use cache::{DirFieldCache, FieldCache, FieldKey, MemoryFieldCache, ShapeDescriptor};
pub use config::{BackendPreference, FieldGenConfig, SplashConfig, StuckExit};
pub use emitter::{SpawnWindow, SplashEmitter};
pub use error::{BackendError, CacheError, ConfigError, FieldError, GpuError, MeshError, SplashError};
pub use field::{DistanceField, FieldGrid, SerializedField};
pub use generate::{FieldGenerator, FieldStrategy, GenerationProgress};
pub use gpu::GpuContext;
pub use mesh::{extract_triangles, Aabb, Triangle};
pub use particles::{ParticleState, ParticleStore, SpawnBatch};
pub use simulation::{FieldSource, SplashSystem};
pub use time::FrameClock;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use textsplash::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{BackendKind, ComputeBackend};
    pub use crate::cache::{DirFieldCache, FieldCache, MemoryFieldCache, ShapeDescriptor};
    pub use crate::config::{BackendPreference, FieldGenConfig, SplashConfig, StuckExit};
    pub use crate::emitter::{SpawnWindow, SplashEmitter};
    pub use crate::error::SplashError;
    pub use crate::generate::{FieldStrategy, GenerationProgress};
    pub use crate::gpu::GpuContext;
    pub use crate::mesh::{extract_triangles, Triangle};
    pub use crate::particles::{ParticleState, SpawnBatch};
    pub use crate::rng::{seeded_rng, SplashRng};
    pub use crate::simulation::{FieldSource, SplashSystem};
    pub use crate::time::FrameClock;
    pub use crate::Vec3;
}
