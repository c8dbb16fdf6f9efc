//! Interchangeable execution strategies for the particle update.
//!
//! All three backends run the same state machine over the same slot
//! semantics; they differ only in where the loop runs:
//!
//! | Backend | Update | Spawn |
//! |---------|--------|-------|
//! | [`GpuBackend`] | one compute invocation per particle | `write_buffer` at host-tracked slots |
//! | [`SharedMemoryBackend`] | rayon tasks over disjoint index ranges | orchestrating thread |
//! | [`SequentialBackend`] | one tight loop | orchestrating thread |
//!
//! [`select_backend`] probes them in priority order and keeps the first
//! that initializes. The choice is fixed for the session.

mod sequential;
mod shared;

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use sequential::SequentialBackend;
pub use shared::SharedMemoryBackend;

use crate::config::{BackendPreference, SplashConfig};
use crate::error::BackendError;
use crate::field::DistanceField;
use crate::gpu::{GpuBackend, GpuContext};
use crate::particles::SpawnBatch;

/// Which execution strategy a backend uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    GpuCompute,
    SharedMemory,
    Sequential,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::GpuCompute => "GPU compute",
            BackendKind::SharedMemory => "shared-memory threads",
            BackendKind::Sequential => "single-threaded",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Uniform contract every backend implements.
pub trait ComputeBackend {
    fn kind(&self) -> BackendKind;

    fn capacity(&self) -> usize;

    /// Inject particles into free slots. Returns how many were admitted.
    fn spawn(&mut self, batch: &SpawnBatch) -> usize;

    /// Advance every active particle. Returns the active count.
    fn update(&mut self, dt: f32, time: f32) -> Result<usize, BackendError>;

    /// Copy positions (3 floats) and state vectors (4 floats) into the
    /// render buffers. Returns the draw range.
    fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize;

    /// Deactivate every particle and rewind slot allocation.
    fn reset(&mut self);

    /// Particles currently STUCK or SLIDING.
    fn count_in_contact(&self) -> usize;

    /// Swap in a new field. Particles are kept.
    fn replace_field(&mut self, field: Arc<DistanceField>) -> Result<(), BackendError>;
}

/// The selected backend.
pub enum Backend {
    GpuCompute(GpuBackend),
    SharedMemory(SharedMemoryBackend),
    Sequential(SequentialBackend),
}

macro_rules! dispatch {
    ($self:expr, $b:ident => $body:expr) => {
        match $self {
            Backend::GpuCompute($b) => $body,
            Backend::SharedMemory($b) => $body,
            Backend::Sequential($b) => $body,
        }
    };
}

impl ComputeBackend for Backend {
    fn kind(&self) -> BackendKind {
        dispatch!(self, b => b.kind())
    }

    fn capacity(&self) -> usize {
        dispatch!(self, b => b.capacity())
    }

    fn spawn(&mut self, batch: &SpawnBatch) -> usize {
        dispatch!(self, b => b.spawn(batch))
    }

    fn update(&mut self, dt: f32, time: f32) -> Result<usize, BackendError> {
        dispatch!(self, b => b.update(dt, time))
    }

    fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        dispatch!(self, b => b.copy_to_render_buffers(positions, states))
    }

    fn reset(&mut self) {
        dispatch!(self, b => b.reset())
    }

    fn count_in_contact(&self) -> usize {
        dispatch!(self, b => b.count_in_contact())
    }

    fn replace_field(&mut self, field: Arc<DistanceField>) -> Result<(), BackendError> {
        dispatch!(self, b => b.replace_field(field))
    }
}

/// Probe order for a preference. The single-threaded backend always ends
/// the list.
pub fn probe_order(preference: BackendPreference) -> Vec<BackendKind> {
    let mut order = match preference {
        BackendPreference::Auto => vec![
            BackendKind::GpuCompute,
            BackendKind::SharedMemory,
            BackendKind::Sequential,
        ],
        BackendPreference::Only(kind) => vec![kind],
    };
    if !order.contains(&BackendKind::Sequential) {
        order.push(BackendKind::Sequential);
    }
    order
}

/// Initialize a single backend.
pub fn init_backend(
    kind: BackendKind,
    field: Arc<DistanceField>,
    config: &SplashConfig,
    gpu: Option<&Arc<GpuContext>>,
) -> Result<Backend, BackendError> {
    match kind {
        BackendKind::GpuCompute => {
            let ctx = gpu.ok_or_else(|| BackendError::Unavailable("no GPU context".to_string()))?;
            Ok(Backend::GpuCompute(GpuBackend::new(Arc::clone(ctx), field, config)?))
        }
        BackendKind::SharedMemory => Ok(Backend::SharedMemory(SharedMemoryBackend::new(field, config)?)),
        BackendKind::Sequential => Ok(Backend::Sequential(SequentialBackend::new(field, config))),
    }
}

/// Pick the first backend in priority order that initializes.
///
/// Each failure is logged with its cause and the next one is tried. The
/// single-threaded backend cannot fail, so selection always succeeds.
pub fn select_backend(
    field: Arc<DistanceField>,
    config: &SplashConfig,
    gpu: Option<&Arc<GpuContext>>,
) -> Backend {
    for kind in probe_order(config.backend) {
        if kind == BackendKind::Sequential {
            break;
        }
        match init_backend(kind, Arc::clone(&field), config, gpu) {
            Ok(backend) => {
                info!("Particle backend: {}", kind);
                return backend;
            }
            Err(err) => warn!("{} backend unavailable, falling back: {}", kind, err),
        }
    }
    info!("Particle backend: {}", BackendKind::Sequential);
    Backend::Sequential(SequentialBackend::new(field, config))
}
