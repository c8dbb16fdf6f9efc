//! Single-threaded reference backend.

use std::sync::Arc;

use rand::rngs::SmallRng;

use super::{BackendKind, ComputeBackend};
use crate::config::SplashConfig;
use crate::error::BackendError;
use crate::field::DistanceField;
use crate::particles::{ParticleStore, SpawnBatch};
use crate::physics::{step_particles, StepContext};
use crate::rng::seeded_rng;

/// The update pass as one synchronous loop over `[0, count)`.
pub struct SequentialBackend {
    store: ParticleStore,
    field: Arc<DistanceField>,
    config: SplashConfig,
    rng: SmallRng,
}

impl SequentialBackend {
    pub fn new(field: Arc<DistanceField>, config: &SplashConfig) -> Self {
        Self {
            store: ParticleStore::new(config.capacity),
            field,
            config: config.clone(),
            rng: seeded_rng(config.seed),
        }
    }

    /// Read access for tests and diagnostics.
    pub fn store(&self) -> &ParticleStore {
        &self.store
    }
}

impl ComputeBackend for SequentialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn capacity(&self) -> usize {
        self.store.capacity()
    }

    fn spawn(&mut self, batch: &SpawnBatch) -> usize {
        self.store.spawn(batch)
    }

    fn update(&mut self, dt: f32, time: f32) -> Result<usize, BackendError> {
        let ctx = StepContext::new(&self.config, &self.field, dt, time);
        let active = step_particles(&mut self.store.slices_mut(), &ctx, &mut self.rng);
        self.store.refresh_highest_active();
        Ok(active)
    }

    fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        self.store.copy_to_render_buffers(positions, states)
    }

    fn reset(&mut self) {
        self.store.reset();
        self.rng = seeded_rng(self.config.seed);
    }

    fn count_in_contact(&self) -> usize {
        self.store.count_in_contact()
    }

    fn replace_field(&mut self, field: Arc<DistanceField>) -> Result<(), BackendError> {
        self.field = field;
        Ok(())
    }
}
