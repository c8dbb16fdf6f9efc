//! Shared-memory multithreaded backend.
//!
//! The particle arrays stay in one [`ParticleStore`]. Each update splits
//! `[0, count)` into one contiguous range per worker and runs them on a
//! dedicated rayon pool; ranges never overlap, so no locking is needed, and
//! the step returns only after every range is done.

use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use super::{BackendKind, ComputeBackend};
use crate::config::SplashConfig;
use crate::error::BackendError;
use crate::field::DistanceField;
use crate::particles::{ParticleStore, SpawnBatch};
use crate::physics::{step_particles, StepContext};
use crate::rng::{clock_seed, stream_rng};

pub struct SharedMemoryBackend {
    store: ParticleStore,
    field: Arc<DistanceField>,
    config: SplashConfig,
    pool: rayon::ThreadPool,
    workers: usize,
    seed: u64,
    step: u64,
}

impl SharedMemoryBackend {
    /// Build the worker pool. Unavailable with fewer than two threads.
    pub fn new(field: Arc<DistanceField>, config: &SplashConfig) -> Result<Self, BackendError> {
        let workers = config
            .worker_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
        if workers < 2 {
            return Err(BackendError::Unavailable(format!(
                "{} hardware thread(s), need at least 2",
                workers
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("splash-worker-{}", i))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("thread pool: {}", e)))?;
        debug!("Shared-memory backend with {} workers", workers);

        Ok(Self {
            store: ParticleStore::new(config.capacity),
            field,
            config: config.clone(),
            pool,
            workers,
            seed: config.seed.unwrap_or_else(clock_seed),
            step: 0,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn store(&self) -> &ParticleStore {
        &self.store
    }
}

impl ComputeBackend for SharedMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SharedMemory
    }

    fn capacity(&self) -> usize {
        self.store.capacity()
    }

    fn spawn(&mut self, batch: &SpawnBatch) -> usize {
        self.store.spawn(batch)
    }

    fn update(&mut self, dt: f32, time: f32) -> Result<usize, BackendError> {
        let ctx = StepContext::new(&self.config, &self.field, dt, time);
        let parts = self.store.slices_mut().partition(self.workers);
        let (seed, first_stream) = (self.seed, self.step * self.workers as u64);

        let active = self.pool.install(|| {
            parts
                .into_par_iter()
                .enumerate()
                .map(|(i, mut part)| {
                    let mut rng = stream_rng(seed, first_stream + i as u64);
                    step_particles(&mut part, &ctx, &mut rng)
                })
                .sum()
        });

        self.step += 1;
        self.store.refresh_highest_active();
        Ok(active)
    }

    fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        self.store.copy_to_render_buffers(positions, states)
    }

    fn reset(&mut self) {
        self.store.reset();
        self.step = 0;
    }

    fn count_in_contact(&self) -> usize {
        self.store.count_in_contact()
    }

    fn replace_field(&mut self, field: Arc<DistanceField>) -> Result<(), BackendError> {
        self.field = field;
        Ok(())
    }
}
