//! The orchestrator: field loading, backend selection and the per-frame API.
//!
//! ```ignore
//! let mut system = SplashSystem::new(SplashConfig::default(), FieldGenConfig::default())?
//!     .with_default_gpu()
//!     .with_cache(DirFieldCache::open(cache_dir)?, 8);
//!
//! system.load_shape(&triangles, &ShapeDescriptor::new("HELLO", "sans"), &|_| {})?;
//! system.spawn(&emitter.emit(5000, &mut rng))?;
//! loop {
//!     let (time, dt) = clock.tick();
//!     system.update(dt, time)?;
//!     let n = system.copy_to_render_buffers(&mut positions, &mut states);
//! }
//! ```

use std::sync::Arc;

use log::{info, warn};

use crate::backend::{select_backend, Backend, BackendKind, ComputeBackend};
use crate::cache::{load_field, FieldCache, ShapeDescriptor};
use crate::config::{FieldGenConfig, SplashConfig};
use crate::error::SplashError;
use crate::field::DistanceField;
use crate::generate::{FieldGenerator, FieldStrategy, ProgressFn};
use crate::gpu::GpuContext;
use crate::mesh::{extract_triangles, Triangle};
use crate::particles::SpawnBatch;

/// Where the current field came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldSource {
    Cache,
    Generated(FieldStrategy),
    Supplied,
}

/// Owns the field, the cache handle and the selected backend.
pub struct SplashSystem {
    config: SplashConfig,
    field_config: FieldGenConfig,
    gpu: Option<Arc<GpuContext>>,
    cache: Option<Box<dyn FieldCache>>,
    cache_keep: usize,
    field: Option<Arc<DistanceField>>,
    backend: Option<Backend>,
    status: String,
}

impl SplashSystem {
    /// Validate both configs and create a system with no field loaded.
    pub fn new(config: SplashConfig, field_config: FieldGenConfig) -> Result<Self, SplashError> {
        config.validate()?;
        field_config.validate()?;
        Ok(Self {
            config,
            field_config,
            gpu: None,
            cache: None,
            cache_keep: 8,
            field: None,
            backend: None,
            status: "Waiting for shape".to_string(),
        })
    }

    /// Share an existing compute context with field generation and the GPU
    /// backend.
    pub fn with_gpu(mut self, ctx: Arc<GpuContext>) -> Self {
        self.gpu = Some(ctx);
        self
    }

    /// Try to acquire a compute context; continue without one on failure.
    pub fn with_default_gpu(mut self) -> Self {
        match GpuContext::new() {
            Ok(ctx) => {
                info!("GPU: {}", ctx.describe());
                self.gpu = Some(Arc::new(ctx));
            }
            Err(err) => warn!("No GPU compute context, continuing on the CPU: {}", err),
        }
        self
    }

    /// Use `cache` for fields, keeping the `keep_newest` latest entries.
    pub fn with_cache(mut self, cache: impl FieldCache + 'static, keep_newest: usize) -> Self {
        self.cache = Some(Box::new(cache));
        self.cache_keep = keep_newest;
        self
    }

    pub fn config(&self) -> &SplashConfig {
        &self.config
    }

    pub fn field_config(&self) -> &FieldGenConfig {
        &self.field_config
    }

    /// Human-readable state of field loading and backend selection.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn field(&self) -> Option<&DistanceField> {
        self.field.as_deref()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    /// Load the field for `shape`: from the cache when a valid entry
    /// exists, otherwise generated from `triangles` and written back.
    pub fn load_shape(
        &mut self,
        triangles: &[Triangle],
        shape: &ShapeDescriptor,
        progress: ProgressFn,
    ) -> Result<FieldSource, SplashError> {
        let shape = ShapeDescriptor {
            resolution: self.field_config.resolution,
            ..shape.clone()
        };
        let key = shape.key();

        let cached = self.cache.as_deref().and_then(|cache| {
            load_field(
                cache,
                &key,
                self.field_config.validation_stride,
                self.field_config.validation_epsilon,
            )
        });
        if let Some(field) = cached {
            info!("Distance field {} loaded from cache", key);
            self.status = format!("Field {}³ loaded from cache", field.resolution());
            self.install_field(field)?;
            return Ok(FieldSource::Cache);
        }

        self.status = format!("Generating {}³ field for \"{}\"", self.field_config.resolution, shape.text);
        let mut generator = FieldGenerator::new(self.field_config.clone());
        if let Some(ctx) = &self.gpu {
            generator = generator.with_gpu(Arc::clone(ctx));
        }
        let generated = match generator.generate(triangles, progress) {
            Ok(generated) => generated,
            Err(err) => {
                self.status = format!("Field generation failed: {}", err);
                return Err(err.into());
            }
        };

        if let Some(cache) = self.cache.as_mut() {
            match cache.put(&key, &generated.field.to_serialized()) {
                Ok(()) => {
                    if let Err(err) = cache.prune(self.cache_keep) {
                        warn!("Field cache prune failed: {}", err);
                    }
                }
                Err(err) => warn!("Field cache write for {} failed: {}", key, err),
            }
        }

        self.status = format!(
            "Field {}³ generated by {:?} in {:.1?}",
            generated.field.resolution(),
            generated.strategy,
            generated.elapsed
        );
        self.install_field(generated.field)?;
        Ok(FieldSource::Generated(generated.strategy))
    }

    /// [`load_shape`](Self::load_shape) from raw position (and optional index)
    /// buffers.
    pub fn load_mesh(
        &mut self,
        positions: &[f32],
        indices: Option<&[u32]>,
        shape: &ShapeDescriptor,
        progress: ProgressFn,
    ) -> Result<FieldSource, SplashError> {
        let triangles = extract_triangles(positions, indices)?;
        self.load_shape(&triangles, shape, progress)
    }

    /// Use a field built elsewhere.
    pub fn set_field(&mut self, field: DistanceField) -> Result<FieldSource, SplashError> {
        self.status = format!("Field {}³ supplied", field.resolution());
        self.install_field(field)?;
        Ok(FieldSource::Supplied)
    }

    /// Hand the field to the backend, selecting one on first use. Later
    /// fields replace the old one in place; the backend kind never changes.
    fn install_field(&mut self, field: DistanceField) -> Result<(), SplashError> {
        let field = Arc::new(field);
        match self.backend.as_mut() {
            Some(backend) => backend.replace_field(Arc::clone(&field))?,
            None => {
                let backend = select_backend(Arc::clone(&field), &self.config, self.gpu.as_ref());
                self.status = format!("{}; simulating on {}", self.status, backend.kind());
                self.backend = Some(backend);
            }
        }
        self.field = Some(field);
        Ok(())
    }

    fn backend_mut(&mut self) -> Result<&mut Backend, SplashError> {
        self.backend.as_mut().ok_or(SplashError::NotReady)
    }

    /// Inject a batch. Returns how many particles were admitted.
    pub fn spawn(&mut self, batch: &SpawnBatch) -> Result<usize, SplashError> {
        Ok(self.backend_mut()?.spawn(batch))
    }

    /// Advance the simulation. Returns the active particle count.
    ///
    /// A backend error here is fatal for the session; the backend is not
    /// swapped mid-run.
    pub fn update(&mut self, dt: f32, time: f32) -> Result<usize, SplashError> {
        match self.backend_mut()?.update(dt, time) {
            Ok(active) => Ok(active),
            Err(err) => {
                self.status = format!("Simulation stopped: {}", err);
                Err(err.into())
            }
        }
    }

    /// Copy particles into render buffers; 0 before a field is loaded.
    pub fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        self.backend
            .as_ref()
            .map_or(0, |b| b.copy_to_render_buffers(positions, states))
    }

    pub fn reset(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.reset();
        }
    }

    pub fn count_in_contact(&self) -> usize {
        self.backend.as_ref().map_or(0, |b| b.count_in_contact())
    }

    /// Slot count of the particle store.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}
