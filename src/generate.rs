//! Distance-field generation with strategy fallback.
//!
//! Three strategies compute the same field:
//!
//! - [`FieldStrategy::Gpu`]: one compute invocation per voxel.
//! - [`FieldStrategy::Sliced`]: a rayon pool of up to `max_workers` threads,
//!   each chunk with its own BVH, filling a contiguous range of Z layers.
//! - [`FieldStrategy::Sequential`]: one pass on the calling thread.
//!
//! [`FieldGenerator::generate`] tries them in the configured order,
//! validates each result, and moves on when a strategy fails or produces
//! a broken field. Only exhausting every strategy is an error.
//!
//! # Example
//!
//! ```ignore
//! let generator = FieldGenerator::new(FieldGenConfig::new(64)).with_gpu(ctx);
//! let generated = generator.generate(&triangles, &|p| println!("{:.0}%", p.fraction * 100.0))?;
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bvh::{brute_force_distance, Bvh};
use crate::config::FieldGenConfig;
use crate::error::FieldError;
use crate::field::{DistanceField, FieldGrid};
use crate::gpu::{field_gpu, GpuContext};
use crate::mesh::{Aabb, Triangle};

/// How a field is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldStrategy {
    Gpu,
    Sliced,
    Sequential,
}

/// Progress report passed to the generation callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationProgress {
    pub strategy: FieldStrategy,
    /// Completed share of the work, 0.0 to 1.0.
    pub fraction: f32,
}

/// Progress callback. `Sync` because sliced workers report from their own threads.
pub type ProgressFn<'a> = &'a (dyn Fn(GenerationProgress) + Sync);

/// A validated field and how it was made.
#[derive(Debug)]
pub struct GeneratedField {
    pub field: DistanceField,
    pub strategy: FieldStrategy,
    pub elapsed: Duration,
}

/// Nearest-surface distance source for the CPU strategies.
enum DistanceSource<'a> {
    Bvh(Bvh),
    Brute(&'a [Triangle]),
}

impl<'a> DistanceSource<'a> {
    fn new(triangles: &'a [Triangle], config: &FieldGenConfig) -> Self {
        if config.use_bvh {
            DistanceSource::Bvh(Bvh::build(
                triangles.to_vec(),
                config.bvh_max_depth,
                config.bvh_min_leaf_size,
            ))
        } else {
            DistanceSource::Brute(triangles)
        }
    }

    #[inline]
    fn distance(&self, p: Vec3) -> f32 {
        match self {
            DistanceSource::Bvh(bvh) => bvh.nearest_distance(p),
            DistanceSource::Brute(triangles) => brute_force_distance(p, triangles),
        }
    }
}

/// Fill Z layers `z_start..` of `grid` into `out` (which holds whole layers).
fn fill_layers(source: &DistanceSource, grid: &FieldGrid, z_start: u32, out: &mut [f32], mut on_layer: impl FnMut()) {
    let r = grid.resolution;
    for (dz, layer) in out.chunks_mut(grid.layer_len()).enumerate() {
        let z = z_start + dz as u32;
        for y in 0..r {
            for x in 0..r {
                layer[(x + y * r) as usize] = source.distance(grid.voxel_center(x, y, z));
            }
        }
        on_layer();
    }
}

/// Builds distance fields from triangle meshes.
pub struct FieldGenerator {
    config: FieldGenConfig,
    gpu: Option<Arc<GpuContext>>,
}

impl FieldGenerator {
    pub fn new(config: FieldGenConfig) -> Self {
        Self { config, gpu: None }
    }

    /// Enable the GPU strategy with a shared compute context.
    pub fn with_gpu(mut self, ctx: Arc<GpuContext>) -> Self {
        self.gpu = Some(ctx);
        self
    }

    pub fn config(&self) -> &FieldGenConfig {
        &self.config
    }

    /// Grid the configured resolution and padding place around `triangles`.
    pub fn grid_for(&self, triangles: &[Triangle]) -> Result<(FieldGrid, Aabb), FieldError> {
        if triangles.is_empty() {
            return Err(FieldError::EmptyMesh);
        }
        let mesh_bounds = Aabb::from_triangles(triangles);
        let grid = FieldGrid::around(&mesh_bounds, self.config.padding, self.config.resolution)?;
        Ok((grid, mesh_bounds))
    }

    /// Generate and validate a field, falling back through the configured
    /// strategies.
    pub fn generate(&self, triangles: &[Triangle], progress: ProgressFn) -> Result<GeneratedField, FieldError> {
        self.config.validate()?;
        let (grid, mesh_bounds) = self.grid_for(triangles)?;
        let mut attempts = Vec::new();

        for &strategy in &self.config.strategies {
            let start = Instant::now();
            let result = self
                .run(strategy, triangles, &grid, progress)
                .and_then(|distances| self.accept(grid, mesh_bounds, distances));
            match result {
                Ok(field) => {
                    let elapsed = start.elapsed();
                    info!(
                        "Distance field {}³ generated by {:?} in {:.1?} ({} triangles)",
                        grid.resolution,
                        strategy,
                        elapsed,
                        triangles.len()
                    );
                    return Ok(GeneratedField {
                        field,
                        strategy,
                        elapsed,
                    });
                }
                Err(err) => {
                    warn!("{:?} field generation failed, trying next strategy: {}", strategy, err);
                    attempts.push((strategy, err.to_string()));
                }
            }
        }

        Err(FieldError::AllStrategiesFailed { attempts })
    }

    /// Run one strategy without validation. Used by [`generate`](Self::generate)
    /// and to compare strategies against each other.
    pub fn run(
        &self,
        strategy: FieldStrategy,
        triangles: &[Triangle],
        grid: &FieldGrid,
        progress: ProgressFn,
    ) -> Result<Vec<f32>, FieldError> {
        match strategy {
            FieldStrategy::Gpu => self.run_gpu(triangles, grid, progress),
            FieldStrategy::Sliced => self.run_sliced(triangles, grid, progress),
            FieldStrategy::Sequential => Ok(self.run_sequential(triangles, grid, progress)),
        }
    }

    fn accept(&self, grid: FieldGrid, mesh_bounds: Aabb, distances: Vec<f32>) -> Result<DistanceField, FieldError> {
        let field = DistanceField::new(grid, mesh_bounds, distances)?;
        field.validate(self.config.validation_stride, self.config.validation_epsilon)?;
        Ok(field)
    }

    fn run_gpu(&self, triangles: &[Triangle], grid: &FieldGrid, progress: ProgressFn) -> Result<Vec<f32>, FieldError> {
        let ctx = self
            .gpu
            .as_ref()
            .ok_or(FieldError::StrategyUnavailable(FieldStrategy::Gpu))?;
        progress(GenerationProgress {
            strategy: FieldStrategy::Gpu,
            fraction: 0.0,
        });
        let distances = field_gpu::generate_distances(ctx, triangles, grid)?;
        progress(GenerationProgress {
            strategy: FieldStrategy::Gpu,
            fraction: 1.0,
        });
        Ok(distances)
    }

    fn run_sequential(&self, triangles: &[Triangle], grid: &FieldGrid, progress: ProgressFn) -> Vec<f32> {
        let source = DistanceSource::new(triangles, &self.config);
        let total = grid.total_voxels();
        let report_every = (total / 10).max(1);
        let r = grid.resolution;
        let mut out = Vec::with_capacity(total);

        for z in 0..r {
            for y in 0..r {
                for x in 0..r {
                    out.push(source.distance(grid.voxel_center(x, y, z)));
                    if out.len() % report_every == 0 {
                        progress(GenerationProgress {
                            strategy: FieldStrategy::Sequential,
                            fraction: out.len() as f32 / total as f32,
                        });
                    }
                }
            }
        }
        out
    }

    /// Number of sliced workers for `grid` on this machine.
    pub fn sliced_workers(&self, grid: &FieldGrid) -> usize {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        available.min(self.config.max_workers).min(grid.resolution as usize).max(1)
    }

    fn run_sliced(&self, triangles: &[Triangle], grid: &FieldGrid, progress: ProgressFn) -> Result<Vec<f32>, FieldError> {
        let workers = self.sliced_workers(grid);
        let r = grid.resolution as usize;
        let layers_per_worker = r.div_ceil(workers);
        let mut out = vec![0.0f32; grid.total_voxels()];
        let layers_done = AtomicUsize::new(0);
        let config = &self.config;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("field-slice-{}", i))
            .build()
            .map_err(|e| FieldError::Worker {
                worker: 0,
                reason: e.to_string(),
            })?;

        debug!("Sliced field generation: {} workers, {} layers each", workers, layers_per_worker);

        // A panicking slice is reported as a failed worker so the next strategy can run.
        pool.install(|| {
            out.par_chunks_mut(layers_per_worker * grid.layer_len())
                .enumerate()
                .try_for_each(|(worker, chunk)| {
                    let z_start = (worker * layers_per_worker) as u32;
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        let source = DistanceSource::new(triangles, config);
                        fill_layers(&source, grid, z_start, chunk, || {
                            let done = layers_done.fetch_add(1, Ordering::Relaxed) + 1;
                            progress(GenerationProgress {
                                strategy: FieldStrategy::Sliced,
                                fraction: done as f32 / r as f32,
                            });
                        });
                    }))
                    .map_err(|_| FieldError::Worker {
                        worker,
                        reason: "worker panicked".to_string(),
                    })
                })
        })?;

        Ok(out)
    }
}
