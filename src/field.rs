//! Unsigned distance fields over a regular voxel grid.
//!
//! A [`DistanceField`] stores, for every voxel centre of an axis-aligned
//! grid, the distance to the nearest triangle of the text mesh. Particles
//! query it with trilinear interpolation and estimate surface normals from
//! its gradient.
//!
//! # Layout
//!
//! `R³` values in one flat array, indexed `x + y·R + z·R²`. Voxel `i` on an
//! axis has its centre at `min + (i + 0.5)·step`, with
//! `step = (max - min) / R`.
//!
//! # Sampling
//!
//! ```ignore
//! let d = field.sample(particle_pos);
//! if d < threshold {
//!     let normal = field.gradient(particle_pos);
//! }
//! ```
//!
//! The same sampling is available to compute shaders as [`FIELD_SAMPLE_WGSL`].

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, FieldError, ValidationError};
use crate::mesh::Aabb;

/// Version of the serialized field layout. Cached fields with another
/// version are treated as misses.
pub const FIELD_FORMAT_VERSION: u32 = 2;

/// Smallest supported resolution.
pub const MIN_RESOLUTION: u32 = 8;
/// Largest supported resolution.
pub const MAX_RESOLUTION: u32 = 256;

/// Placement of a voxel grid in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldGrid {
    pub bounds: Aabb,
    pub resolution: u32,
    pub step: Vec3,
}

impl FieldGrid {
    /// Grid covering `mesh_bounds` grown by `padding` on every side.
    ///
    /// Axes with no extent (a flat mesh with zero padding) are widened so
    /// the step never reaches zero.
    pub fn around(mesh_bounds: &Aabb, padding: f32, resolution: u32) -> Result<Self, FieldError> {
        if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
            return Err(FieldError::Resolution(resolution));
        }
        let mut bounds = mesh_bounds.padded(padding.max(0.0));
        let size = bounds.size();
        let widen = (size.max_element() * 1e-3).max(1e-4);
        for axis in 0..3 {
            if size[axis] <= 0.0 {
                bounds.min[axis] -= widen;
                bounds.max[axis] += widen;
            }
        }
        Ok(Self::new(bounds, resolution))
    }

    /// Grid over exactly `bounds`.
    pub fn new(bounds: Aabb, resolution: u32) -> Self {
        Self {
            bounds,
            resolution,
            step: bounds.size() / resolution as f32,
        }
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let r = self.resolution as usize;
        x as usize + y as usize * r + z as usize * r * r
    }

    /// World position of the centre of voxel `(x, y, z)`.
    #[inline]
    pub fn voxel_center(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.bounds.min + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * self.step
    }

    /// Number of voxels in one Z layer.
    pub fn layer_len(&self) -> usize {
        let r = self.resolution as usize;
        r * r
    }

    pub fn total_voxels(&self) -> usize {
        self.layer_len() * self.resolution as usize
    }
}

/// A generated distance field plus the tight bounds of the mesh it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceField {
    grid: FieldGrid,
    mesh_bounds: Aabb,
    distances: Vec<f32>,
}

impl DistanceField {
    /// Wrap generated distances. Fails when the array is not `R³` long.
    pub fn new(grid: FieldGrid, mesh_bounds: Aabb, distances: Vec<f32>) -> Result<Self, ValidationError> {
        let expected = grid.total_voxels();
        if distances.len() != expected {
            return Err(ValidationError::WrongLength {
                expected,
                found: distances.len(),
            });
        }
        Ok(Self {
            grid,
            mesh_bounds,
            distances,
        })
    }

    pub fn grid(&self) -> &FieldGrid {
        &self.grid
    }

    /// Padded box the field covers.
    pub fn bounds(&self) -> &Aabb {
        &self.grid.bounds
    }

    /// Tight bounds of the source mesh.
    pub fn mesh_bounds(&self) -> &Aabb {
        &self.mesh_bounds
    }

    pub fn resolution(&self) -> u32 {
        self.grid.resolution
    }

    pub fn step(&self) -> Vec3 {
        self.grid.step
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Stored value at voxel `(x, y, z)`.
    #[inline]
    pub fn voxel(&self, x: u32, y: u32, z: u32) -> f32 {
        self.distances[self.grid.index(x, y, z)]
    }

    /// Trilinearly interpolated distance at `p`.
    ///
    /// Outside the grid the boundary value is extended and the distance to
    /// the grid box is added, so values keep growing away from the mesh.
    pub fn sample(&self, p: Vec3) -> f32 {
        let g = &self.grid;
        let top = (g.resolution - 1) as f32;
        let u = ((p - g.bounds.min) / g.step - 0.5).clamp(Vec3::ZERO, Vec3::splat(top));
        let i0 = u.floor();
        let f = u - i0;

        let r = g.resolution - 1;
        let (x0, y0, z0) = (i0.x as u32, i0.y as u32, i0.z as u32);
        let (x1, y1, z1) = ((x0 + 1).min(r), (y0 + 1).min(r), (z0 + 1).min(r));

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(self.voxel(x0, y0, z0), self.voxel(x1, y0, z0), f.x);
        let c10 = lerp(self.voxel(x0, y1, z0), self.voxel(x1, y1, z0), f.x);
        let c01 = lerp(self.voxel(x0, y0, z1), self.voxel(x1, y0, z1), f.x);
        let c11 = lerp(self.voxel(x0, y1, z1), self.voxel(x1, y1, z1), f.x);
        let c0 = lerp(c00, c10, f.y);
        let c1 = lerp(c01, c11, f.y);

        lerp(c0, c1, f.z) + g.bounds.distance_to_point(p)
    }

    /// Normalized central-difference gradient of [`sample`](Self::sample).
    ///
    /// Falls back to +Y where the field is flat.
    pub fn gradient(&self, p: Vec3) -> Vec3 {
        let e = 0.25 * self.grid.step.min_element();
        let dx = Vec3::new(e, 0.0, 0.0);
        let dy = Vec3::new(0.0, e, 0.0);
        let dz = Vec3::new(0.0, 0.0, e);
        let g = Vec3::new(
            self.sample(p + dx) - self.sample(p - dx),
            self.sample(p + dy) - self.sample(p - dy),
            self.sample(p + dz) - self.sample(p - dz),
        );
        g.try_normalize().unwrap_or(Vec3::Y)
    }

    /// Spot-check a stride-spaced subset of voxels.
    ///
    /// Rejects non-finite values, a value range below `epsilon`, and a
    /// minimum too large for any sampled voxel to be near a surface.
    pub fn validate(&self, stride: u32, epsilon: f32) -> Result<(), ValidationError> {
        let stride = stride.max(1);
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;

        for z in (0..self.grid.resolution).step_by(stride as usize) {
            for y in (0..self.grid.resolution).step_by(stride as usize) {
                for x in (0..self.grid.resolution).step_by(stride as usize) {
                    let v = self.voxel(x, y, z);
                    if !v.is_finite() {
                        return Err(ValidationError::NonFinite(v));
                    }
                    min = min.min(v);
                    max = max.max(v);
                }
            }
        }

        let range = max - min;
        if range < epsilon {
            return Err(ValidationError::Flat { range, epsilon });
        }
        let threshold = 3f32.sqrt() * (stride + 1) as f32 * self.grid.step.max_element();
        if min > threshold {
            return Err(ValidationError::NoSurface { min, threshold });
        }
        Ok(())
    }

    /// Largest absolute per-voxel difference to `other`, or `None` when the
    /// grids differ in size.
    pub fn max_difference(&self, other: &DistanceField) -> Option<f32> {
        if self.distances.len() != other.distances.len() {
            return None;
        }
        Some(
            self.distances
                .iter()
                .zip(&other.distances)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }

    pub fn to_serialized(&self) -> SerializedField {
        SerializedField {
            version: FIELD_FORMAT_VERSION,
            bounds: self.grid.bounds,
            mesh_bounds: self.mesh_bounds,
            resolution: self.grid.resolution,
            step: self.grid.step,
            distances: self.distances.clone(),
        }
    }

    /// Rebuild a field from its stored form.
    ///
    /// Checks the format version and the array length. Callers still have
    /// to [`validate`](Self::validate) the result before trusting it.
    pub fn from_serialized(stored: SerializedField) -> Result<Self, CacheError> {
        if stored.version != FIELD_FORMAT_VERSION {
            return Err(CacheError::Version {
                found: stored.version,
                expected: FIELD_FORMAT_VERSION,
            });
        }
        if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&stored.resolution) || !stored.bounds.is_valid() {
            return Err(CacheError::Invalid(ValidationError::BadGrid {
                resolution: stored.resolution,
            }));
        }
        let grid = FieldGrid::new(stored.bounds, stored.resolution);
        Ok(Self::new(grid, stored.mesh_bounds, stored.distances)?)
    }
}

/// Storage form of a [`DistanceField`] for the external cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedField {
    pub version: u32,
    pub bounds: Aabb,
    pub mesh_bounds: Aabb,
    pub resolution: u32,
    pub step: Vec3,
    pub distances: Vec<f32>,
}

/// Grid descriptor shared by the compute kernels. Matches
/// [`FieldGridGpu`](crate::gpu::FieldGridGpu).
pub const FIELD_GRID_WGSL: &str = r#"
struct FieldGrid {
    min: vec3<f32>,
    resolution: u32,
    max: vec3<f32>,
    count: u32,
    step: vec3<f32>,
    first: u32,
};
"#;

/// WGSL sampling helpers matching [`DistanceField::sample`] and
/// [`DistanceField::gradient`].
///
/// Needs [`FIELD_GRID_WGSL`], and the including shader must declare
/// `field_grid: FieldGrid` (uniform) and `field_distances: array<f32>`
/// (storage).
pub const FIELD_SAMPLE_WGSL: &str = r#"

fn field_at(x: u32, y: u32, z: u32) -> f32 {
    let r = field_grid.resolution;
    return field_distances[x + y * r + z * r * r];
}

fn field_box_distance(p: vec3<f32>) -> f32 {
    let d = max(max(field_grid.min - p, p - field_grid.max), vec3<f32>(0.0));
    return length(d);
}

fn field_sample(p: vec3<f32>) -> f32 {
    let r = field_grid.resolution - 1u;
    let u = clamp((p - field_grid.min) / field_grid.step - vec3<f32>(0.5), vec3<f32>(0.0), vec3<f32>(f32(r)));
    let fl = floor(u);
    let f = u - fl;
    let i0 = vec3<u32>(fl);
    let i1 = min(i0 + vec3<u32>(1u), vec3<u32>(r));

    let c00 = mix(field_at(i0.x, i0.y, i0.z), field_at(i1.x, i0.y, i0.z), f.x);
    let c10 = mix(field_at(i0.x, i1.y, i0.z), field_at(i1.x, i1.y, i0.z), f.x);
    let c01 = mix(field_at(i0.x, i0.y, i1.z), field_at(i1.x, i0.y, i1.z), f.x);
    let c11 = mix(field_at(i0.x, i1.y, i1.z), field_at(i1.x, i1.y, i1.z), f.x);
    let c0 = mix(c00, c10, f.y);
    let c1 = mix(c01, c11, f.y);
    return mix(c0, c1, f.z) + field_box_distance(p);
}

fn field_gradient(p: vec3<f32>) -> vec3<f32> {
    let e = 0.25 * min(field_grid.step.x, min(field_grid.step.y, field_grid.step.z));
    let dx = vec3<f32>(e, 0.0, 0.0);
    let dy = vec3<f32>(0.0, e, 0.0);
    let dz = vec3<f32>(0.0, 0.0, e);
    let g = vec3<f32>(
        field_sample(p + dx) - field_sample(p - dx),
        field_sample(p + dy) - field_sample(p - dy),
        field_sample(p + dz) - field_sample(p - dz),
    );
    let len = length(g);
    if len < 1e-12 {
        return vec3<f32>(0.0, 1.0, 0.0);
    }
    return g / len;
}
"#;
