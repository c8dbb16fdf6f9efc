//! Error types for textsplash.
//!
//! One enum per concern: mesh input, field generation, caching, GPU
//! acquisition, backend initialization and configuration. [`SplashError`]
//! wraps all of them for the orchestrator.

use thiserror::Error;

use crate::generate::FieldStrategy;

/// Errors from turning a position buffer into triangles.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The position buffer length is not a multiple of 3.
    #[error("position buffer length {0} is not a multiple of 3")]
    RaggedPositions(usize),
    /// The index buffer length is not a multiple of 3.
    #[error("index buffer length {0} is not a multiple of 3")]
    RaggedIndices(usize),
    /// An index points past the end of the vertex list.
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    /// The mesh contains no triangles.
    #[error("mesh contains no triangles")]
    Empty,
}

/// Errors that can occur while acquiring or using the GPU.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Shader or pipeline creation was rejected by validation.
    #[error("GPU pipeline validation failed: {0}")]
    Validation(String),
    /// Failed to map buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
    /// The requested work does not fit the device limits.
    #[error("GPU limit exceeded: {0}")]
    Limits(String),
}

/// Reasons a generated (or cached) field was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A sampled voxel holds NaN or infinity.
    #[error("field contains non-finite distance {0}")]
    NonFinite(f32),
    /// The sampled values barely vary.
    #[error("field value range {range} below epsilon {epsilon}")]
    Flat { range: f32, epsilon: f32 },
    /// No sampled voxel is close to any surface.
    #[error("smallest sampled distance {min} exceeds {threshold}")]
    NoSurface { min: f32, threshold: f32 },
    /// The distance array does not hold `resolution³` values.
    #[error("expected {expected} distances, found {found}")]
    WrongLength { expected: usize, found: usize },
    /// The grid description itself is unusable.
    #[error("unusable grid with resolution {resolution}")]
    BadGrid { resolution: u32 },
}

/// Errors from field generation.
#[derive(Debug, Error)]
pub enum FieldError {
    /// The mesh has no triangles to measure against.
    #[error("cannot build a field for an empty mesh")]
    EmptyMesh,
    /// Field resolution outside the supported range.
    #[error("field resolution {0} outside 8..=256")]
    Resolution(u32),
    /// A sliced worker could not be started or panicked.
    #[error("field worker {worker} failed: {reason}")]
    Worker { worker: usize, reason: String },
    /// The GPU path failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),
    /// The produced field did not pass validation.
    #[error("invalid field: {0}")]
    Invalid(#[from] ValidationError),
    /// The strategy was requested but cannot run here.
    #[error("strategy {0:?} not available")]
    StrategyUnavailable(FieldStrategy),
    /// The generation settings are out of range.
    #[error("invalid field settings: {0}")]
    Config(#[from] ConfigError),
    /// Every strategy failed; carries each attempt's failure.
    #[error("all field strategies failed: {}", format_attempts(.attempts))]
    AllStrategiesFailed {
        attempts: Vec<(FieldStrategy, String)>,
    },
}

fn format_attempts(attempts: &[(FieldStrategy, String)]) -> String {
    attempts
        .iter()
        .map(|(s, e)| format!("{:?}: {}", s, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from the external field cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stored value could not be (de)serialized.
    #[error("cache entry could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
    /// Stored value was written by another field format.
    #[error("cache entry has format version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },
    /// Stored value failed validation.
    #[error("cached field rejected: {0}")]
    Invalid(#[from] ValidationError),
}

/// Errors from backend initialization and stepping.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The capability is missing on this machine; try the next backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// GPU failure during init or while stepping.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Out-of-range configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A value is outside its permitted range.
    #[error("{field} = {value} outside {expected}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        expected: &'static str,
    },
    /// A min/max pair is inverted.
    #[error("{min_field} > {max_field}")]
    InvertedRange {
        min_field: &'static str,
        max_field: &'static str,
    },    /// A list that needs at least one entry is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Top-level error for the orchestrator.
#[derive(Debug, Error)]
pub enum SplashError {
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// `update`/`spawn` called before a field was loaded.
    #[error("no field loaded; call load_shape first")]
    NotReady,
}
