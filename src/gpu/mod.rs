//! Headless wgpu compute context and shared GPU helpers.
//!
//! [`GpuContext`] owns the instance, adapter, device and queue. It is
//! created once, shared through an `Arc` by field generation and the GPU
//! particle backend, and released when the last owner drops it.

pub mod field_gpu;
pub mod particle_gpu;

pub use particle_gpu::{GpuBackend, PendingStep};

use bytemuck::{Pod, Zeroable};

use crate::error::GpuError;
use crate::field::FieldGrid;

/// Grid descriptor uploaded as a uniform. Layout matches `FieldGrid` in
/// [`FIELD_GRID_WGSL`](crate::field::FIELD_GRID_WGSL).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FieldGridGpu {
    pub min: [f32; 3],
    pub resolution: u32,
    pub max: [f32; 3],
    /// Triangle count for the field kernel; unused by the particle kernel.
    pub count: u32,
    pub step: [f32; 3],
    /// First triangle of this dispatch for the field kernel.
    pub first: u32,
}

impl FieldGridGpu {
    pub fn new(grid: &FieldGrid) -> Self {
        Self {
            min: grid.bounds.min.to_array(),
            resolution: grid.resolution,
            max: grid.bounds.max.to_array(),
            count: 0,
            step: grid.step.to_array(),
            first: 0,
        }
    }
}

/// Owned GPU compute context.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire an adapter and device, blocking until both are ready.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(GpuError::Limits(format!(
                "adapter {} has no compute shader support",
                adapter.get_info().name
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("textsplash compute device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Adapter name and backend, for status text.
    pub fn describe(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} ({:?})", info.name, info.backend)
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Fail early when a storage buffer of `bytes` cannot be bound.
    pub fn check_storage_size(&self, what: &str, bytes: u64) -> Result<(), GpuError> {
        let limits = self.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if bytes > max {
            return Err(GpuError::Limits(format!("{} needs {} bytes, device allows {}", what, bytes, max)));
        }
        Ok(())
    }

    /// Run `f` inside a validation error scope so shader and pipeline
    /// errors come back as `Err` instead of a device panic.
    pub fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(GpuError::Validation(err.to_string())),
            None => Ok(value),
        }
    }
}

/// Map a `MAP_READ` buffer, block until the GPU is done, and copy it out.
pub fn read_buffer<T: Pod>(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<T>, GpuError> {
    read_buffer_prefix(device, buffer, buffer.size())
}

/// Like [`read_buffer`], limited to the first `bytes` of the buffer.
pub fn read_buffer_prefix<T: Pod>(device: &wgpu::Device, buffer: &wgpu::Buffer, bytes: u64) -> Result<Vec<T>, GpuError> {
    let slice = buffer.slice(..bytes);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

    let data = slice.get_mapped_range();
    let out = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.unmap();
    Ok(out)
}

/// Storage/uniform layout entry for a compute-only binding.
pub(crate) fn compute_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Validates WGSL code using naga.
#[cfg(test)]
pub(crate) fn validate_wgsl(code: &str) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(code).map_err(|e| format!("WGSL parse error: {:?}", e))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| format!("WGSL validation error: {:?}", e))?;

    Ok(())
}
