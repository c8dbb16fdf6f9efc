//! GPU distance-field generation: one invocation per voxel.
//!
//! Triangles are uploaded as three `vec4` corners each. Every invocation
//! computes its voxel centre and loops over the triangles with the exact
//! point-to-triangle distance; there is no BVH on the device. Large meshes
//! are split into several dispatches that keep a running minimum, so no
//! single dispatch runs long enough to trip a driver watchdog.

use wgpu::util::DeviceExt;

use super::{compute_entry, read_buffer, FieldGridGpu, GpuContext};
use crate::distance::POINT_TRIANGLE_WGSL;
use crate::error::GpuError;
use crate::field::{FieldGrid, FIELD_GRID_WGSL};
use crate::mesh::Triangle;

/// Voxels per workgroup axis.
const WORKGROUP_EDGE: u32 = 4;
/// Triangles handled per dispatch.
const TRIANGLES_PER_DISPATCH: usize = 4096;

const FIELD_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read> triangles: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> distances: array<f32>;
@group(0) @binding(2) var<uniform> grid: FieldGrid;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let r = grid.resolution;
    if id.x >= r || id.y >= r || id.z >= r {
        return;
    }
    let p = grid.min + (vec3<f32>(id) + vec3<f32>(0.5)) * grid.step;
    let idx = id.x + id.y * r + id.z * r * r;

    var best = 3.4e38;
    if grid.first > 0u {
        best = distances[idx];
    }
    for (var t = grid.first; t < grid.first + grid.count; t += 1u) {
        let base = t * 3u;
        let d = point_triangle_distance(p, triangles[base].xyz, triangles[base + 1u].xyz, triangles[base + 2u].xyz);
        best = min(best, d);
    }
    distances[idx] = best;
}
"#;

/// Full kernel source: grid struct, distance function, entry point.
pub fn field_kernel_source() -> String {
    format!("{}\n{}\n{}", FIELD_GRID_WGSL, POINT_TRIANGLE_WGSL, FIELD_KERNEL)
}

fn create_field_pipeline(device: &wgpu::Device) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Distance Field Shader"),
        source: wgpu::ShaderSource::Wgsl(field_kernel_source().into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Distance Field Bind Group Layout"),
        entries: &[
            // Triangle corners
            compute_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
            // Output distances
            compute_entry(1, wgpu::BufferBindingType::Storage { read_only: false }),
            // Grid
            compute_entry(2, wgpu::BufferBindingType::Uniform),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Distance Field Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Distance Field Pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    (pipeline, bind_group_layout)
}

/// Triangle corners padded to `vec4` for upload.
fn pack_triangles(triangles: &[Triangle]) -> Vec<[f32; 4]> {
    triangles
        .iter()
        .flat_map(|t| [t.a.extend(0.0).to_array(), t.b.extend(0.0).to_array(), t.c.extend(0.0).to_array()])
        .collect()
}

/// Compute the distance to the nearest triangle at every voxel centre of
/// `grid` on the GPU. Blocks until the result is read back.
pub fn generate_distances(ctx: &GpuContext, triangles: &[Triangle], grid: &FieldGrid) -> Result<Vec<f32>, GpuError> {
    let device = &ctx.device;
    let voxels = grid.total_voxels();
    let output_bytes = (voxels * std::mem::size_of::<f32>()) as u64;
    let corners = pack_triangles(triangles);
    let triangle_bytes = std::mem::size_of_val(corners.as_slice()) as u64;

    ctx.check_storage_size("distance field", output_bytes)?;
    ctx.check_storage_size("triangle buffer", triangle_bytes)?;
    let groups = grid.resolution.div_ceil(WORKGROUP_EDGE);
    let max_groups = ctx.limits().max_compute_workgroups_per_dimension;
    if groups > max_groups {
        return Err(GpuError::Limits(format!("{} workgroups per axis, device allows {}", groups, max_groups)));
    }

    let (pipeline, layout) = ctx.validated(create_field_pipeline)?;

    let triangle_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Distance Field Triangles"),
        contents: bytemuck::cast_slice(&corners),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let distance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Distance Field Output"),
        size: output_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Distance Field Staging"),
        size: output_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Distance Field Encoder"),
    });

    for first in (0..triangles.len()).step_by(TRIANGLES_PER_DISPATCH) {
        let count = TRIANGLES_PER_DISPATCH.min(triangles.len() - first);
        let params = FieldGridGpu {
            count: count as u32,
            first: first as u32,
            ..FieldGridGpu::new(grid)
        };
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distance Field Grid"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Distance Field Bind Group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: triangle_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: distance_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Distance Field Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups, groups, groups);
    }

    encoder.copy_buffer_to_buffer(&distance_buffer, 0, &staging, 0, output_bytes);
    ctx.queue.submit(Some(encoder.finish()));

    let distances: Vec<f32> = read_buffer(device, &staging)?;
    log::debug!(
        "GPU field: {} voxels, {} triangles in {} dispatches",
        voxels,
        triangles.len(),
        triangles.len().div_ceil(TRIANGLES_PER_DISPATCH)
    );
    Ok(distances)
}
