//! GPU compute particle backend.
//!
//! Particles live in one storage buffer of [`GpuParticle`]; the field is
//! uploaded once as a storage buffer plus its grid uniform. Each step
//! writes a [`SimParams`] uniform, dispatches one invocation per slot in
//! `[0, count)` and copies the result into a staging buffer.
//!
//! The host keeps a mirror [`ParticleStore`] for slot allocation, contact
//! counts and render copies. It is refreshed from the staging buffer when a
//! step is resolved. Spawns are written into the storage buffer with
//! `write_buffer`, so they land before the next dispatch.

use std::collections::HashSet;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::util::DeviceExt;

use super::{compute_entry, read_buffer_prefix, FieldGridGpu, GpuContext};
use crate::backend::{BackendKind, ComputeBackend};
use crate::config::{SplashConfig, StuckExit};
use crate::error::{BackendError, GpuError};
use crate::field::{DistanceField, FIELD_GRID_WGSL, FIELD_SAMPLE_WGSL};
use crate::particles::{Particle, ParticleState, ParticleStore, SpawnBatch};
use crate::rng::clock_seed;

/// Invocations per workgroup.
const WORKGROUP_SIZE: usize = 64;

/// One particle as stored on the device.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    /// xyz position, w size.
    pub pos_size: [f32; 4],
    /// xyz velocity, w stick timer.
    pub vel_timer: [f32; 4],
    pub state: u32,
    pub slide_speed: f32,
    pub _pad: [u32; 2],
}

impl GpuParticle {
    pub fn inactive() -> Self {
        Self {
            state: ParticleState::Inactive.code(),
            ..Self::default()
        }
    }

    pub fn to_particle(&self) -> Particle {
        let [px, py, pz, size] = self.pos_size;
        let [vx, vy, vz, timer] = self.vel_timer;
        Particle {
            position: Vec3::new(px, py, pz),
            velocity: Vec3::new(vx, vy, vz),
            state: ParticleState::from_code(self.state).unwrap_or(ParticleState::Inactive),
            size,
            stick_timer: timer,
            slide_speed: self.slide_speed,
        }
    }
}

impl From<&Particle> for GpuParticle {
    fn from(p: &Particle) -> Self {
        Self {
            pos_size: p.position.extend(p.size).to_array(),
            vel_timer: p.velocity.extend(p.stick_timer).to_array(),
            state: p.state.code(),
            slide_speed: p.slide_speed,
            _pad: [0; 2],
        }
    }
}

/// Per-step uniform. Layout matches `SimParams` in the kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SimParams {
    pub front_axis: [f32; 3],
    pub front_gating: u32,
    pub dt: f32,
    pub time: f32,
    pub gravity: f32,
    pub impact_threshold: f32,
    pub surface_offset: f32,
    pub front_normal_min: f32,
    pub front_band: f32,
    pub front_plane: f32,
    pub bounce_chance: f32,
    pub restitution_min: f32,
    pub restitution_max: f32,
    pub restitution_falloff: f32,
    pub spray_speed: f32,
    pub spray_upward: f32,
    pub bounce_shrink_min: f32,
    pub bounce_shrink_max: f32,
    pub bounce_shrink_speed_factor: f32,
    pub bounce_drag: f32,
    pub bounce_shrink_rate: f32,
    pub stick_min: f32,
    pub stick_max: f32,
    pub stuck_exit: u32,
    pub slide_min: f32,
    pub slide_max: f32,
    pub slide_duration_max: f32,
    pub leave_threshold: f32,
    pub resnap_threshold: f32,
    pub drip_initial_speed: f32,
    pub drip_drag: f32,
    pub drip_shrink_rate: f32,
    pub jitter_amount: f32,
    pub jitter_speed: f32,
    pub removal_y: f32,
    pub removal_z: f32,
    pub min_size: f32,
    pub mesh_min_y: f32,
    pub count: u32,
    pub frame: u32,
    pub seed: u32,
    pub _pad: u32,
}

impl SimParams {
    pub fn new(config: &SplashConfig, field: &DistanceField, dt: f32, time: f32) -> Self {
        let axis = config.front_direction();
        Self {
            front_axis: axis.to_array(),
            front_gating: config.front_gating as u32,
            dt,
            time,
            gravity: config.gravity,
            impact_threshold: config.impact_threshold,
            surface_offset: config.surface_offset,
            front_normal_min: config.front_normal_min,
            front_band: config.front_band,
            front_plane: field.mesh_bounds().max_along(axis),
            bounce_chance: config.bounce_chance,
            restitution_min: config.restitution_min,
            restitution_max: config.restitution_max,
            restitution_falloff: config.restitution_alignment_falloff,
            spray_speed: config.spray_speed,
            spray_upward: config.spray_upward,
            bounce_shrink_min: config.bounce_shrink_min,
            bounce_shrink_max: config.bounce_shrink_max,
            bounce_shrink_speed_factor: config.bounce_shrink_speed_factor,
            bounce_drag: config.bounce_drag,
            bounce_shrink_rate: config.bounce_shrink_rate,
            stick_min: config.stick_duration_min,
            stick_max: config.stick_duration_max,
            stuck_exit: match config.stuck_exit {
                StuckExit::Drip => 0,
                StuckExit::Slide => 1,
            },
            slide_min: config.slide_speed_min,
            slide_max: config.slide_speed_max,
            slide_duration_max: config.slide_duration_max,
            leave_threshold: config.leave_surface_threshold,
            resnap_threshold: config.resnap_threshold,
            drip_initial_speed: config.drip_initial_speed,
            drip_drag: config.drip_drag,
            drip_shrink_rate: config.drip_shrink_rate,
            jitter_amount: config.jitter_amount,
            jitter_speed: config.jitter_speed,
            removal_y: config.removal_y,
            removal_z: config.removal_z,
            min_size: config.min_size,
            mesh_min_y: field.mesh_bounds().min.y,
            count: 0,
            frame: 0,
            seed: 0,
            _pad: 0,
        }
    }
}

const PARTICLE_KERNEL: &str = r#"
struct Particle {
    pos_size: vec4<f32>,
    vel_timer: vec4<f32>,
    state: u32,
    slide_speed: f32,
    _pad: vec2<u32>,
};

struct SimParams {
    front_axis: vec3<f32>,
    front_gating: u32,
    dt: f32,
    time: f32,
    gravity: f32,
    impact_threshold: f32,
    surface_offset: f32,
    front_normal_min: f32,
    front_band: f32,
    front_plane: f32,
    bounce_chance: f32,
    restitution_min: f32,
    restitution_max: f32,
    restitution_falloff: f32,
    spray_speed: f32,
    spray_upward: f32,
    bounce_shrink_min: f32,
    bounce_shrink_max: f32,
    bounce_shrink_speed_factor: f32,
    bounce_drag: f32,
    bounce_shrink_rate: f32,
    stick_min: f32,
    stick_max: f32,
    stuck_exit: u32,
    slide_min: f32,
    slide_max: f32,
    slide_duration_max: f32,
    leave_threshold: f32,
    resnap_threshold: f32,
    drip_initial_speed: f32,
    drip_drag: f32,
    drip_shrink_rate: f32,
    jitter_amount: f32,
    jitter_speed: f32,
    removal_y: f32,
    removal_z: f32,
    min_size: f32,
    mesh_min_y: f32,
    count: u32,
    frame: u32,
    seed: u32,
    _pad: u32,
};

// Unpacked particle for the duration of one step.
struct Droplet {
    pos: vec3<f32>,
    size: f32,
    vel: vec3<f32>,
    timer: f32,
    state: u32,
    seed: f32,
};

@group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(1) var<uniform> params: SimParams;
@group(0) @binding(2) var<uniform> field_grid: FieldGrid;
@group(0) @binding(3) var<storage, read> field_distances: array<f32>;

var<private> rng_state: u32;

fn pcg_hash(v: u32) -> u32 {
    let state = v * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

// Uniform in [0, 1)
fn rand() -> f32 {
    rng_state = pcg_hash(rng_state);
    return f32(rng_state >> 8u) / 16777216.0;
}

fn rand_range(lo: f32, hi: f32) -> f32 {
    return lo + (hi - lo) * rand();
}

fn rand_tangent(n: vec3<f32>) -> vec3<f32> {
    var helper = vec3<f32>(1.0, 0.0, 0.0);
    if abs(n.x) > 0.9 {
        helper = vec3<f32>(0.0, 1.0, 0.0);
    }
    let a = normalize(cross(n, helper));
    let b = cross(n, a);
    let theta = rand() * 6.2831853;
    return a * cos(theta) + b * sin(theta);
}

fn drag(per_frame: f32) -> f32 {
    return pow(per_frame, params.dt * 60.0);
}

fn shrink(rate: f32) -> f32 {
    return max(1.0 - rate * params.dt, 0.0);
}

fn deactivate(d: ptr<function, Droplet>) {
    (*d).state = INACTIVE;
    (*d).size = 0.0;
    (*d).vel = vec3<f32>(0.0);
}

fn accepts_impact(p: vec3<f32>, n: vec3<f32>) -> bool {
    if params.front_gating == 0u {
        return true;
    }
    return dot(n, params.front_axis) > params.front_normal_min
        && dot(p, params.front_axis) >= params.front_plane - params.front_band;
}

fn bounce(d: ptr<function, Droplet>, n: vec3<f32>) {
    let v = (*d).vel;
    let speed = length(v);
    var alignment = 0.0;
    if speed > 0.0 {
        alignment = abs(dot(v / speed, n));
    }
    let restitution = rand_range(params.restitution_min, params.restitution_max)
        * (1.0 - params.restitution_falloff * alignment);
    let reflected = v - 2.0 * dot(v, n) * n;
    let spray = rand_tangent(n) * rand_range(0.0, params.spray_speed);
    let scatter = vec3<f32>(0.0, rand_range(0.0, params.spray_upward), 0.0);
    (*d).vel = reflected * restitution + spray + scatter;

    let s = rand_range(params.bounce_shrink_min, params.bounce_shrink_max) - speed * params.bounce_shrink_speed_factor;
    (*d).size *= clamp(s, 0.2, 1.0);
    (*d).state = BOUNCING;
    (*d).timer = 0.0;
}

fn step_falling(d: ptr<function, Droplet>) {
    (*d).vel.y -= params.gravity * params.dt;
    (*d).pos += (*d).vel * params.dt;
    if (*d).pos.y < params.removal_y || (*d).pos.z < params.removal_z {
        deactivate(d);
        return;
    }

    let dist = field_sample((*d).pos);
    if dist >= params.impact_threshold {
        return;
    }
    let n = field_gradient((*d).pos);
    if !accepts_impact((*d).pos, n) {
        return;
    }

    (*d).pos += n * (params.surface_offset - dist);
    if rand() < params.bounce_chance {
        bounce(d, n);
    } else {
        (*d).state = STUCK;
        (*d).vel = vec3<f32>(0.0);
        (*d).timer = 0.0;
    }
}

fn step_airborne(d: ptr<function, Droplet>, per_frame_drag: f32, shrink_rate: f32) {
    (*d).vel.y -= params.gravity * params.dt;
    let k = drag(per_frame_drag);
    (*d).vel.x *= k;
    (*d).vel.z *= k;
    (*d).pos += (*d).vel * params.dt;
    (*d).size *= shrink(shrink_rate);
    (*d).timer += params.dt;
    if (*d).pos.y < params.removal_y || (*d).size < params.min_size {
        deactivate(d);
    }
}

fn step_stuck(d: ptr<function, Droplet>) {
    (*d).timer += params.dt;
    if params.jitter_amount > 0.0 {
        let phase = (*d).pos.y * 37.0;
        let now = params.time * params.jitter_speed + phase;
        let before = (params.time - params.dt) * params.jitter_speed + phase;
        (*d).pos.x += params.jitter_amount * (sin(now) - sin(before));
        (*d).pos.z += params.jitter_amount * (cos(now) - cos(before));
    }

    let hold = mix(params.stick_min, params.stick_max, (*d).seed);
    if (*d).timer <= hold {
        return;
    }
    (*d).timer = 0.0;
    (*d).vel = vec3<f32>(0.0, -params.drip_initial_speed, 0.0);
    if params.stuck_exit == 1u {
        (*d).state = SLIDING;
    } else {
        (*d).state = DRIPPING;
    }
}

fn step_sliding(d: ptr<function, Droplet>) {
    (*d).timer += params.dt;
    let n = field_gradient((*d).pos);
    let g = vec3<f32>(0.0, -params.gravity, 0.0);
    var dir = g - n * dot(g, n);
    let len = length(dir);
    if len > 1e-6 {
        dir = dir / len;
    } else {
        dir = vec3<f32>(0.0, -1.0, 0.0);
    }
    (*d).vel = dir * mix(params.slide_min, params.slide_max, (*d).seed);
    (*d).pos += (*d).vel * params.dt;
    if (*d).pos.y < params.removal_y {
        deactivate(d);
        return;
    }

    let dist = field_sample((*d).pos);
    let off_surface = dist > params.leave_threshold;
    let past_bottom = (*d).pos.y <= params.mesh_min_y;
    if off_surface || past_bottom || (*d).timer > params.slide_duration_max {
        (*d).state = DRIPPING;
        (*d).timer = 0.0;
        (*d).vel.y = min((*d).vel.y, -params.drip_initial_speed);
    } else if dist < params.resnap_threshold {
        (*d).pos += n * (params.surface_offset - dist);
    }
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if i >= params.count {
        return;
    }
    let stored = particles[i];
    if stored.state == INACTIVE {
        return;
    }
    rng_state = pcg_hash(i ^ pcg_hash(params.frame ^ params.seed));

    var d = Droplet(
        stored.pos_size.xyz,
        stored.pos_size.w,
        stored.vel_timer.xyz,
        stored.vel_timer.w,
        stored.state,
        stored.slide_speed,
    );
    if d.state == FALLING {
        step_falling(&d);
    } else if d.state == STUCK {
        step_stuck(&d);
    } else if d.state == SLIDING {
        step_sliding(&d);
    } else if d.state == DRIPPING {
        step_airborne(&d, params.drip_drag, params.drip_shrink_rate);
    } else if d.state == BOUNCING {
        step_airborne(&d, params.bounce_drag, params.bounce_shrink_rate);
    } else {
        deactivate(&d);
    }

    particles[i] = Particle(
        vec4<f32>(d.pos, d.size),
        vec4<f32>(d.vel, d.timer),
        d.state,
        d.seed,
        vec2<u32>(0u),
    );
}
"#;

/// State codes as WGSL constants, generated from [`ParticleState`].
fn state_constants() -> String {
    ParticleState::ALL
        .iter()
        .map(|s| format!("const {}: u32 = {}u;\n", format!("{:?}", s).to_uppercase(), s.code()))
        .collect()
}

/// Full kernel source: state codes, grid struct, field sampling, entry point.
pub fn particle_kernel_source() -> String {
    format!(
        "{}\n{}\n{}\n{}",
        state_constants(),
        FIELD_GRID_WGSL,
        FIELD_SAMPLE_WGSL,
        PARTICLE_KERNEL
    )
}

fn create_particle_pipeline(device: &wgpu::Device) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Particle Shader"),
        source: wgpu::ShaderSource::Wgsl(particle_kernel_source().into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Particle Bind Group Layout"),
        entries: &[
            // Particles
            compute_entry(0, wgpu::BufferBindingType::Storage { read_only: false }),
            // Step parameters
            compute_entry(1, wgpu::BufferBindingType::Uniform),
            // Field grid
            compute_entry(2, wgpu::BufferBindingType::Uniform),
            // Field distances
            compute_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Particle Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Particle Pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    (pipeline, bind_group_layout)
}

/// Field buffers and the bind group that references them.
struct FieldBinding {
    grid_buffer: wgpu::Buffer,
    distance_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Consecutive runs in an ordered slot list, as `(first, len)`.
fn slot_runs(slots: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &slot in slots {
        match runs.last_mut() {
            Some((first, len)) if *first + *len == slot => *len += 1,
            _ => runs.push((slot, 1)),
        }
    }
    runs
}

/// A submitted step whose results have not been read back yet.
#[must_use = "a dispatched step must be resolved"]
#[derive(Debug)]
pub struct PendingStep {
    count: usize,
    generation: u64,
}

/// GPU compute backend.
pub struct GpuBackend {
    ctx: Arc<GpuContext>,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    particle_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    binding: FieldBinding,
    field: Arc<DistanceField>,
    config: SplashConfig,
    mirror: ParticleStore,
    /// Slots written by spawn since the last dispatch; their readback is stale.
    spawned_since_dispatch: HashSet<usize>,
    /// Bumped by reset so in-flight steps are discarded.
    generation: u64,
    frame: u32,
    seed: u32,
}

impl GpuBackend {
    /// Compile the kernel and allocate device buffers for `config.capacity`
    /// particles and `field`.
    pub fn new(ctx: Arc<GpuContext>, field: Arc<DistanceField>, config: &SplashConfig) -> Result<Self, BackendError> {
        let slots = config.capacity.max(1);
        let particle_bytes = (slots * size_of::<GpuParticle>()) as u64;
        ctx.check_storage_size("particle buffer", particle_bytes)?;
        let groups = slots.div_ceil(WORKGROUP_SIZE);
        let max_groups = ctx.limits().max_compute_workgroups_per_dimension as usize;
        if groups > max_groups {
            return Err(GpuError::Limits(format!(
                "{} particles need {} workgroups, device allows {}",
                config.capacity, groups, max_groups
            ))
            .into());
        }

        let (pipeline, layout) = ctx.validated(create_particle_pipeline)?;

        let device = &ctx.device;
        let initial = vec![GpuParticle::inactive(); slots];
        let particle_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Buffer"),
            contents: bytemuck::cast_slice(&initial),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Staging"),
            size: particle_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Params"),
            size: size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let binding = bind_field(&ctx, &layout, &particle_buffer, &params_buffer, &field)?;
        let seed = config.seed.unwrap_or_else(clock_seed);

        log::debug!(
            "GPU particle backend on {}: {} slots, {} field voxels",
            ctx.describe(),
            config.capacity,
            field.distances().len()
        );

        Ok(Self {
            ctx,
            pipeline,
            layout,
            particle_buffer,
            staging_buffer,
            params_buffer,
            binding,
            field,
            config: config.clone(),
            mirror: ParticleStore::new(config.capacity),
            spawned_since_dispatch: HashSet::new(),
            generation: 0,
            frame: 0,
            seed: (seed ^ (seed >> 32)) as u32,
        })
    }

    /// Host-side copy of the particles as of the last resolved step.
    pub fn mirror(&self) -> &ParticleStore {
        &self.mirror
    }

    /// Submit one step and the copy into the staging buffer without waiting.
    pub fn dispatch(&mut self, dt: f32, time: f32) -> PendingStep {
        let count = self.mirror.count();
        self.frame = self.frame.wrapping_add(1);
        self.spawned_since_dispatch.clear();

        let params = SimParams {
            count: count as u32,
            frame: self.frame,
            seed: self.seed,
            ..SimParams::new(&self.config, &self.field, dt, time)
        };
        self.ctx
            .queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Encoder"),
        });
        if count > 0 {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Particle Update Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &self.binding.bind_group, &[]);
                pass.dispatch_workgroups(count.div_ceil(WORKGROUP_SIZE) as u32, 1, 1);
            }
            let bytes = (count * size_of::<GpuParticle>()) as u64;
            encoder.copy_buffer_to_buffer(&self.particle_buffer, 0, &self.staging_buffer, 0, bytes);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        PendingStep {
            count,
            generation: self.generation,
        }
    }

    /// Wait for a dispatched step and refresh the host mirror. Returns the
    /// active count.
    ///
    /// A mapping failure is fatal for the session.
    pub fn resolve(&mut self, pending: PendingStep) -> Result<usize, BackendError> {
        if pending.count == 0 || pending.generation != self.generation {
            return Ok(self.mirror.active_count());
        }
        let bytes = (pending.count * size_of::<GpuParticle>()) as u64;
        let particles: Vec<GpuParticle> = read_buffer_prefix(&self.ctx.device, &self.staging_buffer, bytes)?;

        let limit = pending.count.min(self.mirror.count());
        for (i, gp) in particles.iter().enumerate().take(limit) {
            if !self.spawned_since_dispatch.contains(&i) {
                self.mirror.set(i, &gp.to_particle());
            }
        }
        self.mirror.refresh_highest_active();
        Ok(self.mirror.active_count())
    }

    fn upload_slots(&self, slots: &[usize]) {
        for (first, len) in slot_runs(slots) {
            let data: Vec<GpuParticle> = (first..first + len)
                .map(|i| GpuParticle::from(&self.mirror.get(i)))
                .collect();
            let offset = (first * size_of::<GpuParticle>()) as u64;
            self.ctx
                .queue
                .write_buffer(&self.particle_buffer, offset, bytemuck::cast_slice(&data));
        }
    }
}

fn bind_field(
    ctx: &GpuContext,
    layout: &wgpu::BindGroupLayout,
    particle_buffer: &wgpu::Buffer,
    params_buffer: &wgpu::Buffer,
    field: &DistanceField,
) -> Result<FieldBinding, GpuError> {
    ctx.check_storage_size("distance field", std::mem::size_of_val(field.distances()) as u64)?;
    ctx.validated(|device| {
        let grid_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Field Grid"),
            contents: bytemuck::bytes_of(&FieldGridGpu::new(field.grid())),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let distance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Field Distances"),
            contents: bytemuck::cast_slice(field.distances()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: particle_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: grid_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: distance_buffer.as_entire_binding(),
                },
            ],
        });
        FieldBinding {
            grid_buffer,
            distance_buffer,
            bind_group,
        }
    })
}

impl ComputeBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GpuCompute
    }

    fn capacity(&self) -> usize {
        self.mirror.capacity()
    }

    fn spawn(&mut self, batch: &SpawnBatch) -> usize {
        let slots = self.mirror.spawn_slots(batch);
        self.upload_slots(&slots);
        self.spawned_since_dispatch.extend(slots.iter().copied());
        slots.len()
    }

    fn update(&mut self, dt: f32, time: f32) -> Result<usize, BackendError> {
        let pending = self.dispatch(dt, time);
        self.resolve(pending)
    }

    fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        self.mirror.copy_to_render_buffers(positions, states)
    }

    fn reset(&mut self) {
        let used = self.mirror.count();
        self.mirror.reset();
        self.generation += 1;
        self.frame = 0;
        self.spawned_since_dispatch.clear();
        if used > 0 {
            let cleared = vec![GpuParticle::inactive(); used];
            self.ctx
                .queue
                .write_buffer(&self.particle_buffer, 0, bytemuck::cast_slice(&cleared));
        }
    }

    fn count_in_contact(&self) -> usize {
        self.mirror.count_in_contact()
    }

    fn replace_field(&mut self, field: Arc<DistanceField>) -> Result<(), BackendError> {
        let binding = bind_field(&self.ctx, &self.layout, &self.particle_buffer, &self.params_buffer, &field)?;
        log::debug!(
            "GPU backend field replaced: {} -> {} voxels",
            self.binding.distance_buffer.size() / 4,
            binding.distance_buffer.size() / 4
        );
        self.binding.grid_buffer.destroy();
        self.binding.distance_buffer.destroy();
        self.binding = binding;
        self.field = field;
        Ok(())
    }
}
