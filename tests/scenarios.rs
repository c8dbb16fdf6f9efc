//! End-to-end simulation scenarios.
//!
//! Every scenario runs on both CPU backends. The GPU backend, including its
//! split dispatch/resolve step, is exercised only when a compute adapter is
//! present.

use std::sync::Arc;

use glam::Vec3;
use textsplash::backend::{init_backend, Backend, BackendKind, ComputeBackend};
use textsplash::config::{FieldGenConfig, SplashConfig, StuckExit};
use textsplash::emitter::SplashEmitter;
use textsplash::field::DistanceField;
use textsplash::generate::{FieldGenerator, FieldStrategy};
use textsplash::gpu::{GpuBackend, GpuContext};
use textsplash::mesh::{box_triangles, Triangle};
use textsplash::particles::{ParticleState, SpawnBatch};
use textsplash::rng::seeded_rng;

const CPU_BACKENDS: [BackendKind; 2] = [BackendKind::Sequential, BackendKind::SharedMemory];
const DT: f32 = 1.0 / 120.0;

// ============================================================================
// Helpers
// ============================================================================

fn generate(triangles: &[Triangle], resolution: u32, padding: f32) -> DistanceField {
    let config = FieldGenConfig::new(resolution)
        .with_padding(padding)
        .with_strategies(&[FieldStrategy::Sequential]);
    FieldGenerator::new(config)
        .generate(triangles, &|_| {})
        .expect("field generation should succeed")
        .field
}

/// One large horizontal triangle at y = 0.
fn plane_field() -> Arc<DistanceField> {
    let triangle = Triangle::new(
        Vec3::new(-3.0, 0.0, -3.0),
        Vec3::new(3.0, 0.0, -3.0),
        Vec3::new(0.0, 0.0, 4.0),
    );
    Arc::new(generate(&[triangle], 32, 0.5))
}

fn cube_field() -> Arc<DistanceField> {
    Arc::new(generate(&box_triangles(Vec3::splat(-0.5), Vec3::splat(0.5)), 24, 0.4))
}

/// Top faces are the front: drops fall onto them along -Y.
fn top_config() -> SplashConfig {
    let mut config = SplashConfig::default()
        .with_capacity(2_000)
        .with_front_axis(Vec3::Y)
        .with_seed(42)
        .with_worker_threads(4)
        .with_removal(-2.0, -5.0);
    // Above the half-voxel plateau the plane field has next to y = 0.
    config.surface_offset = 0.04;
    config
}

fn cpu_backend(kind: BackendKind, field: &Arc<DistanceField>, config: &SplashConfig) -> Backend {
    init_backend(kind, Arc::clone(field), config, None).expect("CPU backend should initialize")
}

fn gpu_context() -> Option<Arc<GpuContext>> {
    match GpuContext::new() {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(err) => {
            eprintln!("skipping GPU scenario: {}", err);
            None
        }
    }
}

fn gpu_backend(field: &Arc<DistanceField>, config: &SplashConfig) -> Option<GpuBackend> {
    let ctx = gpu_context()?;
    match GpuBackend::new(ctx, Arc::clone(field), config) {
        Ok(backend) => Some(backend),
        Err(err) => {
            eprintln!("skipping GPU scenario: {}", err);
            None
        }
    }
}

struct Snapshot {
    positions: Vec<f32>,
    states: Vec<f32>,
    drawn: usize,
}

impl Snapshot {
    fn take(backend: &impl ComputeBackend) -> Self {
        let n = backend.capacity();
        let mut positions = vec![0.0; n * 3];
        let mut states = vec![0.0; n * 4];
        let drawn = backend.copy_to_render_buffers(&mut positions, &mut states);
        Self {
            positions,
            states,
            drawn,
        }
    }

    /// Slots past the draw range are inactive by definition.
    fn state(&self, i: usize) -> ParticleState {
        if i >= self.drawn {
            return ParticleState::Inactive;
        }
        ParticleState::from_code(self.states[i * 4] as u32).expect("valid state code")
    }

    fn size(&self, i: usize) -> f32 {
        if i >= self.drawn {
            return 0.0;
        }
        self.states[i * 4 + 2]
    }

    fn position(&self, i: usize) -> Vec3 {
        Vec3::new(self.positions[i * 3], self.positions[i * 3 + 1], self.positions[i * 3 + 2])
    }
}

fn drop_above(batch: &mut SpawnBatch, x: f32, y: f32, z: f32) {
    batch.push(Vec3::new(x, y, z), Vec3::new(0.0, -1.0, 0.0), 0.03, 0.5);
}

/// Steps until particle 0 leaves FALLING. Returns the step number.
fn steps_until_impact(backend: &mut impl ComputeBackend, max_steps: usize) -> Option<(usize, usize)> {
    for step in 1..=max_steps {
        let active = backend.update(DT, step as f32 * DT).expect("update");
        if Snapshot::take(&*backend).state(0) != ParticleState::Falling {
            return Some((step, active));
        }
    }
    None
}

// ============================================================================
// Scenario A: a single drop sticks
// ============================================================================

fn check_single_drop_sticks(backend: &mut impl ComputeBackend, field: &DistanceField, config: &SplashConfig) {
    let mut batch = SpawnBatch::default();
    drop_above(&mut batch, 0.0, 0.6, 0.0);
    assert_eq!(backend.spawn(&batch), 1);

    let (steps, active) = steps_until_impact(backend, 240).expect("drop should reach the surface");
    // y(t) = 0.6 - t - 4.9t² reaches the impact threshold after ~0.25 s
    assert!((25..=35).contains(&steps), "impact after {} steps", steps);
    assert_eq!(active, 1);

    let snap = Snapshot::take(&*backend);
    assert_eq!(snap.state(0), ParticleState::Stuck);
    let settled = field.sample(snap.position(0));
    assert!(
        (settled - config.surface_offset).abs() < 0.005,
        "settled at distance {}",
        settled
    );
    assert_eq!(backend.count_in_contact(), 1);

    // Still stuck a few frames later
    for step in 0..10 {
        backend.update(DT, 1.0 + step as f32 * DT).unwrap();
    }
    assert_eq!(backend.count_in_contact(), 1);
}

#[test]
fn test_scenario_a_single_drop_sticks() {
    let field = plane_field();
    let config = top_config().with_bounce_chance(0.0);
    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        check_single_drop_sticks(&mut backend, &field, &config);
    }
}

#[test]
fn test_scenario_a_on_gpu() {
    let Some(ctx) = gpu_context() else {
        return;
    };
    let field = plane_field();
    let config = top_config().with_bounce_chance(0.0);
    let mut backend = match init_backend(BackendKind::GpuCompute, Arc::clone(&field), &config, Some(&ctx)) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("skipping GPU scenario: {}", err);
            return;
        }
    };
    check_single_drop_sticks(&mut backend, &field, &config);
}

// ============================================================================
// Scenario B: every drop bounces
// ============================================================================

fn check_all_drops_bounce(backend: &mut impl ComputeBackend, label: &str) {
    let mut batch = SpawnBatch::with_capacity(1_000);
    for i in 0..1_000 {
        let x = (i % 40) as f32 / 39.0 * 1.4 - 0.7;
        let z = (i / 40) as f32 / 24.0 * 1.4 - 0.7;
        drop_above(&mut batch, x, 0.6, z);
    }
    assert_eq!(backend.spawn(&batch), 1_000);

    let (_, active) = steps_until_impact(backend, 240).expect("drops should reach the surface");
    assert_eq!(active, 1_000, "{}: no drop may vanish on impact", label);

    let snap = Snapshot::take(&*backend);
    for i in 0..1_000 {
        assert_eq!(snap.state(i), ParticleState::Bouncing, "{}: drop {}", label, i);
        assert!(snap.size(i) < 0.03 && snap.size(i) >= 0.03 * 0.2);
    }
    assert_eq!(backend.count_in_contact(), 0);
}

#[test]
fn test_scenario_b_all_drops_bounce() {
    let field = plane_field();
    let config = top_config().with_bounce_chance(1.0);
    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        check_all_drops_bounce(&mut backend, &format!("{:?}", kind));
    }
}

#[test]
fn test_scenario_b_on_gpu() {
    let field = plane_field();
    let config = top_config().with_bounce_chance(1.0);
    let Some(mut backend) = gpu_backend(&field, &config) else {
        return;
    };
    check_all_drops_bounce(&mut backend, "GPU");
}

// ============================================================================
// Scenario C: cube field
// ============================================================================

#[test]
fn test_scenario_c_cube_field_extremes() {
    // Padding 1/7 puts the outermost voxel centres exactly on the faces.
    let field = generate(&box_triangles(Vec3::splat(-1.0), Vec3::splat(1.0)), 8, 1.0 / 7.0);
    let max = field.distances().iter().cloned().fold(f32::MIN, f32::max);

    assert!((field.voxel(3, 3, 3) - max).abs() < 1e-5);
    assert!((field.voxel(4, 4, 4) - max).abs() < 1e-5);
    assert!((max - 6.0 / 7.0).abs() < 1e-4);

    for a in 0..8 {
        for b in 0..8 {
            for v in [
                field.voxel(0, a, b),
                field.voxel(7, a, b),
                field.voxel(a, 0, b),
                field.voxel(a, b, 7),
            ] {
                assert!(v < 1e-4, "boundary voxel at distance {}", v);
            }
        }
    }
}

// ============================================================================
// Lifecycle properties
// ============================================================================

#[test]
fn test_reset_then_spawn_reproduces_initial_state() {
    let field = cube_field();
    let config = top_config().with_bounce_chance(0.5);
    let batch = SplashEmitter::default()
        .with_region(Vec3::new(-0.4, 1.0, -0.4), Vec3::new(0.4, 1.5, 0.4))
        .with_velocity(Vec3::NEG_Y, Vec3::splat(0.2))
        .emit(300, &mut seeded_rng(Some(8)));

    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        backend.spawn(&batch);
        let first = Snapshot::take(&backend);
        for step in 0..60 {
            backend.update(DT, step as f32 * DT).unwrap();
        }

        backend.reset();
        assert_eq!(backend.spawn(&batch), 300);
        let second = Snapshot::take(&backend);

        assert_eq!(first.drawn, 300);
        assert_eq!(second.drawn, first.drawn);
        assert_eq!(second.positions, first.positions);
        assert_eq!(second.states, first.states);
        for i in 0..300 {
            assert_eq!(second.state(i), ParticleState::Falling);
            assert_eq!(second.states[i * 4 + 1], 0.0);
        }
    }
}

#[test]
fn test_active_count_never_exceeds_spawned() {
    let field = cube_field();
    let config = top_config().with_bounce_chance(0.4);
    let emitter = SplashEmitter::default()
        .with_region(Vec3::new(-0.6, 0.8, -0.6), Vec3::new(0.6, 1.2, 0.6))
        .with_velocity(Vec3::NEG_Y, Vec3::splat(0.5));

    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        let mut rng = seeded_rng(Some(4));
        let spawned = backend.spawn(&emitter.emit(800, &mut rng));
        let mut previous = spawned;

        for step in 0..400 {
            let active = backend.update(1.0 / 60.0, step as f32 / 60.0).unwrap();
            assert!(active <= previous, "{:?}: active grew from {} to {}", kind, previous, active);
            previous = active;
        }
        let snap = Snapshot::take(&backend);
        let live = (0..backend.capacity()).filter(|&i| snap.state(i).is_active()).count();
        assert_eq!(live, previous);
    }
}

#[test]
fn test_spawn_overflow_is_truncated() {
    let field = cube_field();
    let config = top_config().with_capacity(100);
    let batch = SplashEmitter::default().emit(250, &mut seeded_rng(Some(1)));
    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        assert_eq!(backend.spawn(&batch), 100);
        assert_eq!(backend.spawn(&batch), 0);
    }
}

fn allowed(from: ParticleState, to: ParticleState) -> bool {
    use ParticleState::*;
    from == to
        || matches!(
            (from, to),
            (Falling, Stuck)
                | (Falling, Bouncing)
                | (Falling, Inactive)
                | (Stuck, Dripping)
                | (Stuck, Sliding)
                | (Sliding, Dripping)
                | (Sliding, Inactive)
                | (Dripping, Inactive)
                | (Bouncing, Inactive)
        )
}

fn transition_emitter() -> SplashEmitter {
    SplashEmitter::default()
        .with_region(Vec3::new(-0.45, 0.8, -0.45), Vec3::new(0.45, 1.4, 0.45))
        .with_velocity(Vec3::NEG_Y, Vec3::splat(0.3))
}

fn check_legal_transitions(backend: &mut impl ComputeBackend, label: &str) {
    let spawned = backend.spawn(&transition_emitter().emit(400, &mut seeded_rng(Some(21))));
    let mut before = Snapshot::take(&*backend);
    let mut seen_contact = false;

    for step in 0..480 {
        backend.update(1.0 / 60.0, step as f32 / 60.0).unwrap();
        let after = Snapshot::take(&*backend);
        for i in 0..spawned {
            let (from, to) = (before.state(i), after.state(i));
            assert!(allowed(from, to), "{}: {:?} -> {:?}", label, from, to);
            if to == ParticleState::Inactive {
                assert_eq!(after.size(i), 0.0);
            }
            seen_contact |= to.in_contact();
        }
        before = after;
    }
    assert!(seen_contact, "{}: no drop ever stuck", label);
}

#[test]
fn test_state_machine_transitions_are_legal() {
    let field = cube_field();
    for exit in [StuckExit::Drip, StuckExit::Slide] {
        let config = top_config().with_bounce_chance(0.3).with_stuck_exit(exit);
        for kind in CPU_BACKENDS {
            let mut backend = cpu_backend(kind, &field, &config);
            check_legal_transitions(&mut backend, &format!("{:?}/{:?}", kind, exit));
        }
    }
}

#[test]
fn test_state_machine_transitions_are_legal_on_gpu() {
    let field = cube_field();
    for exit in [StuckExit::Drip, StuckExit::Slide] {
        let config = top_config().with_bounce_chance(0.3).with_stuck_exit(exit);
        let Some(mut backend) = gpu_backend(&field, &config) else {
            return;
        };
        check_legal_transitions(&mut backend, &format!("GPU/{:?}", exit));
    }
}

#[test]
fn test_spawn_below_removal_is_deactivated_immediately() {
    let field = cube_field();
    let config = top_config();
    for kind in CPU_BACKENDS {
        let mut backend = cpu_backend(kind, &field, &config);
        let mut batch = SpawnBatch::default();
        drop_above(&mut batch, 0.0, config.removal_y - 1.0, 0.0);
        drop_above(&mut batch, 0.1, config.removal_y - 0.5, 0.0);
        assert_eq!(backend.spawn(&batch), 2);
        assert_eq!(backend.update(DT, 0.0).unwrap(), 0);

        let snap = Snapshot::take(&backend);
        assert_eq!(snap.drawn, 0);
    }
}

// ============================================================================
// Backend equivalence
// ============================================================================

#[test]
fn test_cpu_backends_agree_without_randomness() {
    let field = cube_field();
    // No bounces: no random draw changes the outcome.
    let config = top_config().with_bounce_chance(0.0).with_stuck_exit(StuckExit::Slide);
    let batch = SplashEmitter::default()
        .with_region(Vec3::new(-0.5, 0.8, -0.5), Vec3::new(0.5, 1.2, 0.5))
        .with_velocity(Vec3::NEG_Y, Vec3::splat(0.2))
        .emit(500, &mut seeded_rng(Some(13)));

    let mut sequential = cpu_backend(BackendKind::Sequential, &field, &config);
    let mut shared = cpu_backend(BackendKind::SharedMemory, &field, &config);
    sequential.spawn(&batch);
    shared.spawn(&batch);

    for step in 0..300 {
        let time = step as f32 / 60.0;
        let a = sequential.update(1.0 / 60.0, time).unwrap();
        let b = shared.update(1.0 / 60.0, time).unwrap();
        assert_eq!(a, b);
    }
    let (a, b) = (Snapshot::take(&sequential), Snapshot::take(&shared));
    assert_eq!(a.drawn, b.drawn);
    assert_eq!(a.positions, b.positions);
    assert_eq!(a.states, b.states);
    assert_eq!(sequential.count_in_contact(), shared.count_in_contact());
}

// ============================================================================
// GPU two-phase step
// ============================================================================

#[test]
fn test_gpu_spawn_between_dispatch_and_resolve_survives() {
    let field = plane_field();
    let config = top_config().with_capacity(2).with_bounce_chance(0.0);
    let Some(mut gpu) = gpu_backend(&field, &config) else {
        return;
    };

    // Slot 1 starts below the removal plane so the first step frees it.
    let mut batch = SpawnBatch::default();
    drop_above(&mut batch, 0.0, 0.6, 0.0);
    drop_above(&mut batch, 0.3, config.removal_y - 1.0, 0.0);
    assert_eq!(gpu.spawn(&batch), 2);
    assert_eq!(gpu.update(DT, DT).unwrap(), 1);
    assert_eq!(gpu.mirror().state(1), ParticleState::Inactive);

    let pending = gpu.dispatch(DT, 2.0 * DT);
    let fresh = Vec3::new(-0.3, 0.9, 0.2);
    let mut late = SpawnBatch::default();
    late.push(fresh, Vec3::new(0.0, -1.0, 0.0), 0.03, 0.5);
    assert_eq!(gpu.spawn(&late), 1);
    assert_eq!(gpu.resolve(pending).unwrap(), 2);

    // The readback of the freed slot must not overwrite the new drop.
    let p = gpu.mirror().get(1);
    assert_eq!(p.state, ParticleState::Falling);
    assert_eq!(p.position, fresh);
    assert!(gpu.mirror().get(0).position.y < 0.6);

    // The upload reached the device: the next step moves it.
    assert_eq!(gpu.update(DT, 3.0 * DT).unwrap(), 2);
    let p = gpu.mirror().get(1);
    assert_eq!(p.state, ParticleState::Falling);
    assert!(p.position.y < fresh.y);
}

#[test]
fn test_gpu_reset_discards_in_flight_step() {
    let field = plane_field();
    let config = top_config().with_capacity(200);
    let Some(mut gpu) = gpu_backend(&field, &config) else {
        return;
    };
    let batch = SplashEmitter::default()
        .with_region(Vec3::new(-0.5, 1.0, -0.5), Vec3::new(0.5, 1.5, 0.5))
        .with_velocity(Vec3::NEG_Y, Vec3::splat(0.1))
        .emit(50, &mut seeded_rng(Some(6)));

    assert_eq!(gpu.spawn(&batch), 50);
    let initial = Snapshot::take(&gpu);
    for step in 1..=5 {
        gpu.update(DT, step as f32 * DT).unwrap();
    }

    let pending = gpu.dispatch(DT, 6.0 * DT);
    gpu.reset();
    assert_eq!(gpu.resolve(pending).unwrap(), 0);
    assert_eq!(gpu.mirror().count(), 0);
    assert_eq!(gpu.mirror().active_count(), 0);
    assert_eq!(Snapshot::take(&gpu).drawn, 0);

    assert_eq!(gpu.spawn(&batch), 50);
    let respawned = Snapshot::take(&gpu);
    assert_eq!(respawned.positions, initial.positions);
    assert_eq!(respawned.states, initial.states);
    assert_eq!(gpu.update(DT, DT).unwrap(), 50);
}
