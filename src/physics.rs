//! Per-particle state machine.
//!
//! ```text
//!            impact, !bounce           stick time elapsed
//! FALLING ───────────────────► STUCK ─────────────────────► DRIPPING ──► INACTIVE
//!    │                           │ (StuckExit::Slide)          ▲
//!    │ impact, bounce            └──────────► SLIDING ─────────┘
//!    ▼
//! BOUNCING ─────────────────────────────────────────────────────────────► INACTIVE
//! ```
//!
//! Falling particles below `removal_y` or behind `removal_z` go straight to
//! INACTIVE. Every CPU backend runs [`step_particles`]; the GPU kernel is a
//! line-by-line port of [`step_particle`].
//!
//! Front-face gating is an approximation: it rejects impacts whose normal
//! does not face the configured front axis or that happen too deep behind
//! the mesh's front plane. It suppresses most false hits inside gaps between
//! glyphs but guarantees nothing.

use glam::Vec3;

use crate::config::{SplashConfig, StuckExit};
use crate::field::DistanceField;
use crate::particles::{Particle, ParticleSlicesMut, ParticleState};
use crate::rng::SplashRng;

/// Everything one update step needs besides the particles.
pub struct StepContext<'a> {
    pub config: &'a SplashConfig,
    pub field: &'a DistanceField,
    pub dt: f32,
    pub time: f32,
    front_axis: Vec3,
    front_plane: f32,
}

impl<'a> StepContext<'a> {
    pub fn new(config: &'a SplashConfig, field: &'a DistanceField, dt: f32, time: f32) -> Self {
        let front_axis = config.front_direction();
        Self {
            config,
            field,
            dt,
            time,
            front_axis,
            front_plane: field.mesh_bounds().max_along(front_axis),
        }
    }

    /// Whether an impact at `pos` with surface normal `normal` counts.
    pub fn accepts_impact(&self, pos: Vec3, normal: Vec3) -> bool {
        if !self.config.front_gating {
            return true;
        }
        normal.dot(self.front_axis) > self.config.front_normal_min
            && pos.dot(self.front_axis) >= self.front_plane - self.config.front_band
    }

    /// Drag factor for a per-60Hz-frame coefficient over this step.
    #[inline]
    fn drag(&self, per_frame: f32) -> f32 {
        per_frame.powf(self.dt * 60.0)
    }

    #[inline]
    fn shrink(&self, rate: f32) -> f32 {
        (1.0 - rate * self.dt).max(0.0)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Advance one particle by `ctx.dt`. Returns whether it is still active.
pub fn step_particle<R: SplashRng + ?Sized>(p: &mut Particle, ctx: &StepContext, rng: &mut R) -> bool {
    match p.state {
        ParticleState::Inactive => return false,
        ParticleState::Falling => step_falling(p, ctx, rng),
        ParticleState::Bouncing => step_airborne(p, ctx, ctx.config.bounce_drag, ctx.config.bounce_shrink_rate),
        ParticleState::Dripping => step_airborne(p, ctx, ctx.config.drip_drag, ctx.config.drip_shrink_rate),
        ParticleState::Stuck => step_stuck(p, ctx),
        ParticleState::Sliding => step_sliding(p, ctx),
    }
    p.state.is_active()
}

/// Advance every active particle in `particles`. Returns the active count.
pub fn step_particles<R: SplashRng + ?Sized>(
    particles: &mut ParticleSlicesMut<'_>,
    ctx: &StepContext,
    rng: &mut R,
) -> usize {
    let mut active = 0;
    for i in 0..particles.len() {
        if !particles.is_active(i) {
            continue;
        }
        let mut p = particles.get(i);
        if step_particle(&mut p, ctx, rng) {
            active += 1;
        }
        particles.set(i, &p);
    }
    active
}

fn step_falling<R: SplashRng + ?Sized>(p: &mut Particle, ctx: &StepContext, rng: &mut R) {
    let c = ctx.config;
    p.velocity.y -= c.gravity * ctx.dt;
    p.position += p.velocity * ctx.dt;

    if p.position.y < c.removal_y || p.position.z < c.removal_z {
        p.deactivate();
        return;
    }

    let d = ctx.field.sample(p.position);
    if d >= c.impact_threshold {
        return;
    }
    let normal = ctx.field.gradient(p.position);
    if !ctx.accepts_impact(p.position, normal) {
        return;
    }

    p.position += normal * (c.surface_offset - d);
    if rng.chance(c.bounce_chance) {
        bounce(p, normal, ctx, rng);
    } else {
        p.state = ParticleState::Stuck;
        p.velocity = Vec3::ZERO;
        p.stick_timer = 0.0;
    }
}

fn bounce<R: SplashRng + ?Sized>(p: &mut Particle, normal: Vec3, ctx: &StepContext, rng: &mut R) {
    let c = ctx.config;
    let speed = p.velocity.length();
    let alignment = p.velocity.normalize_or_zero().dot(normal).abs();
    let restitution =
        rng.range(c.restitution_min, c.restitution_max) * (1.0 - c.restitution_alignment_falloff * alignment);

    let reflected = p.velocity - 2.0 * p.velocity.dot(normal) * normal;
    let spray = rng.tangent(normal) * rng.range(0.0, c.spray_speed);
    let scatter = Vec3::Y * rng.range(0.0, c.spray_upward);
    p.velocity = reflected * restitution + spray + scatter;

    let shrink = (rng.range(c.bounce_shrink_min, c.bounce_shrink_max) - speed * c.bounce_shrink_speed_factor)
        .clamp(0.2, 1.0);
    p.size *= shrink;
    p.state = ParticleState::Bouncing;
    p.stick_timer = 0.0;
}

/// Shared by BOUNCING and DRIPPING: ballistic flight with lateral drag.
fn step_airborne(p: &mut Particle, ctx: &StepContext, drag: f32, shrink_rate: f32) {
    let c = ctx.config;
    p.velocity.y -= c.gravity * ctx.dt;
    let k = ctx.drag(drag);
    p.velocity.x *= k;
    p.velocity.z *= k;
    p.position += p.velocity * ctx.dt;
    p.size *= ctx.shrink(shrink_rate);
    p.stick_timer += ctx.dt;

    if p.position.y < c.removal_y || p.size < c.min_size {
        p.deactivate();
    }
}

fn step_stuck(p: &mut Particle, ctx: &StepContext) {
    let c = ctx.config;
    p.stick_timer += ctx.dt;

    // Apply the change in a bounded oscillation so stuck drops never drift.
    if c.jitter_amount > 0.0 {
        let phase = p.position.y * 37.0;
        let now = ctx.time * c.jitter_speed + phase;
        let before = (ctx.time - ctx.dt) * c.jitter_speed + phase;
        p.position.x += c.jitter_amount * (now.sin() - before.sin());
        p.position.z += c.jitter_amount * (now.cos() - before.cos());
    }

    let hold = lerp(c.stick_duration_min, c.stick_duration_max, p.slide_speed);
    if p.stick_timer <= hold {
        return;
    }
    p.stick_timer = 0.0;
    p.velocity = Vec3::new(0.0, -c.drip_initial_speed, 0.0);
    p.state = match c.stuck_exit {
        StuckExit::Drip => ParticleState::Dripping,
        StuckExit::Slide => ParticleState::Sliding,
    };
}

fn step_sliding(p: &mut Particle, ctx: &StepContext) {
    let c = ctx.config;
    p.stick_timer += ctx.dt;

    let normal = ctx.field.gradient(p.position);
    let g = Vec3::new(0.0, -c.gravity, 0.0);
    let dir = (g - normal * g.dot(normal)).try_normalize().unwrap_or(Vec3::NEG_Y);
    p.velocity = dir * lerp(c.slide_speed_min, c.slide_speed_max, p.slide_speed);
    p.position += p.velocity * ctx.dt;

    if p.position.y < c.removal_y {
        p.deactivate();
        return;
    }

    let d = ctx.field.sample(p.position);
    let off_surface = d > c.leave_surface_threshold;
    let past_bottom = p.position.y <= ctx.field.mesh_bounds().min.y;
    if off_surface || past_bottom || p.stick_timer > c.slide_duration_max {
        p.state = ParticleState::Dripping;
        p.stick_timer = 0.0;
        p.velocity.y = p.velocity.y.min(-c.drip_initial_speed);
    } else if d < c.resnap_threshold {
        p.position += normal * (c.surface_offset - d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldGrid;
    use crate::mesh::Aabb;
    use crate::rng::seeded_rng;

    /// Distance to the plane y = 0 over [-2, 2]³.
    fn floor_field() -> DistanceField {
        let grid = FieldGrid::new(Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0)), 64);
        let mut distances = vec![0.0; grid.total_voxels()];
        for z in 0..64 {
            for y in 0..64 {
                for x in 0..64 {
                    distances[grid.index(x, y, z)] = grid.voxel_center(x, y, z).y.abs();
                }
            }
        }
        let mesh = Aabb::new(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0));
        DistanceField::new(grid, mesh, distances).unwrap()
    }

    fn floor_config() -> SplashConfig {
        let mut config = SplashConfig::default()
            .with_front_axis(Vec3::Y)
            .with_jitter(0.0, 0.0)
            .with_seed(1);
        // Above the half-voxel plateau the floor field has next to the plane.
        config.surface_offset = 0.04;
        config
    }

    fn falling_at(y: f32) -> Particle {
        Particle::falling(Vec3::new(0.1, y, 0.2), Vec3::new(0.0, -1.0, 0.0), 0.05, 0.5)
    }

    /// Step until the state changes or `max_steps` pass.
    fn run_until_change(p: &mut Particle, ctx: &StepContext, max_steps: usize) -> usize {
        let mut rng = seeded_rng(Some(9));
        let start = p.state;
        for step in 1..=max_steps {
            step_particle(p, ctx, &mut rng);
            if p.state != start {
                return step;
            }
        }
        max_steps
    }

    // ========== Falling Tests ==========

    #[test]
    fn test_falling_integrates_gravity() {
        let field = floor_field();
        let config = floor_config();
        let ctx = StepContext::new(&config, &field, 0.1, 0.0);
        let mut p = falling_at(1.5);
        let mut rng = seeded_rng(Some(1));
        assert!(step_particle(&mut p, &ctx, &mut rng));
        assert!((p.velocity.y - (-1.0 - 0.98)).abs() < 1e-5);
        assert!((p.position.y - (1.5 + p.velocity.y * 0.1)).abs() < 1e-5);
        assert_eq!(p.state, ParticleState::Falling);
    }

    #[test]
    fn test_falling_sticks_without_bounce() {
        let field = floor_field();
        let config = floor_config().with_bounce_chance(0.0);
        let ctx = StepContext::new(&config, &field, 1.0 / 120.0, 0.0);
        let mut p = falling_at(0.5);
        run_until_change(&mut p, &ctx, 500);
        assert_eq!(p.state, ParticleState::Stuck);
        assert_eq!(p.velocity, Vec3::ZERO);
        assert!((field.sample(p.position) - config.surface_offset).abs() < 0.01);
    }

    #[test]
    fn test_falling_bounces_with_full_chance() {
        let field = floor_field();
        let config = floor_config().with_bounce_chance(1.0);
        let ctx = StepContext::new(&config, &field, 1.0 / 120.0, 0.0);
        let mut p = falling_at(0.5);
        run_until_change(&mut p, &ctx, 500);
        assert_eq!(p.state, ParticleState::Bouncing);
        assert!(p.velocity.y > 0.0);
        assert!(p.size < 0.05 && p.size >= 0.05 * 0.2);
    }

    #[test]
    fn test_front_gating_rejects_back_face() {
        let field = floor_field();
        let config = floor_config().with_bounce_chance(0.0);
        let ctx = StepContext::new(&config, &field, 1.0 / 120.0, 0.0);
        // Below the plane the normal points down, away from the front axis.
        let mut p = Particle::falling(Vec3::new(0.0, -0.03, 0.0), Vec3::ZERO, 0.05, 0.5);
        let mut rng = seeded_rng(Some(1));
        step_particle(&mut p, &ctx, &mut rng);
        assert_eq!(p.state, ParticleState::Falling);

        let ungated = floor_config().with_bounce_chance(0.0).with_front_gating(false);
        let ctx = StepContext::new(&ungated, &field, 1.0 / 120.0, 0.0);
        let mut p = Particle::falling(Vec3::new(0.0, -0.03, 0.0), Vec3::ZERO, 0.05, 0.5);
        step_particle(&mut p, &ctx, &mut rng);
        assert_eq!(p.state, ParticleState::Stuck);
    }

    #[test]
    fn test_below_removal_deactivates() {
        let field = floor_field();
        let config = floor_config().with_removal(-1.0, -10.0);
        let ctx = StepContext::new(&config, &field, 1.0 / 60.0, 0.0);
        let mut p = falling_at(-3.0);
        let mut rng = seeded_rng(Some(1));
        assert!(!step_particle(&mut p, &ctx, &mut rng));
        assert_eq!(p.state, ParticleState::Inactive);
        assert_eq!(p.size, 0.0);
    }

    #[test]
    fn test_behind_removal_z_deactivates() {
        let field = floor_field();
        let config = floor_config().with_removal(-10.0, -1.0);
        let ctx = StepContext::new(&config, &field, 1.0 / 60.0, 0.0);
        let mut p = Particle::falling(Vec3::new(0.0, 1.0, -1.5), Vec3::ZERO, 0.05, 0.5);
        let mut rng = seeded_rng(Some(1));
        assert!(!step_particle(&mut p, &ctx, &mut rng));
    }

    // ========== Stuck / Slide / Drip Tests ==========

    fn stuck_at(y: f32, seed: f32) -> Particle {
        Particle {
            position: Vec3::new(0.0, y, 0.0),
            velocity: Vec3::ZERO,
            state: ParticleState::Stuck,
            size: 0.05,
            stick_timer: 0.0,
            slide_speed: seed,
        }
    }

    #[test]
    fn test_stuck_holds_for_interpolated_duration() {
        let field = floor_field();
        let mut config = floor_config();
        config.stick_duration_min = 0.2;
        config.stick_duration_max = 0.6;
        let dt = 0.01;
        let ctx = StepContext::new(&config, &field, dt, 0.0);
        let mut p = stuck_at(0.02, 0.5);
        let steps = run_until_change(&mut p, &ctx, 1000);
        // lerp(0.2, 0.6, 0.5) = 0.4 s
        assert!((40..=42).contains(&steps), "steps = {}", steps);
        assert_eq!(p.state, ParticleState::Dripping);
        assert!(p.velocity.y < 0.0);
    }

    #[test]
    fn test_stuck_exit_to_slide() {
        let field = floor_field();
        let config = floor_config().with_stuck_exit(StuckExit::Slide);
        let ctx = StepContext::new(&config, &field, 0.05, 0.0);
        let mut p = stuck_at(0.02, 0.0);
        run_until_change(&mut p, &ctx, 1000);
        assert_eq!(p.state, ParticleState::Sliding);
    }

    #[test]
    fn test_stuck_jitter_is_bounded() {
        let field = floor_field();
        let mut config = floor_config().with_jitter(0.01, 8.0);
        config.stick_duration_min = 100.0;
        config.stick_duration_max = 100.0;
        let start = stuck_at(0.02, 0.5);
        let mut p = start;
        let mut rng = seeded_rng(Some(1));
        for i in 1..2000 {
            let ctx = StepContext::new(&config, &field, 1.0 / 60.0, i as f32 / 60.0);
            step_particle(&mut p, &ctx, &mut rng);
            assert!((p.position.x - start.position.x).abs() <= 0.021);
            assert!((p.position.z - start.position.z).abs() <= 0.021);
        }
        assert_eq!(p.position.y, start.position.y);
    }

    #[test]
    fn test_sliding_on_flat_floor_drips_at_max_duration() {
        // Gravity is normal to a floor, so the slide direction degenerates and
        // the particle leaves through the duration limit or the bottom bound.
        let field = floor_field();
        let config = floor_config();
        let ctx = StepContext::new(&config, &field, 0.01, 0.0);
        let mut p = stuck_at(0.02, 0.5);
        p.state = ParticleState::Sliding;
        run_until_change(&mut p, &ctx, 1000);
        assert_eq!(p.state, ParticleState::Dripping);
        assert!(p.velocity.y <= -config.drip_initial_speed);
    }

    #[test]
    fn test_dripping_shrinks_and_deactivates() {
        let field = floor_field();
        let mut config = floor_config();
        config.drip_shrink_rate = 5.0;
        config.min_size = 0.01;
        let ctx = StepContext::new(&config, &field, 1.0 / 60.0, 0.0);
        let mut p = stuck_at(1.0, 0.5);
        p.state = ParticleState::Dripping;
        let mut rng = seeded_rng(Some(1));
        let mut last = p.size;
        while step_particle(&mut p, &ctx, &mut rng) {
            assert!(p.size <= last);
            last = p.size;
        }
        assert_eq!(p.state, ParticleState::Inactive);
        assert_eq!(p.size, 0.0);
    }

    #[test]
    fn test_bouncing_drag_only_lateral() {
        let field = floor_field();
        let mut config = floor_config();
        config.gravity = 1e-6;
        config.bounce_drag = 0.5;
        let ctx = StepContext::new(&config, &field, 1.0 / 60.0, 0.0);
        let mut p = stuck_at(1.0, 0.5);
        p.state = ParticleState::Bouncing;
        p.velocity = Vec3::new(1.0, 1.0, 1.0);
        let mut rng = seeded_rng(Some(1));
        step_particle(&mut p, &ctx, &mut rng);
        assert!((p.velocity.x - 0.5).abs() < 1e-5);
        assert!((p.velocity.z - 0.5).abs() < 1e-5);
        assert!((p.velocity.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_inactive_is_skipped() {
        let field = floor_field();
        let config = floor_config();
        let ctx = StepContext::new(&config, &field, 0.1, 0.0);
        let mut p = falling_at(1.0);
        p.deactivate();
        let before = p;
        let mut rng = seeded_rng(Some(1));
        assert!(!step_particle(&mut p, &ctx, &mut rng));
        assert_eq!(p, before);
    }
}
