//! Structure-of-arrays particle storage.
//!
//! Every particle attribute lives in its own pre-allocated array so the
//! update loop walks contiguous memory. Slots are never freed; an INACTIVE
//! slot (size 0) is simply overwritten by a later spawn.
//!
//! `count` is a high-water mark, not a live count: slots below it may be
//! INACTIVE between active ones. `highest_active` bounds the range the
//! renderer has to copy.

use glam::Vec3;

/// Lifecycle state of one particle.
///
/// The discriminants are the wire values in render buffers and GPU memory.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParticleState {
    Falling = 0,
    Stuck = 1,
    Sliding = 2,
    Dripping = 3,
    Inactive = 4,
    Bouncing = 5,
}

impl ParticleState {
    pub const ALL: [ParticleState; 6] = [
        ParticleState::Falling,
        ParticleState::Stuck,
        ParticleState::Sliding,
        ParticleState::Dripping,
        ParticleState::Inactive,
        ParticleState::Bouncing,
    ];

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    #[inline]
    pub fn is_active(self) -> bool {
        self != ParticleState::Inactive
    }

    /// Stuck to or sliding along the surface.
    #[inline]
    pub fn in_contact(self) -> bool {
        matches!(self, ParticleState::Stuck | ParticleState::Sliding)
    }
}

/// One particle, unpacked from the arrays for a single update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub state: ParticleState,
    pub size: f32,
    /// Time spent in the current state (seconds).
    pub stick_timer: f32,
    /// Per-particle seed in `[0, 1]` that staggers state timing.
    pub slide_speed: f32,
}

impl Particle {
    /// A freshly spawned, falling particle.
    pub fn falling(position: Vec3, velocity: Vec3, size: f32, slide_speed: f32) -> Self {
        Self {
            position,
            velocity,
            state: ParticleState::Falling,
            size,
            stick_timer: 0.0,
            slide_speed,
        }
    }

    pub fn deactivate(&mut self) {
        self.state = ParticleState::Inactive;
        self.size = 0.0;
        self.velocity = Vec3::ZERO;
    }
}

/// A group of particles to inject.
///
/// Only the shortest common prefix of the four arrays is spawned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpawnBatch {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub sizes: Vec<f32>,
    pub slide_speeds: Vec<f32>,
}

impl SpawnBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n),
            velocities: Vec::with_capacity(n),
            sizes: Vec::with_capacity(n),
            slide_speeds: Vec::with_capacity(n),
        }
    }

    /// Build from flat buffers (`positions`/`velocities` hold 3 floats each).
    pub fn from_flat(positions: &[f32], velocities: &[f32], sizes: &[f32], slide_speeds: &[f32]) -> Self {
        let to_vec3 = |flat: &[f32]| -> Vec<Vec3> {
            flat.chunks_exact(3).map(|c| Vec3::new(c[0], c[1], c[2])).collect()
        };
        Self {
            positions: to_vec3(positions),
            velocities: to_vec3(velocities),
            sizes: sizes.to_vec(),
            slide_speeds: slide_speeds.to_vec(),
        }
    }

    pub fn push(&mut self, position: Vec3, velocity: Vec3, size: f32, slide_speed: f32) {
        self.positions.push(position);
        self.velocities.push(velocity);
        self.sizes.push(size);
        self.slide_speeds.push(slide_speed);
    }

    /// Number of complete particles in the batch.
    pub fn len(&self) -> usize {
        self.positions
            .len()
            .min(self.velocities.len())
            .min(self.sizes.len())
            .min(self.slide_speeds.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn particle(&self, i: usize) -> Particle {
        Particle::falling(self.positions[i], self.velocities[i], self.sizes[i], self.slide_speeds[i])
    }
}

/// Slot bookkeeping shared by every backend.
///
/// Fresh slots above the high-water mark are handed out first. Once the
/// mark reaches capacity a wrapping cursor looks for INACTIVE slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotAllocator {
    capacity: usize,
    count: usize,
    cursor: usize,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            count: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// High-water mark.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Next writable slot, or `None` when every slot holds an active particle.
    pub fn next_slot(&mut self, is_free: impl Fn(usize) -> bool) -> Option<usize> {
        if self.count < self.capacity {
            let slot = self.count;
            self.count += 1;
            return Some(slot);
        }
        for _ in 0..self.capacity {
            let slot = self.cursor;
            self.cursor = (self.cursor + 1) % self.capacity;
            if is_free(slot) {
                return Some(slot);
            }
        }
        None
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.cursor = 0;
    }
}

/// Pre-allocated particle arrays.
pub struct ParticleStore {
    pos_x: Vec<f32>,
    pos_y: Vec<f32>,
    pos_z: Vec<f32>,
    vel_x: Vec<f32>,
    vel_y: Vec<f32>,
    vel_z: Vec<f32>,
    state: Vec<u8>,
    size: Vec<f32>,
    stick_timer: Vec<f32>,
    slide_speed: Vec<f32>,
    slots: SlotAllocator,
    highest_active: Option<usize>,
}

impl ParticleStore {
    /// Allocate `capacity` INACTIVE slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            pos_x: vec![0.0; capacity],
            pos_y: vec![0.0; capacity],
            pos_z: vec![0.0; capacity],
            vel_x: vec![0.0; capacity],
            vel_y: vec![0.0; capacity],
            vel_z: vec![0.0; capacity],
            state: vec![ParticleState::Inactive as u8; capacity],
            size: vec![0.0; capacity],
            stick_timer: vec![0.0; capacity],
            slide_speed: vec![0.0; capacity],
            slots: SlotAllocator::new(capacity),
            highest_active: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// High-water mark: every slot at or above it is INACTIVE.
    pub fn count(&self) -> usize {
        self.slots.count()
    }

    pub fn highest_active(&self) -> Option<usize> {
        self.highest_active
    }

    pub fn state(&self, i: usize) -> ParticleState {
        ParticleState::from_code(self.state[i] as u32).unwrap_or(ParticleState::Inactive)
    }

    pub fn get(&self, i: usize) -> Particle {
        Particle {
            position: Vec3::new(self.pos_x[i], self.pos_y[i], self.pos_z[i]),
            velocity: Vec3::new(self.vel_x[i], self.vel_y[i], self.vel_z[i]),
            state: self.state(i),
            size: self.size[i],
            stick_timer: self.stick_timer[i],
            slide_speed: self.slide_speed[i],
        }
    }

    pub fn set(&mut self, i: usize, p: &Particle) {
        self.pos_x[i] = p.position.x;
        self.pos_y[i] = p.position.y;
        self.pos_z[i] = p.position.z;
        self.vel_x[i] = p.velocity.x;
        self.vel_y[i] = p.velocity.y;
        self.vel_z[i] = p.velocity.z;
        self.state[i] = p.state as u8;
        self.size[i] = p.size;
        self.stick_timer[i] = p.stick_timer;
        self.slide_speed[i] = p.slide_speed;
    }

    /// Write a batch into free slots. Returns how many were admitted; the
    /// rest are dropped once no slot is free.
    pub fn spawn(&mut self, batch: &SpawnBatch) -> usize {
        self.spawn_slots(batch).len()
    }

    /// Like [`spawn`](Self::spawn), but returns the slots written, in order.
    pub fn spawn_slots(&mut self, batch: &SpawnBatch) -> Vec<usize> {
        let mut written = Vec::with_capacity(batch.len());
        for i in 0..batch.len() {
            let state = &self.state;
            let Some(slot) = self.slots.next_slot(|s| state[s] == ParticleState::Inactive as u8) else {
                break;
            };
            self.set(slot, &batch.particle(i));
            self.highest_active = Some(self.highest_active.map_or(slot, |h| h.max(slot)));
            written.push(slot);
        }
        written
    }

    /// Deactivate everything and rewind the slot allocator.
    pub fn reset(&mut self) {
        let n = self.count();
        self.state[..n].fill(ParticleState::Inactive as u8);
        self.size[..n].fill(0.0);
        self.vel_x[..n].fill(0.0);
        self.vel_y[..n].fill(0.0);
        self.vel_z[..n].fill(0.0);
        self.stick_timer[..n].fill(0.0);
        self.slots.reset();
        self.highest_active = None;
    }

    /// Mutable views of `[0, count)` for the update pass.
    pub fn slices_mut(&mut self) -> ParticleSlicesMut<'_> {
        let n = self.slots.count();
        ParticleSlicesMut {
            pos_x: &mut self.pos_x[..n],
            pos_y: &mut self.pos_y[..n],
            pos_z: &mut self.pos_z[..n],
            vel_x: &mut self.vel_x[..n],
            vel_y: &mut self.vel_y[..n],
            vel_z: &mut self.vel_z[..n],
            state: &mut self.state[..n],
            size: &mut self.size[..n],
            stick_timer: &mut self.stick_timer[..n],
            slide_speed: &mut self.slide_speed[..n],
        }
    }

    /// Rescan for the highest active slot after an update.
    pub fn refresh_highest_active(&mut self) {
        let inactive = ParticleState::Inactive as u8;
        self.highest_active = self.state[..self.count()].iter().rposition(|&s| s != inactive);
    }

    pub fn active_count(&self) -> usize {
        let inactive = ParticleState::Inactive as u8;
        self.state[..self.count()].iter().filter(|&&s| s != inactive).count()
    }

    pub fn count_in_contact(&self) -> usize {
        let stuck = ParticleState::Stuck as u8;
        let sliding = ParticleState::Sliding as u8;
        self.state[..self.count()]
            .iter()
            .filter(|&&s| s == stuck || s == sliding)
            .count()
    }

    /// Copy `[0, highest_active]` into render buffers.
    ///
    /// `positions` receives 3 floats per particle and `states` 4
    /// (state, stick timer, size, slide speed). Returns the number of
    /// particles written, which is the draw range.
    pub fn copy_to_render_buffers(&self, positions: &mut [f32], states: &mut [f32]) -> usize {
        let n = self
            .highest_active
            .map_or(0, |h| h + 1)
            .min(positions.len() / 3)
            .min(states.len() / 4);
        for i in 0..n {
            positions[i * 3] = self.pos_x[i];
            positions[i * 3 + 1] = self.pos_y[i];
            positions[i * 3 + 2] = self.pos_z[i];
            states[i * 4] = self.state[i] as f32;
            states[i * 4 + 1] = self.stick_timer[i];
            states[i * 4 + 2] = self.size[i];
            states[i * 4 + 3] = self.slide_speed[i];
        }
        n
    }
}

/// Disjoint mutable views of the particle arrays.
///
/// Split with [`split_at`](Self::split_at) to hand each worker its own
/// contiguous index range.
pub struct ParticleSlicesMut<'a> {
    pos_x: &'a mut [f32],
    pos_y: &'a mut [f32],
    pos_z: &'a mut [f32],
    vel_x: &'a mut [f32],
    vel_y: &'a mut [f32],
    vel_z: &'a mut [f32],
    state: &'a mut [u8],
    size: &'a mut [f32],
    stick_timer: &'a mut [f32],
    slide_speed: &'a mut [f32],
}

impl<'a> ParticleSlicesMut<'a> {
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    #[inline]
    pub fn is_active(&self, i: usize) -> bool {
        self.state[i] != ParticleState::Inactive as u8
    }

    #[inline]
    pub fn get(&self, i: usize) -> Particle {
        Particle {
            position: Vec3::new(self.pos_x[i], self.pos_y[i], self.pos_z[i]),
            velocity: Vec3::new(self.vel_x[i], self.vel_y[i], self.vel_z[i]),
            state: ParticleState::from_code(self.state[i] as u32).unwrap_or(ParticleState::Inactive),
            size: self.size[i],
            stick_timer: self.stick_timer[i],
            slide_speed: self.slide_speed[i],
        }
    }

    #[inline]
    pub fn set(&mut self, i: usize, p: &Particle) {
        self.pos_x[i] = p.position.x;
        self.pos_y[i] = p.position.y;
        self.pos_z[i] = p.position.z;
        self.vel_x[i] = p.velocity.x;
        self.vel_y[i] = p.velocity.y;
        self.vel_z[i] = p.velocity.z;
        self.state[i] = p.state as u8;
        self.size[i] = p.size;
        self.stick_timer[i] = p.stick_timer;
        self.slide_speed[i] = p.slide_speed;
    }

    /// Split into `[0, mid)` and `[mid, len)`.
    pub fn split_at(self, mid: usize) -> (ParticleSlicesMut<'a>, ParticleSlicesMut<'a>) {
        let (pos_x_a, pos_x_b) = self.pos_x.split_at_mut(mid);
        let (pos_y_a, pos_y_b) = self.pos_y.split_at_mut(mid);
        let (pos_z_a, pos_z_b) = self.pos_z.split_at_mut(mid);
        let (vel_x_a, vel_x_b) = self.vel_x.split_at_mut(mid);
        let (vel_y_a, vel_y_b) = self.vel_y.split_at_mut(mid);
        let (vel_z_a, vel_z_b) = self.vel_z.split_at_mut(mid);
        let (state_a, state_b) = self.state.split_at_mut(mid);
        let (size_a, size_b) = self.size.split_at_mut(mid);
        let (timer_a, timer_b) = self.stick_timer.split_at_mut(mid);
        let (seed_a, seed_b) = self.slide_speed.split_at_mut(mid);
        (
            ParticleSlicesMut {
                pos_x: pos_x_a,
                pos_y: pos_y_a,
                pos_z: pos_z_a,
                vel_x: vel_x_a,
                vel_y: vel_y_a,
                vel_z: vel_z_a,
                state: state_a,
                size: size_a,
                stick_timer: timer_a,
                slide_speed: seed_a,
            },
            ParticleSlicesMut {
                pos_x: pos_x_b,
                pos_y: pos_y_b,
                pos_z: pos_z_b,
                vel_x: vel_x_b,
                vel_y: vel_y_b,
                vel_z: vel_z_b,
                state: state_b,
                size: size_b,
                stick_timer: timer_b,
                slide_speed: seed_b,
            },
        )
    }

    /// Split into `parts` contiguous, near-equal ranges.
    pub fn partition(self, parts: usize) -> Vec<ParticleSlicesMut<'a>> {
        let parts = parts.max(1);
        let chunk = self.len().div_ceil(parts).max(1);
        let mut out = Vec::with_capacity(parts);
        let mut rest = self;
        while rest.len() > chunk {
            let (head, tail) = rest.split_at(chunk);
            out.push(head);
            rest = tail;
        }
        out.push(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> SpawnBatch {
        let mut b = SpawnBatch::with_capacity(n);
        for i in 0..n {
            b.push(Vec3::new(i as f32, 1.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 0.05, 0.5);
        }
        b
    }

    // ========== ParticleState Tests ==========

    #[test]
    fn test_state_codes() {
        assert_eq!(ParticleState::Falling.code(), 0);
        assert_eq!(ParticleState::Stuck.code(), 1);
        assert_eq!(ParticleState::Sliding.code(), 2);
        assert_eq!(ParticleState::Dripping.code(), 3);
        assert_eq!(ParticleState::Inactive.code(), 4);
        assert_eq!(ParticleState::Bouncing.code(), 5);
        for s in ParticleState::ALL {
            assert_eq!(ParticleState::from_code(s.code()), Some(s));
        }
        assert_eq!(ParticleState::from_code(6), None);
    }

    // ========== Spawn Tests ==========

    #[test]
    fn test_spawn_initial_state() {
        let mut store = ParticleStore::new(10);
        assert_eq!(store.spawn(&batch(3)), 3);
        assert_eq!(store.count(), 3);
        assert_eq!(store.highest_active(), Some(2));
        let p = store.get(1);
        assert_eq!(p.state, ParticleState::Falling);
        assert_eq!(p.stick_timer, 0.0);
        assert_eq!(p.position, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_spawn_overflow_truncates() {
        let mut store = ParticleStore::new(4);
        assert_eq!(store.spawn(&batch(10)), 4);
        assert_eq!(store.spawn(&batch(2)), 0);
        assert_eq!(store.active_count(), 4);
    }

    #[test]
    fn test_spawn_reuses_inactive_slots() {
        let mut store = ParticleStore::new(4);
        store.spawn(&batch(4));
        let mut p = store.get(2);
        p.deactivate();
        store.set(2, &p);

        assert_eq!(store.spawn(&batch(3)), 1);
        assert_eq!(store.state(2), ParticleState::Falling);
        assert_eq!(store.count(), 4);
    }

    #[test]
    fn test_spawn_mismatched_lengths() {
        let mut b = batch(5);
        b.sizes.truncate(2);
        assert_eq!(b.len(), 2);
        let mut store = ParticleStore::new(10);
        assert_eq!(store.spawn(&b), 2);
    }

    #[test]
    fn test_from_flat() {
        let b = SpawnBatch::from_flat(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[0.0; 6], &[0.1, 0.2], &[0.5, 0.6]);
        assert_eq!(b.len(), 2);
        assert_eq!(b.positions[1], Vec3::new(3.0, 4.0, 5.0));
    }

    // ========== Reset / Render Tests ==========

    #[test]
    fn test_reset_then_spawn_matches() {
        let mut store = ParticleStore::new(8);
        store.spawn(&batch(5));
        let first: Vec<Particle> = (0..5).map(|i| store.get(i)).collect();
        store.reset();
        assert_eq!(store.count(), 0);
        assert_eq!(store.active_count(), 0);
        store.spawn(&batch(5));
        let second: Vec<Particle> = (0..5).map(|i| store.get(i)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_copy_to_render_buffers() {
        let mut store = ParticleStore::new(8);
        store.spawn(&batch(3));
        let mut pos = vec![0.0; 24];
        let mut st = vec![-1.0; 32];
        assert_eq!(store.copy_to_render_buffers(&mut pos, &mut st), 3);
        assert_eq!(&pos[3..6], &[1.0, 1.0, 0.0]);
        assert_eq!(&st[0..4], &[0.0, 0.0, 0.05, 0.5]);
        assert_eq!(st[12], -1.0);

        // Destination smaller than the draw range
        let mut small = vec![0.0; 6];
        assert_eq!(store.copy_to_render_buffers(&mut small, &mut st), 2);
    }

    #[test]
    fn test_refresh_highest_active() {
        let mut store = ParticleStore::new(8);
        store.spawn(&batch(4));
        for i in [2, 3] {
            let mut p = store.get(i);
            p.deactivate();
            store.set(i, &p);
        }
        store.refresh_highest_active();
        assert_eq!(store.highest_active(), Some(1));
    }

    // ========== Slices Tests ==========

    #[test]
    fn test_partition_covers_range() {
        let mut store = ParticleStore::new(10);
        store.spawn(&batch(10));
        let parts = store.slices_mut().partition(3);
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
    }

    #[test]
    fn test_partition_writes_land_in_store() {
        let mut store = ParticleStore::new(6);
        store.spawn(&batch(6));
        for mut part in store.slices_mut().partition(2) {
            for i in 0..part.len() {
                let mut p = part.get(i);
                p.size = 1.0;
                part.set(i, &p);
            }
        }
        assert!((0..6).all(|i| store.get(i).size == 1.0));
    }
}
