//! The particle system arena.
//!
//! Storage is structure-of-arrays keyed by dense particle index: flags,
//! position, velocity, weight, group back-reference, plus lazily
//! materialized per-particle scratch (static pressure, depth, color, user
//! data, two accumulators). Capacity grows by doubling and is capped by
//! `max_count` and by the length of any caller-installed buffer; structural
//! arrays (proxies, contacts, pairs, triads) are plain vectors that keep
//! their capacity for the life of the system.
//!
//! Submodules carry the rest of the implementation:
//! - [`contacts`]: neighbor index, contact builders, queries, ray cast
//! - [`groups`]: group lifecycle, pair/triad formation, rotation
//! - [`solver`]: the per-step pipeline and zombie compaction

mod contacts;
mod groups;
mod solver;

use glam::Vec2;

use crate::constants::{INVALID_PARTICLE_INDEX, MIN_PARTICLE_BUFFER_CAPACITY, PARTICLE_STRIDE};
use crate::contact::{BodyContact, ParticleContact, ParticlePair, ParticleTriad, Proxy};
use crate::group::{GroupId, ParticleGroup};
use crate::particle::{flags, ParticleColor, ParticleDef, ParticleSystemDef, UserData};
use crate::shape::Shape;
use crate::math::Transform;
use crate::voronoi::{default_voronoi_factory, VoronoiGenerator};
use crate::world::{DestructionListener, FixtureId, TimeStep};

/// One user-visible particle array: internally grown storage, or a
/// caller-installed vector whose length is a hard capacity cap.
struct ParticleBuffer<T> {
    data: Vec<T>,
    user_capacity: Option<usize>,
}

impl<T: Copy + Default> ParticleBuffer<T> {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            user_capacity: None,
        }
    }

    /// Grow internally-owned storage to `capacity`. A deferred buffer grows
    /// only once it has been materialized; user-installed storage never
    /// grows.
    fn grow(&mut self, capacity: usize, deferred: bool) {
        if self.user_capacity.is_none() && (!deferred || !self.data.is_empty()) {
            self.data.resize(capacity, T::default());
        }
    }

    /// Install caller-owned storage. The live prefix is copied over so the
    /// caller sees current particle state; the previous storage is handed
    /// back.
    fn install(&mut self, mut buffer: Vec<T>, live: usize) -> Vec<T> {
        debug_assert!(buffer.len() >= live, "user buffer smaller than live particle count");
        let n = live.min(self.data.len()).min(buffer.len());
        buffer[..n].copy_from_slice(&self.data[..n]);
        self.user_capacity = Some(buffer.len());
        std::mem::replace(&mut self.data, buffer)
    }
}

/// A population of disc particles embedded in a rigid-body world.
///
/// The system owns all particle state and the group list. It talks to the
/// surrounding world only through [`crate::world::RigidWorld`], which is
/// passed into the operations that need it ([`Self::solve`],
/// [`Self::update_body_contacts`]).
pub struct ParticleSystem {
    pub(crate) def: ParticleSystemDef,

    pub(crate) timestamp: i32,
    pub(crate) all_particle_flags: u32,
    pub(crate) needs_update_all_particle_flags: bool,
    pub(crate) all_group_flags: u32,
    pub(crate) needs_update_all_group_flags: bool,
    pub(crate) iteration_index: i32,
    locked: bool,

    pub(crate) particle_diameter: f32,
    pub(crate) inverse_diameter: f32,
    pub(crate) squared_diameter: f32,
    pub(crate) inverse_density: f32,

    pub(crate) count: i32,
    capacity: i32,

    pub(crate) flags: ParticleBuffer<u32>,
    pub(crate) position: ParticleBuffer<Vec2>,
    pub(crate) velocity: ParticleBuffer<Vec2>,
    pub(crate) weight: Vec<f32>,
    pub(crate) static_pressure: Vec<f32>,
    pub(crate) accumulation: Vec<f32>,
    pub(crate) accumulation2: Vec<Vec2>,
    pub(crate) depth: Vec<f32>,
    pub(crate) color: ParticleBuffer<ParticleColor>,
    pub(crate) user_data: ParticleBuffer<UserData>,
    pub(crate) group: Vec<Option<GroupId>>,

    pub(crate) proxies: Vec<Proxy>,
    pub(crate) contacts: Vec<ParticleContact>,
    pub(crate) body_contacts: Vec<BodyContact>,
    pub(crate) pairs: Vec<ParticlePair>,
    pub(crate) triads: Vec<ParticleTriad>,

    pub(crate) groups: Vec<Option<ParticleGroup>>,
    free_groups: Vec<u32>,
    pub(crate) group_list: Option<GroupId>,
    group_count: i32,

    pub(crate) destruction_listener: Option<Box<dyn DestructionListener>>,
    /// Builds the triangulation used for triad formation; replaceable by
    /// the embedder.
    pub(crate) voronoi_factory: fn(usize) -> Box<dyn VoronoiGenerator>,
    pub(crate) fixture_scratch: Vec<FixtureId>,
}

impl ParticleSystem {
    pub fn new(def: &ParticleSystemDef) -> Self {
        let mut system = Self {
            def: *def,
            timestamp: 0,
            all_particle_flags: 0,
            needs_update_all_particle_flags: false,
            all_group_flags: 0,
            needs_update_all_group_flags: false,
            iteration_index: 0,
            locked: false,
            particle_diameter: 0.0,
            inverse_diameter: 0.0,
            squared_diameter: 0.0,
            inverse_density: 1.0 / def.density,
            count: 0,
            capacity: 0,
            flags: ParticleBuffer::new(),
            position: ParticleBuffer::new(),
            velocity: ParticleBuffer::new(),
            weight: Vec::new(),
            static_pressure: Vec::new(),
            accumulation: Vec::new(),
            accumulation2: Vec::new(),
            depth: Vec::new(),
            color: ParticleBuffer::new(),
            user_data: ParticleBuffer::new(),
            group: Vec::new(),
            proxies: Vec::new(),
            contacts: Vec::new(),
            body_contacts: Vec::new(),
            pairs: Vec::new(),
            triads: Vec::new(),
            groups: Vec::new(),
            free_groups: Vec::new(),
            group_list: None,
            group_count: 0,
            destruction_listener: None,
            voronoi_factory: default_voronoi_factory,
            fixture_scratch: Vec::new(),
        };
        system.set_radius(def.radius);
        system
    }

    // ---- capacity management ----

    fn limit_capacity(capacity: i32, max_count: i32) -> i32 {
        if max_count > 0 && capacity > max_count {
            max_count
        } else {
            capacity
        }
    }

    /// Grow every particle array to `capacity`, clamped to `max_count` and
    /// the smallest user-installed buffer.
    fn reallocate_internal_buffers(&mut self, capacity: i32) {
        let mut capacity = Self::limit_capacity(capacity, self.def.max_count);
        for user_cap in [
            self.flags.user_capacity,
            self.position.user_capacity,
            self.velocity.user_capacity,
            self.color.user_capacity,
            self.user_data.user_capacity,
        ]
        .into_iter()
        .flatten()
        {
            capacity = Self::limit_capacity(capacity, user_cap as i32);
        }
        if self.capacity < capacity {
            let cap = capacity as usize;
            self.flags.grow(cap, false);
            self.position.grow(cap, false);
            self.velocity.grow(cap, false);
            self.weight.resize(cap, 0.0);
            self.accumulation.resize(cap, 0.0);
            self.group.resize(cap, None);
            if !self.static_pressure.is_empty() {
                self.static_pressure.resize(cap, 0.0);
            }
            if !self.accumulation2.is_empty() {
                self.accumulation2.resize(cap, Vec2::ZERO);
            }
            if !self.depth.is_empty() {
                self.depth.resize(cap, 0.0);
            }
            self.color.grow(cap, true);
            self.user_data.grow(cap, true);
            self.capacity = capacity;
        }
    }

    fn ensure_initial_capacity(&mut self) {
        if self.capacity == 0 {
            self.reallocate_internal_buffers(MIN_PARTICLE_BUFFER_CAPACITY);
        }
    }

    pub(crate) fn request_static_pressure_buffer(&mut self) {
        if self.static_pressure.is_empty() {
            self.ensure_initial_capacity();
            self.static_pressure.resize(self.capacity as usize, 0.0);
        }
    }

    pub(crate) fn request_accumulation2_buffer(&mut self) {
        if self.accumulation2.is_empty() {
            self.ensure_initial_capacity();
            self.accumulation2.resize(self.capacity as usize, Vec2::ZERO);
        }
    }

    pub(crate) fn request_depth_buffer(&mut self) {
        if self.depth.is_empty() {
            self.ensure_initial_capacity();
            self.depth.resize(self.capacity as usize, 0.0);
        }
    }

    pub(crate) fn request_color_buffer(&mut self) {
        if self.color.data.is_empty() {
            self.ensure_initial_capacity();
            self.color.data.resize(self.capacity as usize, ParticleColor::ZERO);
        }
    }

    pub(crate) fn request_user_data_buffer(&mut self) {
        if self.user_data.data.is_empty() {
            self.ensure_initial_capacity();
            self.user_data.data.resize(self.capacity as usize, 0);
        }
    }

    // ---- particle lifecycle ----

    /// Create one particle and return its index, or
    /// [`INVALID_PARTICLE_INDEX`] when the world is locked or no capacity
    /// remains under `max_count` / user-buffer caps.
    pub fn create_particle(&mut self, def: &ParticleDef) -> i32 {
        if self.locked {
            return INVALID_PARTICLE_INDEX;
        }
        if self.count >= self.capacity {
            let capacity = if self.count != 0 {
                2 * self.count
            } else {
                MIN_PARTICLE_BUFFER_CAPACITY
            };
            self.reallocate_internal_buffers(capacity);
        }
        if self.count >= self.capacity {
            log::debug!(
                "particle arena at capacity ({}); creation refused",
                self.capacity
            );
            return INVALID_PARTICLE_INDEX;
        }
        let index = self.count;
        self.count += 1;
        let i = index as usize;
        self.flags.data[i] = 0;
        self.position.data[i] = def.position;
        self.velocity.data[i] = def.velocity;
        self.weight[i] = 0.0;
        self.group[i] = None;
        if !self.static_pressure.is_empty() {
            self.static_pressure[i] = 0.0;
        }
        if !self.depth.is_empty() {
            self.depth[i] = 0.0;
        }
        if !self.color.data.is_empty() || !def.color.is_zero() {
            self.request_color_buffer();
            self.color.data[i] = def.color;
        }
        if !self.user_data.data.is_empty() || def.user_data != 0 {
            self.request_user_data_buffer();
            self.user_data.data[i] = def.user_data;
        }
        self.proxies.push(Proxy { tag: 0, index });
        self.set_particle_flags(index, def.flags);
        index
    }

    /// Mark a particle for removal at the next compaction.
    pub fn destroy_particle(&mut self, index: i32, call_destruction_listener: bool) {
        let mut extra = flags::ZOMBIE;
        if call_destruction_listener {
            extra |= flags::DESTRUCTION_LISTENER;
        }
        let current = self.flags.data[index as usize];
        self.set_particle_flags(index, current | extra);
    }

    /// Mark every particle inside `shape` (placed by `xf`) for removal.
    /// Returns the number of particles flagged; 0 when the world is locked.
    pub fn destroy_particles_in_shape(
        &mut self,
        shape: &Shape,
        xf: &Transform,
        call_destruction_listener: bool,
    ) -> i32 {
        if self.locked {
            return 0;
        }
        let aabb = shape.compute_aabb_transformed(xf);
        let mut candidates = Vec::new();
        self.query_aabb(&aabb, |index| {
            candidates.push(index);
            true
        });
        let mut destroyed = 0;
        for index in candidates {
            if shape.test_point(xf, self.position.data[index as usize]) {
                self.destroy_particle(index, call_destruction_listener);
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Mark every particle currently in `group` for removal. The group
    /// itself is destroyed by the following compaction unless it may be
    /// empty.
    pub fn destroy_particles_in_group(&mut self, group: GroupId, call_destruction_listener: bool) {
        if self.locked {
            return;
        }
        let (first, last) = {
            let g = self.group_ref(group);
            (g.first, g.last)
        };
        for i in first..last {
            self.destroy_particle(i, call_destruction_listener);
        }
    }

    /// Replace a particle's flag word, materializing any buffers the new
    /// behaviors need and keeping the system-wide flag union current.
    pub fn set_particle_flags(&mut self, index: i32, new_flags: u32) {
        let old_flags = self.flags.data[index as usize];
        if old_flags & !new_flags != 0 {
            // Removing bits may shrink the union; recompute lazily.
            self.needs_update_all_particle_flags = true;
        }
        if !self.all_particle_flags & new_flags != 0 {
            if new_flags & flags::TENSILE != 0 {
                self.request_accumulation2_buffer();
            }
            if new_flags & flags::COLOR_MIXING != 0 {
                self.request_color_buffer();
            }
            self.all_particle_flags |= new_flags;
        }
        self.flags.data[index as usize] = new_flags;
    }

    // ---- parameters ----

    pub fn set_radius(&mut self, radius: f32) {
        self.def.radius = radius;
        self.particle_diameter = 2.0 * radius;
        self.squared_diameter = self.particle_diameter * self.particle_diameter;
        self.inverse_diameter = 1.0 / self.particle_diameter;
    }

    pub fn radius(&self) -> f32 {
        self.def.radius
    }

    pub fn set_density(&mut self, density: f32) {
        self.def.density = density;
        self.inverse_density = 1.0 / density;
    }

    pub fn density(&self) -> f32 {
        self.def.density
    }

    pub fn set_gravity_scale(&mut self, gravity_scale: f32) {
        self.def.gravity_scale = gravity_scale;
    }

    pub fn gravity_scale(&self) -> f32 {
        self.def.gravity_scale
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.def.damping_strength = damping;
    }

    pub fn damping(&self) -> f32 {
        self.def.damping_strength
    }

    pub fn set_static_pressure_iterations(&mut self, iterations: i32) {
        self.def.static_pressure_iterations = iterations;
    }

    pub fn static_pressure_iterations(&self) -> i32 {
        self.def.static_pressure_iterations
    }

    pub fn set_strict_contact_check(&mut self, enabled: bool) {
        self.def.strict_contact_check = enabled;
    }

    pub fn strict_contact_check(&self) -> bool {
        self.def.strict_contact_check
    }

    pub fn set_max_particle_count(&mut self, count: i32) {
        debug_assert!(self.count <= count || count == 0);
        self.def.max_count = count;
    }

    pub fn max_particle_count(&self) -> i32 {
        self.def.max_count
    }

    /// The embedding world flags its stepping phase here; locked mutating
    /// entry points return their sentinel without side effects.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_destruction_listener(&mut self, listener: Option<Box<dyn DestructionListener>>) {
        self.destruction_listener = listener;
    }

    /// Replace the triangulation used for triad formation. The factory
    /// receives an upper bound on the number of generator points the next
    /// diagram will hold. The built-in diagram
    /// ([`crate::voronoi::default_voronoi_factory`]) is installed by
    /// default.
    pub fn set_voronoi_factory(&mut self, factory: fn(usize) -> Box<dyn VoronoiGenerator>) {
        self.voronoi_factory = factory;
    }

    // ---- derived scales ----

    /// Spacing between particles emitted into group shapes.
    pub fn particle_stride(&self) -> f32 {
        PARTICLE_STRIDE * self.particle_diameter
    }

    /// Nominal particle mass, `density · stride²`.
    pub fn particle_mass(&self) -> f32 {
        let stride = self.particle_stride();
        self.def.density * stride * stride
    }

    /// Inverse of [`Self::particle_mass`]; derived from the stride so the
    /// two cannot drift apart.
    pub fn particle_inv_mass(&self) -> f32 {
        1.0 / self.particle_mass()
    }

    /// One diameter per sub-step: the fastest speed the neighbor index can
    /// track.
    pub fn critical_velocity(&self, step: &TimeStep) -> f32 {
        self.particle_diameter * step.inv_dt
    }

    pub fn critical_velocity_squared(&self, step: &TimeStep) -> f32 {
        let v = self.critical_velocity(step);
        v * v
    }

    pub fn critical_pressure(&self, step: &TimeStep) -> f32 {
        self.def.density * self.critical_velocity_squared(step)
    }

    // ---- buffer access ----

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.position.data[..self.count as usize]
    }

    pub fn positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.position.data[..self.count as usize]
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.velocity.data[..self.count as usize]
    }

    pub fn velocities_mut(&mut self) -> &mut [Vec2] {
        &mut self.velocity.data[..self.count as usize]
    }

    pub fn flags(&self) -> &[u32] {
        &self.flags.data[..self.count as usize]
    }

    /// Per-particle colors; materializes the buffer on first access.
    pub fn colors(&mut self) -> &[ParticleColor] {
        self.request_color_buffer();
        &self.color.data[..self.count as usize]
    }

    pub fn colors_mut(&mut self) -> &mut [ParticleColor] {
        self.request_color_buffer();
        &mut self.color.data[..self.count as usize]
    }

    /// Per-particle user tokens; materializes the buffer on first access.
    pub fn user_data(&mut self) -> &[UserData] {
        self.request_user_data_buffer();
        &self.user_data.data[..self.count as usize]
    }

    pub fn user_data_mut(&mut self) -> &mut [UserData] {
        self.request_user_data_buffer();
        &mut self.user_data.data[..self.count as usize]
    }

    /// Per-particle group back-references.
    pub fn group_buffer(&self) -> &[Option<GroupId>] {
        &self.group[..self.count as usize]
    }

    /// Per-particle contact weight sums from the last `compute_weight`.
    pub fn weights(&self) -> &[f32] {
        &self.weight[..self.count as usize]
    }

    /// Per-particle depth field; empty until a solid group materializes it.
    pub fn depths(&self) -> &[f32] {
        if self.depth.is_empty() {
            &[]
        } else {
            &self.depth[..self.count as usize]
        }
    }

    /// The sorted neighbor-index entries from the last `update_contacts`.
    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }

    pub fn contacts(&self) -> &[ParticleContact] {
        &self.contacts
    }

    pub fn body_contacts(&self) -> &[BodyContact] {
        &self.body_contacts
    }

    pub fn pairs(&self) -> &[ParticlePair] {
        &self.pairs
    }

    pub fn triads(&self) -> &[ParticleTriad] {
        &self.triads
    }

    // ---- user-supplied storage ----
    //
    // Installing a buffer hands its ownership to the system and makes its
    // length a hard capacity cap; the previous storage is returned. The
    // system never grows or shrinks installed storage.

    pub fn set_flags_buffer(&mut self, buffer: Vec<u32>) -> Vec<u32> {
        let out = self.flags.install(buffer, self.count as usize);
        self.clamp_capacity_to_user_buffers();
        out
    }

    pub fn set_position_buffer(&mut self, buffer: Vec<Vec2>) -> Vec<Vec2> {
        let out = self.position.install(buffer, self.count as usize);
        self.clamp_capacity_to_user_buffers();
        out
    }

    pub fn set_velocity_buffer(&mut self, buffer: Vec<Vec2>) -> Vec<Vec2> {
        let out = self.velocity.install(buffer, self.count as usize);
        self.clamp_capacity_to_user_buffers();
        out
    }

    pub fn set_color_buffer(&mut self, buffer: Vec<ParticleColor>) -> Vec<ParticleColor> {
        let out = self.color.install(buffer, self.count as usize);
        self.clamp_capacity_to_user_buffers();
        out
    }

    pub fn set_user_data_buffer(&mut self, buffer: Vec<UserData>) -> Vec<UserData> {
        let out = self.user_data.install(buffer, self.count as usize);
        self.clamp_capacity_to_user_buffers();
        out
    }

    fn clamp_capacity_to_user_buffers(&mut self) {
        for user_cap in [
            self.flags.user_capacity,
            self.position.user_capacity,
            self.velocity.user_capacity,
            self.color.user_capacity,
            self.user_data.user_capacity,
        ]
        .into_iter()
        .flatten()
        {
            self.capacity = self.capacity.min(user_cap as i32);
        }
        debug_assert!(self.count <= self.capacity || self.capacity == 0);
    }

    // ---- group slab plumbing ----

    pub(crate) fn group_ref(&self, id: GroupId) -> &ParticleGroup {
        self.groups[id.0 as usize].as_ref().expect("stale group id")
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> &mut ParticleGroup {
        self.groups[id.0 as usize].as_mut().expect("stale group id")
    }

    pub(crate) fn alloc_group(&mut self, mut group: ParticleGroup) -> GroupId {
        group.next = self.group_list;
        let id = match self.free_groups.pop() {
            Some(slot) => {
                self.groups[slot as usize] = Some(group);
                GroupId(slot)
            }
            None => {
                self.groups.push(Some(group));
                GroupId((self.groups.len() - 1) as u32)
            }
        };
        if let Some(head) = self.group_list {
            self.group_mut(head).prev = Some(id);
        }
        self.group_list = Some(id);
        self.group_count += 1;
        id
    }

    pub(crate) fn release_group_slot(&mut self, id: GroupId) {
        self.groups[id.0 as usize] = None;
        self.free_groups.push(id.0);
        self.group_count -= 1;
    }

    pub fn group_count(&self) -> i32 {
        self.group_count
    }

    /// Walk the group list, newest first.
    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        std::iter::successors(self.group_list, move |&id| self.group_ref(id).next)
    }

    pub(crate) fn collect_group_ids(&self) -> Vec<GroupId> {
        self.groups().collect()
    }
}
