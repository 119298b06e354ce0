//! Group lifecycle: creation with shape emission, joining, destruction,
//! structural bond formation, and the arena rotation that keeps every group
//! a contiguous index range.

use glam::Vec2;

use crate::constants::MAX_TRIAD_DISTANCE_SQUARED;
use crate::contact::{ParticlePair, ParticleTriad};
use crate::group::{group_flags, GroupDef, GroupId, ParticleGroup};
use crate::math::{cross_sv, Rot, Transform};
use crate::particle::{flags, ParticleDef, PAIR_FLAGS, TRIAD_FLAGS};
use crate::system::ParticleSystem;

impl ParticleSystem {
    /// Create a group, emitting particles from the def's shape and explicit
    /// positions, then form pairs and triads inside the new range. Returns
    /// `None` while the world is locked.
    pub fn create_group(&mut self, def: &GroupDef) -> Option<GroupId> {
        if self.is_locked() {
            return None;
        }
        debug_assert!(
            def.group_flags & group_flags::INTERNAL_MASK == 0,
            "internal group flags in def"
        );
        let transform = Transform::new(def.position, def.angle);
        let first_index = self.count;
        if let Some(shape) = &def.shape {
            let stride = if def.stride != 0.0 {
                def.stride
            } else {
                self.particle_stride()
            };
            if shape.is_stroked() {
                self.create_particles_stroke_shape(def, &transform, stride);
            } else {
                self.create_particles_fill_shape(def, &transform, stride);
            }
        }
        for &p in &def.positions {
            self.create_particle_for_group(def, &transform, p);
        }
        let last_index = self.count;

        let id = self.alloc_group(ParticleGroup::new(
            first_index,
            last_index,
            def.strength,
            transform,
            def.user_data,
        ));
        for i in first_index..last_index {
            self.group[i as usize] = Some(id);
        }
        self.set_group_flags_internal(id, def.group_flags);

        self.update_contacts(true);
        self.update_pairs_and_triads(first_index, last_index, id, id);
        Some(id)
    }

    fn create_particle_for_group(&mut self, def: &GroupDef, xf: &Transform, p: Vec2) {
        let position = xf.apply(p);
        let particle_def = ParticleDef {
            flags: def.flags,
            position,
            velocity: def.linear_velocity
                + cross_sv(def.angular_velocity, position - def.position),
            color: def.color,
            user_data: def.user_data,
        };
        // A full arena is tolerated here; the group simply ends up smaller.
        self.create_particle(&particle_def);
    }

    /// Emit particles along every segment of an edge or chain shape. The
    /// fractional remainder carries across segments so spacing stays uniform
    /// around corners.
    fn create_particles_stroke_shape(&mut self, def: &GroupDef, xf: &Transform, stride: f32) {
        let shape = def.shape.as_ref().unwrap();
        let mut position_on_edge = 0.0;
        for child in 0..shape.child_count() {
            let (v1, v2) = shape.child_edge(child);
            let d = v2 - v1;
            let edge_length = d.length();
            while position_on_edge < edge_length {
                let p = v1 + position_on_edge / edge_length * d;
                self.create_particle_for_group(def, xf, p);
                position_on_edge += stride;
            }
            position_on_edge -= edge_length;
        }
    }

    /// Raster the shape's AABB at the stride and keep the points the shape
    /// contains.
    fn create_particles_fill_shape(&mut self, def: &GroupDef, xf: &Transform, stride: f32) {
        let shape = def.shape.as_ref().unwrap();
        let aabb = shape.compute_aabb();
        let mut y = (aabb.lower.y / stride).floor() * stride;
        while y < aabb.upper.y {
            let mut x = (aabb.lower.x / stride).floor() * stride;
            while x < aabb.upper.x {
                let p = Vec2::new(x, y);
                if shape.test_point_local(p) {
                    self.create_particle_for_group(def, xf, p);
                }
                x += stride;
            }
            y += stride;
        }
    }

    /// Merge `group_b` into `group_a`. After the call `group_a` covers one
    /// contiguous range holding both populations, carries the OR of both
    /// flag sets, and `group_b` is destroyed. No-op while locked.
    pub fn join_groups(&mut self, group_a: GroupId, group_b: GroupId) {
        if self.is_locked() {
            return;
        }
        debug_assert!(group_a != group_b);

        // Move B to the end of the arena, then A directly in front of it.
        let (b_first, b_last) = {
            let g = self.group_ref(group_b);
            (g.first, g.last)
        };
        self.rotate_buffer(b_first, b_last, self.count);
        debug_assert_eq!(self.group_ref(group_b).last, self.count);
        let (a_first, a_last) = {
            let g = self.group_ref(group_a);
            (g.first, g.last)
        };
        let b_first = self.group_ref(group_b).first;
        self.rotate_buffer(a_first, a_last, b_first);
        debug_assert_eq!(self.group_ref(group_a).last, self.group_ref(group_b).first);

        self.update_contacts(true);
        let a_first = self.group_ref(group_a).first;
        let b_last = self.group_ref(group_b).last;
        self.update_pairs_and_triads(a_first, b_last, group_a, group_b);

        let b_first = self.group_ref(group_b).first;
        for i in b_first..b_last {
            self.group[i as usize] = Some(group_a);
        }
        let merged_flags =
            self.group_ref(group_a).group_flags | self.group_ref(group_b).group_flags;
        self.set_group_flags_internal(group_a, merged_flags);
        self.group_mut(group_a).last = b_last;
        self.group_mut(group_b).first = b_last;
        self.destroy_group(group_b);
    }

    /// Unlink and free a group. Particles keep existing; their group
    /// back-reference is cleared. The destruction listener is notified
    /// first.
    pub fn destroy_group(&mut self, id: GroupId) {
        debug_assert!(self.group_count() > 0);
        if let Some(mut listener) = self.destruction_listener.take() {
            listener.goodbye_group(id);
            self.destruction_listener = Some(listener);
        }
        self.set_group_flags_internal(id, 0);
        let (first, last, prev, next) = {
            let g = self.group_ref(id);
            (g.first, g.last, g.prev, g.next)
        };
        for i in first..last {
            self.group[i as usize] = None;
        }
        if let Some(p) = prev {
            self.group_mut(p).next = next;
        }
        if let Some(n) = next {
            self.group_mut(n).prev = prev;
        }
        if self.group_list == Some(id) {
            self.group_list = next;
        }
        self.release_group_slot(id);
    }

    /// Scan the current contacts and Voronoi neighborhood of
    /// `[first, last)` and record the durable bonds whose flags ask for
    /// them. A bond is kept only when it bridges the two groups (which are
    /// the same group at creation time).
    pub(crate) fn update_pairs_and_triads(
        &mut self,
        first: i32,
        last: i32,
        group_a: GroupId,
        group_b: GroupId,
    ) {
        let mut particle_flags = 0;
        for i in first..last {
            particle_flags |= self.flags.data[i as usize];
        }
        if particle_flags & PAIR_FLAGS != 0 {
            for k in 0..self.contacts.len() {
                let contact = self.contacts[k];
                let (a, b) = (contact.index_a, contact.index_b);
                let ga = self.group_ref(group_a);
                let gb = self.group_ref(group_b);
                let crosses =
                    (ga.contains(a) && gb.contains(b)) || (ga.contains(b) && gb.contains(a));
                if crosses {
                    let strength = ga.strength.min(gb.strength);
                    let distance = self.position.data[a as usize]
                        .distance(self.position.data[b as usize]);
                    self.pairs.push(ParticlePair {
                        index_a: a,
                        index_b: b,
                        flags: contact.flags,
                        strength,
                        distance,
                    });
                }
            }
        }
        if particle_flags & TRIAD_FLAGS != 0 {
            let mut diagram = (self.voronoi_factory)((last - first) as usize);
            for i in first..last {
                if self.flags.data[i as usize] & flags::ZOMBIE == 0
                    && (self.group_ref(group_a).contains(i)
                        || self.group_ref(group_b).contains(i))
                {
                    diagram.add_generator(self.position.data[i as usize], i);
                }
            }
            diagram.generate(self.particle_stride() / 2.0);
            let max_distance_squared = MAX_TRIAD_DISTANCE_SQUARED * self.squared_diameter;
            diagram.get_nodes(&mut |a, b, c| {
                let ga = self.group_ref(group_a);
                let gb = self.group_ref(group_b);
                let crosses = (ga.contains(a) || ga.contains(b) || ga.contains(c))
                    && (gb.contains(a) || gb.contains(b) || gb.contains(c));
                if !crosses {
                    return;
                }
                let af = self.flags.data[a as usize];
                let bf = self.flags.data[b as usize];
                let cf = self.flags.data[c as usize];
                if af & bf & cf & TRIAD_FLAGS == 0 {
                    return;
                }
                let pa = self.position.data[a as usize];
                let pb = self.position.data[b as usize];
                let pc = self.position.data[c as usize];
                let dab = pa - pb;
                let dbc = pb - pc;
                let dca = pc - pa;
                if dab.length_squared() >= max_distance_squared
                    || dbc.length_squared() >= max_distance_squared
                    || dca.length_squared() >= max_distance_squared
                {
                    return;
                }
                let strength = self
                    .group_ref(group_a)
                    .strength
                    .min(self.group_ref(group_b).strength);
                let midpoint = (pa + pb + pc) / 3.0;
                self.triads.push(ParticleTriad {
                    index_a: a,
                    index_b: b,
                    index_c: c,
                    flags: af | bf | cf,
                    strength,
                    pa: pa - midpoint,
                    pb: pb - midpoint,
                    pc: pc - midpoint,
                    ka: -dca.dot(dab),
                    kb: -dab.dot(dbc),
                    kc: -dbc.dot(dca),
                    s: pa.perp_dot(pb) + pb.perp_dot(pc) + pc.perp_dot(pa),
                });
            });
        }
    }

    /// Three-way rotate: move `[start, mid)` to end at `end` while
    /// `[mid, end)` shifts down to `start`, across every per-particle array,
    /// then rewrite every stored index so each record still names the same
    /// physical particle.
    pub fn rotate_buffer(&mut self, start: i32, mid: i32, end: i32) {
        debug_assert!(0 <= start && start <= mid && mid <= end && end <= self.count);
        if start == mid || mid == end {
            return;
        }
        let new_index = |i: i32| -> i32 {
            if i < start {
                i
            } else if i < mid {
                i + (end - mid)
            } else if i < end {
                i + (start - mid)
            } else {
                i
            }
        };
        let (s, e) = (start as usize, end as usize);
        let rot = (mid - start) as usize;
        self.flags.data[s..e].rotate_left(rot);
        self.position.data[s..e].rotate_left(rot);
        self.velocity.data[s..e].rotate_left(rot);
        self.group[s..e].rotate_left(rot);
        if !self.static_pressure.is_empty() {
            self.static_pressure[s..e].rotate_left(rot);
        }
        if !self.depth.is_empty() {
            self.depth[s..e].rotate_left(rot);
        }
        if !self.color.data.is_empty() {
            self.color.data[s..e].rotate_left(rot);
        }
        if !self.user_data.data.is_empty() {
            self.user_data.data[s..e].rotate_left(rot);
        }

        for proxy in &mut self.proxies {
            proxy.index = new_index(proxy.index);
        }
        for contact in &mut self.contacts {
            contact.index_a = new_index(contact.index_a);
            contact.index_b = new_index(contact.index_b);
            if contact.index_a > contact.index_b {
                std::mem::swap(&mut contact.index_a, &mut contact.index_b);
                contact.normal = -contact.normal;
            }
        }
        for contact in &mut self.body_contacts {
            contact.index = new_index(contact.index);
        }
        for pair in &mut self.pairs {
            pair.index_a = new_index(pair.index_a);
            pair.index_b = new_index(pair.index_b);
        }
        for triad in &mut self.triads {
            triad.index_a = new_index(triad.index_a);
            triad.index_b = new_index(triad.index_b);
            triad.index_c = new_index(triad.index_c);
        }
        for id in self.collect_group_ids() {
            let g = self.group_mut(id);
            if g.first < g.last {
                let new_first = new_index(g.first);
                let new_last = new_index(g.last - 1) + 1;
                g.first = new_first;
                g.last = new_last;
            }
        }
    }

    // ---- group flags ----

    /// Set a group's behavior flags. Internal bits are preserved and must
    /// not appear in `new_flags`.
    pub fn set_group_flags(&mut self, id: GroupId, new_flags: u32) {
        debug_assert!(
            new_flags & group_flags::INTERNAL_MASK == 0,
            "internal group flags are system-managed"
        );
        let preserved = self.group_ref(id).group_flags & group_flags::INTERNAL_MASK;
        self.set_group_flags_internal(id, new_flags | preserved);
    }

    pub(crate) fn set_group_flags_internal(&mut self, id: GroupId, new_flags: u32) {
        let mut new_flags = new_flags;
        let old_flags = self.group_ref(id).group_flags;
        if (old_flags ^ new_flags) & group_flags::SOLID != 0 {
            // Solidity changed: the depth field is stale either way.
            new_flags |= group_flags::NEEDS_UPDATE_DEPTH;
        }
        if old_flags & !new_flags != 0 {
            self.needs_update_all_group_flags = true;
        }
        if !self.all_group_flags & new_flags != 0 {
            if new_flags & group_flags::SOLID != 0 {
                self.request_depth_buffer();
            }
            self.all_group_flags |= new_flags;
        }
        self.group_mut(id).group_flags = new_flags;
    }

    // ---- group statistics ----

    /// Recompute a group's aggregate mass, center, velocity, angular
    /// velocity and inertia, at most once per solver timestamp.
    pub(crate) fn update_group_statistics(&mut self, id: GroupId) {
        if self.group_ref(id).timestamp == self.timestamp {
            return;
        }
        let (first, last) = {
            let g = self.group_ref(id);
            (g.first, g.last)
        };
        let m = self.particle_mass();
        let mut mass = 0.0;
        let mut center = Vec2::ZERO;
        let mut linear_velocity = Vec2::ZERO;
        for i in first..last {
            mass += m;
            center += m * self.position.data[i as usize];
            linear_velocity += m * self.velocity.data[i as usize];
        }
        if mass > 0.0 {
            center /= mass;
            linear_velocity /= mass;
        }
        let mut inertia = 0.0;
        let mut angular_velocity = 0.0;
        for i in first..last {
            let px = self.position.data[i as usize] - center;
            let v = self.velocity.data[i as usize] - linear_velocity;
            inertia += m * px.dot(px);
            angular_velocity += m * px.perp_dot(v);
        }
        if inertia > 0.0 {
            angular_velocity *= 1.0 / inertia;
        }
        let timestamp = self.timestamp;
        let g = self.group_mut(id);
        g.mass = mass;
        g.center = center;
        g.linear_velocity = linear_velocity;
        g.angular_velocity = angular_velocity;
        g.inertia = inertia;
        g.timestamp = timestamp;
    }

    // ---- group accessors ----

    pub fn group_first_index(&self, id: GroupId) -> i32 {
        self.group_ref(id).first
    }

    pub fn group_last_index(&self, id: GroupId) -> i32 {
        self.group_ref(id).last
    }

    pub fn group_particle_count(&self, id: GroupId) -> i32 {
        self.group_ref(id).count()
    }

    pub fn group_contains(&self, id: GroupId, index: i32) -> bool {
        self.group_ref(id).contains(index)
    }

    pub fn group_flags_of(&self, id: GroupId) -> u32 {
        self.group_ref(id).group_flags
    }

    pub fn group_strength(&self, id: GroupId) -> f32 {
        self.group_ref(id).strength
    }

    pub fn group_user_data(&self, id: GroupId) -> u64 {
        self.group_ref(id).user_data
    }

    pub fn group_transform(&self, id: GroupId) -> Transform {
        self.group_ref(id).transform
    }

    pub fn group_position(&self, id: GroupId) -> Vec2 {
        self.group_ref(id).transform.p
    }

    pub fn group_angle(&self, id: GroupId) -> f32 {
        self.group_ref(id).transform.q.angle()
    }

    pub fn group_mass(&mut self, id: GroupId) -> f32 {
        self.update_group_statistics(id);
        self.group_ref(id).mass
    }

    pub fn group_inertia(&mut self, id: GroupId) -> f32 {
        self.update_group_statistics(id);
        self.group_ref(id).inertia
    }

    pub fn group_center(&mut self, id: GroupId) -> Vec2 {
        self.update_group_statistics(id);
        self.group_ref(id).center
    }

    pub fn group_linear_velocity(&mut self, id: GroupId) -> Vec2 {
        self.update_group_statistics(id);
        self.group_ref(id).linear_velocity
    }

    pub fn group_angular_velocity(&mut self, id: GroupId) -> f32 {
        self.update_group_statistics(id);
        self.group_ref(id).angular_velocity
    }

    /// Velocity of the rigid group's material point at `position`.
    pub fn group_linear_velocity_from_world_point(
        &mut self,
        id: GroupId,
        position: Vec2,
    ) -> Vec2 {
        self.update_group_statistics(id);
        let g = self.group_ref(id);
        g.linear_velocity + cross_sv(g.angular_velocity, position - g.center)
    }

    /// The transform advancing a rigid group's current pose by `dt` under
    /// its cached statistics.
    pub(crate) fn rigid_incremental_transform(&self, id: GroupId, dt: f32) -> Transform {
        let g = self.group_ref(id);
        let rotation = Rot::new(dt * g.angular_velocity);
        Transform {
            p: g.center + dt * g.linear_velocity - rotation.apply(g.center),
            q: rotation,
        }
    }
}
