//! The per-step solver pipeline.
//!
//! Each world step runs `particle_iterations` sub-steps. A sub-step rebuilds
//! body and particle contacts, recomputes weights (and depth when a solid
//! group is stale), then applies the enabled passes in a fixed order:
//!
//! viscous → powder → tensile → solid → color mixing → gravity → static
//! pressure → pressure → damping → extra damping → elastic → spring → limit
//! velocity → barrier → collision → rigid → wall → integrate.
//!
//! Elastic and spring read the velocities written by the earlier passes, so
//! they run late; collision, rigid and wall overwrite velocities and run
//! last. Every pass visits particles in ascending index order and contact
//! lists in insertion order, which keeps runs bit-for-bit reproducible.

use glam::Vec2;

use crate::constants::{
    BARRIER_COLLISION_TIME, INVALID_PARTICLE_INDEX, MAX_PARTICLE_PRESSURE, MIN_PARTICLE_WEIGHT,
    PARTICLE_STRIDE,
};
use crate::contact::ParticleContact;
use crate::group::group_flags;
use crate::math::{Aabb, Rot, Transform};
use crate::particle::{flags, ParticleColor, EXTRA_DAMPING_FLAGS, NO_PRESSURE_FLAGS};
use crate::system::ParticleSystem;
use crate::world::{RigidWorld, TimeStep};

impl ParticleSystem {
    /// Advance the particle population by one world step.
    pub fn solve<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        if self.count == 0 {
            return;
        }
        if self.all_particle_flags & flags::ZOMBIE != 0 {
            self.solve_zombie();
        }
        if self.needs_update_all_particle_flags {
            self.update_all_particle_flags();
        }
        if self.needs_update_all_group_flags {
            self.update_all_group_flags();
        }
        let sub_step = TimeStep {
            dt: step.dt / step.particle_iterations as f32,
            inv_dt: step.inv_dt * step.particle_iterations as f32,
            particle_iterations: step.particle_iterations,
        };
        for iteration in 0..step.particle_iterations {
            self.iteration_index = iteration;
            self.timestamp += 1;
            self.update_body_contacts(world);
            self.update_contacts(false);
            self.compute_weight();
            if self.all_group_flags & group_flags::NEEDS_UPDATE_DEPTH != 0 {
                self.compute_depth();
            }
            if self.all_particle_flags & flags::VISCOUS != 0 {
                self.solve_viscous(world);
            }
            if self.all_particle_flags & flags::POWDER != 0 {
                self.solve_powder(&sub_step);
            }
            if self.all_particle_flags & flags::TENSILE != 0 {
                self.solve_tensile(&sub_step);
            }
            if self.all_group_flags & group_flags::SOLID != 0 {
                self.solve_solid(&sub_step);
            }
            if self.all_particle_flags & flags::COLOR_MIXING != 0 {
                self.solve_color_mixing();
            }
            self.solve_gravity(world, &sub_step);
            if self.all_particle_flags & flags::STATIC_PRESSURE != 0 {
                self.solve_static_pressure(&sub_step);
            }
            self.solve_pressure(world, &sub_step);
            self.solve_damping(world, &sub_step);
            if self.all_particle_flags & EXTRA_DAMPING_FLAGS != 0 {
                self.solve_extra_damping(world);
            }
            // Elastic and spring predict positions from current velocities;
            // keeping them after the force passes is what makes them stable.
            if self.all_particle_flags & flags::ELASTIC != 0 {
                self.solve_elastic(&sub_step);
            }
            if self.all_particle_flags & flags::SPRING != 0 {
                self.solve_spring(&sub_step);
            }
            self.limit_velocity(&sub_step);
            if self.all_particle_flags & flags::BARRIER != 0 {
                self.solve_barrier(&sub_step);
            }
            // These overwrite velocities outright, so nothing may follow
            // them except integration.
            self.solve_collision(world, &sub_step);
            if self.all_group_flags & group_flags::RIGID != 0 {
                self.solve_rigid(&sub_step);
            }
            if self.all_particle_flags & flags::WALL != 0 {
                self.solve_wall();
            }
            for i in 0..self.count as usize {
                let v = self.velocity.data[i];
                self.position.data[i] += sub_step.dt * v;
            }
        }
    }

    pub(crate) fn update_all_particle_flags(&mut self) {
        self.all_particle_flags = 0;
        for i in 0..self.count as usize {
            self.all_particle_flags |= self.flags.data[i];
        }
        self.needs_update_all_particle_flags = false;
    }

    pub(crate) fn update_all_group_flags(&mut self) {
        self.all_group_flags = 0;
        for id in self.collect_group_ids() {
            self.all_group_flags |= self.group_ref(id).group_flags;
        }
        self.needs_update_all_group_flags = false;
    }

    /// Sum contact weights per particle: a dimensionless local density.
    pub fn compute_weight(&mut self) {
        for w in &mut self.weight[..self.count as usize] {
            *w = 0.0;
        }
        for contact in &self.body_contacts {
            self.weight[contact.index as usize] += contact.weight;
        }
        for contact in &self.contacts {
            self.weight[contact.index_a as usize] += contact.weight;
            self.weight[contact.index_b as usize] += contact.weight;
        }
    }

    /// Approximate each solid-group particle's distance to its group
    /// surface, in world units, by relaxing over intra-group contacts.
    ///
    /// Surface particles (weight < 0.8) seed at zero; everything else starts
    /// at infinity and shrinks. The iteration count is bounded by √N, the
    /// worst-case graph radius of a near-uniform blob.
    pub fn compute_depth(&mut self) {
        self.request_depth_buffer();
        let mut contact_groups: Vec<ParticleContact> = Vec::with_capacity(self.contacts.len());
        for contact in &self.contacts {
            let a = contact.index_a;
            let b = contact.index_b;
            if let (Some(ga), Some(gb)) = (self.group[a as usize], self.group[b as usize]) {
                if ga == gb
                    && self.group_ref(ga).group_flags & group_flags::NEEDS_UPDATE_DEPTH != 0
                {
                    contact_groups.push(*contact);
                }
            }
        }
        let mut groups_to_update = Vec::new();
        for id in self.collect_group_ids() {
            let g = self.group_ref(id);
            if g.group_flags & group_flags::NEEDS_UPDATE_DEPTH != 0 {
                let (first, last) = (g.first, g.last);
                let cleared = g.group_flags & !group_flags::NEEDS_UPDATE_DEPTH;
                groups_to_update.push(id);
                self.set_group_flags_internal(id, cleared);
                for i in first..last {
                    self.accumulation[i as usize] = 0.0;
                }
            }
        }
        for &id in &groups_to_update {
            let (first, last) = {
                let g = self.group_ref(id);
                (g.first, g.last)
            };
            for i in first..last {
                let w = self.weight[i as usize];
                self.depth[i as usize] = if w < 0.8 { 0.0 } else { f32::MAX };
            }
        }
        let iteration_count = (self.count as f32).sqrt() as i32;
        for _ in 0..iteration_count {
            let mut updated = false;
            for contact in &contact_groups {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let r = 1.0 - contact.weight;
                let ap0 = self.depth[a];
                let bp0 = self.depth[b];
                let ap1 = bp0 + r;
                let bp1 = ap0 + r;
                if ap0 > ap1 {
                    self.depth[a] = ap1;
                    updated = true;
                }
                if bp0 > bp1 {
                    self.depth[b] = bp1;
                    updated = true;
                }
            }
            if !updated {
                break;
            }
        }
        for &id in &groups_to_update {
            let (first, last) = {
                let g = self.group_ref(id);
                (g.first, g.last)
            };
            for i in first..last {
                let p = &mut self.depth[i as usize];
                if *p < f32::MAX {
                    *p *= self.particle_diameter;
                } else {
                    *p = 0.0;
                }
            }
        }
    }

    // ---- force passes ----

    fn solve_gravity<W: RigidWorld>(&mut self, world: &W, step: &TimeStep) {
        let gravity = step.dt * self.def.gravity_scale * world.gravity();
        for i in 0..self.count as usize {
            self.velocity.data[i] += gravity;
        }
    }

    /// Jacobi-relax the static pressure field over contacts:
    /// `p_i = (Σ_j p_j·w_ij + strength·(w_i - min_weight)) / (w_i + relaxation)`.
    fn solve_static_pressure(&mut self, step: &TimeStep) {
        self.request_static_pressure_buffer();
        let critical_pressure = self.critical_pressure(step);
        let pressure_per_weight = self.def.static_pressure_strength * critical_pressure;
        let max_pressure = MAX_PARTICLE_PRESSURE * critical_pressure;
        let relaxation = self.def.static_pressure_relaxation;
        for _ in 0..self.def.static_pressure_iterations {
            for acc in &mut self.accumulation[..self.count as usize] {
                *acc = 0.0;
            }
            for contact in &self.contacts {
                if contact.flags & flags::STATIC_PRESSURE != 0 {
                    let a = contact.index_a as usize;
                    let b = contact.index_b as usize;
                    let w = contact.weight;
                    self.accumulation[a] += w * self.static_pressure[b];
                    self.accumulation[b] += w * self.static_pressure[a];
                }
            }
            for i in 0..self.count as usize {
                let w = self.weight[i];
                if self.flags.data[i] & flags::STATIC_PRESSURE != 0 {
                    let wh = self.accumulation[i];
                    let h = (wh + pressure_per_weight * (w - MIN_PARTICLE_WEIGHT))
                        / (w + relaxation);
                    self.static_pressure[i] = h.clamp(0.0, max_pressure);
                } else {
                    self.static_pressure[i] = 0.0;
                }
            }
        }
    }

    /// Pressure as a linear function of excess weight, applied along contact
    /// normals and split with rigid bodies by reduced mass.
    fn solve_pressure<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        let critical_pressure = self.critical_pressure(step);
        let pressure_per_weight = self.def.pressure_strength * critical_pressure;
        let max_pressure = MAX_PARTICLE_PRESSURE * critical_pressure;
        for i in 0..self.count as usize {
            let w = self.weight[i];
            let h = pressure_per_weight * (w - MIN_PARTICLE_WEIGHT).max(0.0);
            self.accumulation[i] = h.min(max_pressure);
        }
        // Particles with their own repulsive pass opt out of pressure.
        if self.all_particle_flags & NO_PRESSURE_FLAGS != 0 {
            for i in 0..self.count as usize {
                if self.flags.data[i] & NO_PRESSURE_FLAGS != 0 {
                    self.accumulation[i] = 0.0;
                }
            }
        }
        if self.all_particle_flags & flags::STATIC_PRESSURE != 0 {
            debug_assert!(!self.static_pressure.is_empty());
            for i in 0..self.count as usize {
                if self.flags.data[i] & flags::STATIC_PRESSURE != 0 {
                    self.accumulation[i] += self.static_pressure[i];
                }
            }
        }
        let velocity_per_pressure = step.dt / (self.def.density * self.particle_diameter);
        let inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contacts.len() {
            let contact = self.body_contacts[k];
            let a = contact.index as usize;
            let p = self.position.data[a];
            let h = self.accumulation[a] + pressure_per_weight * contact.weight;
            let f = velocity_per_pressure * contact.weight * contact.mass * h * contact.normal;
            self.velocity.data[a] -= inv_mass * f;
            world.apply_linear_impulse(contact.body, f, p);
        }
        for contact in &self.contacts {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let h = self.accumulation[a] + self.accumulation[b];
            let f = velocity_per_pressure * contact.weight * h * contact.normal;
            self.velocity.data[a] -= f;
            self.velocity.data[b] += f;
        }
    }

    /// Kill approaching normal velocity at contacts, capped at 50% per
    /// sub-step; the quadratic term dominates for fast approaches.
    fn solve_damping<W: RigidWorld>(&mut self, world: &mut W, step: &TimeStep) {
        let linear_damping = self.def.damping_strength;
        let quadratic_damping = 1.0 / self.critical_velocity(step);
        let inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contacts.len() {
            let contact = self.body_contacts[k];
            let a = contact.index as usize;
            let p = self.position.data[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity.data[a];
            let vn = v.dot(contact.normal);
            if vn < 0.0 {
                let damping =
                    (linear_damping * contact.weight).max((-quadratic_damping * vn).min(0.5));
                let f = damping * contact.mass * vn * contact.normal;
                self.velocity.data[a] += inv_mass * f;
                world.apply_linear_impulse(contact.body, -f, p);
            }
        }
        for contact in &self.contacts {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let v = self.velocity.data[b] - self.velocity.data[a];
            let vn = v.dot(contact.normal);
            if vn < 0.0 {
                let damping =
                    (linear_damping * contact.weight).max((-quadratic_damping * vn).min(0.5));
                let f = damping * vn * contact.normal;
                self.velocity.data[a] += f;
                self.velocity.data[b] -= f;
            }
        }
    }

    /// A second half-strength damping pass against bodies, for particle
    /// kinds that build strong repulsion and would otherwise ring.
    fn solve_extra_damping<W: RigidWorld>(&mut self, world: &mut W) {
        let inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contacts.len() {
            let contact = self.body_contacts[k];
            let a = contact.index as usize;
            if self.flags.data[a] & EXTRA_DAMPING_FLAGS == 0 {
                continue;
            }
            let p = self.position.data[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity.data[a];
            let vn = v.dot(contact.normal);
            if vn < 0.0 {
                let f = 0.5 * contact.mass * vn * contact.normal;
                self.velocity.data[a] += inv_mass * f;
                world.apply_linear_impulse(contact.body, -f, p);
            }
        }
    }

    fn solve_wall(&mut self) {
        for i in 0..self.count as usize {
            if self.flags.data[i] & flags::WALL != 0 {
                self.velocity.data[i] = Vec2::ZERO;
            }
        }
    }

    /// Overwrite each rigid group's particle velocities with the group's
    /// rigid motion, and advance the group transform.
    fn solve_rigid(&mut self, step: &TimeStep) {
        for id in self.collect_group_ids() {
            if self.group_ref(id).group_flags & group_flags::RIGID == 0 {
                continue;
            }
            self.update_group_statistics(id);
            let transform = self.rigid_incremental_transform(id, step.dt);
            let new_transform = transform.mul(self.group_ref(id).transform);
            let (first, last) = {
                let g = self.group_mut(id);
                g.transform = new_transform;
                (g.first, g.last)
            };
            // The per-particle velocity is the finite difference of the
            // incremental transform, expressed as one (non-unit) transform
            // application per particle.
            let velocity_transform = Transform {
                p: step.inv_dt * transform.p,
                q: Rot {
                    s: step.inv_dt * transform.q.s,
                    c: step.inv_dt * (transform.q.c - 1.0),
                },
            };
            for i in first..last {
                let i = i as usize;
                self.velocity.data[i] = velocity_transform.apply(self.position.data[i]);
            }
        }
    }

    /// Nudge each elastic triad's particles toward the best-fit rotation of
    /// its rest configuration.
    fn solve_elastic(&mut self, step: &TimeStep) {
        let elastic_strength = step.inv_dt * self.def.elastic_strength;
        for k in 0..self.triads.len() {
            let triad = self.triads[k];
            if triad.flags & flags::ELASTIC == 0 {
                continue;
            }
            let a = triad.index_a as usize;
            let b = triad.index_b as usize;
            let c = triad.index_c as usize;
            let (oa, ob, oc) = (triad.pa, triad.pb, triad.pc);
            let mut pa = self.position.data[a];
            let mut pb = self.position.data[b];
            let mut pc = self.position.data[c];
            let va = self.velocity.data[a];
            let vb = self.velocity.data[b];
            let vc = self.velocity.data[c];
            pa += step.dt * va;
            pb += step.dt * vb;
            pc += step.dt * vc;
            let midpoint = (pa + pb + pc) / 3.0;
            pa -= midpoint;
            pb -= midpoint;
            pc -= midpoint;
            let mut r = Rot {
                s: oa.perp_dot(pa) + ob.perp_dot(pb) + oc.perp_dot(pc),
                c: oa.dot(pa) + ob.dot(pb) + oc.dot(pc),
            };
            let r2 = r.s * r.s + r.c * r.c;
            let inv_r = 1.0 / r2.sqrt();
            r.s *= inv_r;
            r.c *= inv_r;
            let strength = elastic_strength * triad.strength;
            self.velocity.data[a] = va + strength * (r.apply(oa) - pa);
            self.velocity.data[b] = vb + strength * (r.apply(ob) - pb);
            self.velocity.data[c] = vc + strength * (r.apply(oc) - pc);
        }
    }

    /// Pull each spring pair back toward its rest distance along the
    /// predicted pair axis.
    fn solve_spring(&mut self, step: &TimeStep) {
        let spring_strength = step.inv_dt * self.def.spring_strength;
        for k in 0..self.pairs.len() {
            let pair = self.pairs[k];
            if pair.flags & flags::SPRING == 0 {
                continue;
            }
            let a = pair.index_a as usize;
            let b = pair.index_b as usize;
            let mut pa = self.position.data[a];
            let mut pb = self.position.data[b];
            let va = self.velocity.data[a];
            let vb = self.velocity.data[b];
            pa += step.dt * va;
            pb += step.dt * vb;
            let d = pb - pa;
            let r0 = pair.distance;
            let r1 = d.length();
            let strength = spring_strength * pair.strength;
            let f = strength * (r0 - r1) / r1 * d;
            self.velocity.data[a] = va - f;
            self.velocity.data[b] = vb + f;
        }
    }

    /// Two-pass surface tension: accumulate weighted surface normals, then
    /// apply a force combining excess density and normal alignment.
    fn solve_tensile(&mut self, step: &TimeStep) {
        debug_assert!(!self.accumulation2.is_empty());
        for acc in &mut self.accumulation2[..self.count as usize] {
            *acc = Vec2::ZERO;
        }
        for contact in &self.contacts {
            if contact.flags & flags::TENSILE != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let w = contact.weight;
                let weighted_normal = (1.0 - w) * w * contact.normal;
                self.accumulation2[a] -= weighted_normal;
                self.accumulation2[b] += weighted_normal;
            }
        }
        let critical_velocity = self.critical_velocity(step);
        let pressure_strength =
            self.def.surface_tension_pressure_strength * critical_velocity;
        let normal_strength = self.def.surface_tension_normal_strength * critical_velocity;
        for contact in &self.contacts {
            if contact.flags & flags::TENSILE != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let w = contact.weight;
                let n = contact.normal;
                let h = self.weight[a] + self.weight[b];
                let s = self.accumulation2[b] - self.accumulation2[a];
                let fn_ = (pressure_strength * (h - 2.0) + normal_strength * s.dot(n)) * w;
                let f = fn_ * n;
                self.velocity.data[a] -= f;
                self.velocity.data[b] += f;
            }
        }
    }

    /// Laplacian smoothing of velocity over contacts and body contacts.
    fn solve_viscous<W: RigidWorld>(&mut self, world: &mut W) {
        let viscous_strength = self.def.viscous_strength;
        let inv_mass = self.particle_inv_mass();
        for k in 0..self.body_contacts.len() {
            let contact = self.body_contacts[k];
            let a = contact.index as usize;
            if self.flags.data[a] & flags::VISCOUS == 0 {
                continue;
            }
            let p = self.position.data[a];
            let v = world.linear_velocity_from_world_point(contact.body, p)
                - self.velocity.data[a];
            let f = viscous_strength * contact.mass * contact.weight * v;
            self.velocity.data[a] += inv_mass * f;
            world.apply_linear_impulse(contact.body, -f, p);
        }
        for contact in &self.contacts {
            if contact.flags & flags::VISCOUS != 0 {
                let a = contact.index_a as usize;
                let b = contact.index_b as usize;
                let v = self.velocity.data[b] - self.velocity.data[a];
                let f = viscous_strength * contact.weight * v;
                self.velocity.data[a] += f;
                self.velocity.data[b] -= f;
            }
        }
    }

    /// Short-range repulsion that only engages once particles overlap more
    /// than the emission stride allows.
    fn solve_powder(&mut self, step: &TimeStep) {
        let powder_strength = self.def.powder_strength * self.critical_velocity(step);
        let min_weight = 1.0 - PARTICLE_STRIDE;
        for contact in &self.contacts {
            if contact.flags & flags::POWDER != 0 {
                let w = contact.weight;
                if w > min_weight {
                    let a = contact.index_a as usize;
                    let b = contact.index_b as usize;
                    let f = powder_strength * (w - min_weight) * contact.normal;
                    self.velocity.data[a] -= f;
                    self.velocity.data[b] += f;
                }
            }
        }
    }

    /// Extra repulsion ejecting particles that ended up inside a foreign
    /// solid group, scaled by how deep they are.
    fn solve_solid(&mut self, step: &TimeStep) {
        debug_assert!(!self.depth.is_empty());
        let ejection_strength = step.inv_dt * self.def.ejection_strength;
        for contact in &self.contacts {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            if self.group[a] != self.group[b] {
                let h = self.depth[a] + self.depth[b];
                let f = ejection_strength * h * contact.weight * contact.normal;
                self.velocity.data[a] -= f;
                self.velocity.data[b] += f;
            }
        }
    }

    fn solve_color_mixing(&mut self) {
        debug_assert!(!self.color.data.is_empty());
        let color_mixing128 = (128.0 * self.def.color_mixing_strength) as i32;
        if color_mixing128 == 0 {
            return;
        }
        for k in 0..self.contacts.len() {
            let contact = self.contacts[k];
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            if self.flags.data[a] & self.flags.data[b] & flags::COLOR_MIXING != 0 {
                let mut ca = self.color.data[a];
                let mut cb = self.color.data[b];
                ParticleColor::mix(&mut ca, &mut cb, color_mixing128);
                self.color.data[a] = ca;
                self.color.data[b] = cb;
            }
        }
    }

    /// Clamp every velocity to one diameter per sub-step.
    fn limit_velocity(&mut self, step: &TimeStep) {
        let critical_velocity_squared = self.critical_velocity_squared(step);
        for v in &mut self.velocity.data[..self.count as usize] {
            let v2 = v.length_squared();
            if v2 > critical_velocity_squared {
                *v *= (critical_velocity_squared / v2).sqrt();
            }
        }
    }

    /// Stop particles from slipping between paired barrier particles: any
    /// particle predicted to cross the pair segment within the look-ahead
    /// window has its velocity replaced by the segment's own velocity at the
    /// crossing point.
    fn solve_barrier(&mut self, step: &TimeStep) {
        for i in 0..self.count {
            let fl = self.flags.data[i as usize];
            if fl & flags::BARRIER != 0 {
                if fl & flags::WALL != 0 {
                    self.velocity.data[i as usize] = Vec2::ZERO;
                    continue;
                }
                if let Some(id) = self.group[i as usize] {
                    if self.group_ref(id).group_flags & group_flags::RIGID != 0 {
                        let p = self.position.data[i as usize];
                        let v = self.group_linear_velocity_from_world_point(id, p);
                        self.velocity.data[i as usize] = v;
                    }
                }
            }
        }
        let tmax = BARRIER_COLLISION_TIME * step.dt;
        for k in 0..self.pairs.len() {
            let pair = self.pairs[k];
            if pair.flags & flags::BARRIER == 0 {
                continue;
            }
            let a = pair.index_a;
            let b = pair.index_b;
            let pa = self.position.data[a as usize];
            let pb = self.position.data[b as usize];
            let mut aabb = Aabb::new(pa.min(pb), pa.max(pb));
            aabb.extend(self.particle_diameter);
            let (first, last) = self.proxy_range(aabb.lower, aabb.upper);
            let va = self.velocity.data[a as usize];
            let vb = self.velocity.data[b as usize];
            let pba = pb - pa;
            let vba = vb - va;
            for p in first..last {
                let c = self.proxies[p].index;
                let pc = self.position.data[c as usize];
                if !aabb.contains(pc)
                    || self.group[a as usize] == self.group[c as usize]
                    || self.group[b as usize] == self.group[c as usize]
                {
                    continue;
                }
                let vc = self.velocity.data[c as usize];
                // Solve (1-s)·(pa+t·va) + s·(pb+t·vb) = pc+t·vc: particle c
                // meets the segment at time t, at parameter s along it.
                let pca = pc - pa;
                let vca = vc - va;
                let e2 = vba.perp_dot(vca);
                let e1 = pba.perp_dot(vca) - pca.perp_dot(vba);
                let e0 = pba.perp_dot(pca);
                let param_at = |t: f32| -> f32 {
                    let qba = pba + t * vba;
                    let qca = pca + t * vca;
                    qba.dot(qca) / qba.dot(qba)
                };
                let s;
                if e2 == 0.0 {
                    if e1 == 0.0 {
                        continue;
                    }
                    let t = -e0 / e1;
                    if t < 0.0 || t > tmax {
                        continue;
                    }
                    let s0 = param_at(t);
                    if !(0.0..=1.0).contains(&s0) {
                        continue;
                    }
                    s = s0;
                } else {
                    let det = e1 * e1 - 4.0 * e0 * e2;
                    if det < 0.0 {
                        continue;
                    }
                    let sqrt_det = det.sqrt();
                    let mut t1 = (-e1 - sqrt_det) / (2.0 * e2);
                    let mut t2 = (-e1 + sqrt_det) / (2.0 * e2);
                    if t1 > t2 {
                        std::mem::swap(&mut t1, &mut t2);
                    }
                    let s1 = param_at(t1);
                    if t1 >= 0.0 && t1 <= tmax && (0.0..=1.0).contains(&s1) {
                        s = s1;
                    } else {
                        if t2 < 0.0 || t2 > tmax {
                            continue;
                        }
                        let s2 = param_at(t2);
                        if !(0.0..=1.0).contains(&s2) {
                            continue;
                        }
                        s = s2;
                    }
                }
                self.velocity.data[c as usize] = va + s * vba;
            }
        }
    }

    // ---- compaction ----

    /// Physically remove every zombie particle, preserving survivor order,
    /// and rewrite every structural index. Groups that lost their whole
    /// range are destroyed unless they may be empty; modified solid groups
    /// get their depth field rescheduled.
    pub fn solve_zombie(&mut self) {
        let mut new_count: i32 = 0;
        let mut new_indices = vec![INVALID_PARTICLE_INDEX; self.count as usize];
        let mut all_particle_flags = 0;
        let mut listener = self.destruction_listener.take();
        for i in 0..self.count as usize {
            let particle_flags = self.flags.data[i];
            if particle_flags & flags::ZOMBIE != 0 {
                if particle_flags & flags::DESTRUCTION_LISTENER != 0 {
                    if let Some(l) = listener.as_mut() {
                        l.goodbye_particle(i as i32);
                    }
                }
                new_indices[i] = INVALID_PARTICLE_INDEX;
            } else {
                new_indices[i] = new_count;
                if i as i32 != new_count {
                    let j = new_count as usize;
                    self.flags.data[j] = self.flags.data[i];
                    self.position.data[j] = self.position.data[i];
                    self.velocity.data[j] = self.velocity.data[i];
                    self.group[j] = self.group[i];
                    if !self.static_pressure.is_empty() {
                        self.static_pressure[j] = self.static_pressure[i];
                    }
                    if !self.depth.is_empty() {
                        self.depth[j] = self.depth[i];
                    }
                    if !self.color.data.is_empty() {
                        self.color.data[j] = self.color.data[i];
                    }
                    if !self.user_data.data.is_empty() {
                        self.user_data.data[j] = self.user_data.data[i];
                    }
                }
                new_count += 1;
                all_particle_flags |= particle_flags;
            }
        }
        self.destruction_listener = listener;

        for proxy in &mut self.proxies {
            proxy.index = new_indices[proxy.index as usize];
        }
        self.proxies.retain(|p| p.index >= 0);

        for contact in &mut self.contacts {
            contact.index_a = new_indices[contact.index_a as usize];
            contact.index_b = new_indices[contact.index_b as usize];
        }
        self.contacts.retain(|c| c.index_a >= 0 && c.index_b >= 0);

        for contact in &mut self.body_contacts {
            contact.index = new_indices[contact.index as usize];
        }
        self.body_contacts.retain(|c| c.index >= 0);

        for pair in &mut self.pairs {
            pair.index_a = new_indices[pair.index_a as usize];
            pair.index_b = new_indices[pair.index_b as usize];
        }
        self.pairs.retain(|p| p.index_a >= 0 && p.index_b >= 0);

        for triad in &mut self.triads {
            triad.index_a = new_indices[triad.index_a as usize];
            triad.index_b = new_indices[triad.index_b as usize];
            triad.index_c = new_indices[triad.index_c as usize];
        }
        self.triads
            .retain(|t| t.index_a >= 0 && t.index_b >= 0 && t.index_c >= 0);

        for id in self.collect_group_ids() {
            let (old_first, old_last, old_flags) = {
                let g = self.group_ref(id);
                (g.first, g.last, g.group_flags)
            };
            let mut first_index = new_count;
            let mut last_index = 0;
            let mut modified = false;
            for i in old_first..old_last {
                let j = new_indices[i as usize];
                if j >= 0 {
                    first_index = first_index.min(j);
                    last_index = last_index.max(j + 1);
                } else {
                    modified = true;
                }
            }
            if first_index < last_index {
                {
                    let g = self.group_mut(id);
                    g.first = first_index;
                    g.last = last_index;
                }
                if modified && old_flags & group_flags::SOLID != 0 {
                    self.set_group_flags_internal(
                        id,
                        old_flags | group_flags::NEEDS_UPDATE_DEPTH,
                    );
                }
            } else {
                {
                    let g = self.group_mut(id);
                    g.first = 0;
                    g.last = 0;
                }
                if old_flags & group_flags::CAN_BE_EMPTY == 0 {
                    self.set_group_flags_internal(
                        id,
                        old_flags | group_flags::WILL_BE_DESTROYED,
                    );
                }
            }
        }

        let removed = self.count - new_count;
        self.count = new_count;
        self.all_particle_flags = all_particle_flags;
        self.needs_update_all_particle_flags = false;
        if removed > 0 {
            log::trace!("compacted {removed} zombie particles, {new_count} remain");
        }

        for id in self.collect_group_ids() {
            if self.group_ref(id).group_flags & group_flags::WILL_BE_DESTROYED != 0 {
                self.destroy_group(id);
            }
        }
    }
}
