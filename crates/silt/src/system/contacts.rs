//! Neighbor index maintenance and contact construction.
//!
//! `update_contacts` re-tags and sorts the proxy array, then sweeps it
//! forward: for each proxy, peers in the same cell row (up to one cell to
//! the right) and in the next row's window are contact candidates. A lagging
//! cursor tracks the start of the next-row window so the whole enumeration
//! is a single pass. `add_contact` keeps only candidates strictly closer
//! than one diameter.
//!
//! Body contacts come from the rigid world's broad phase: the fixture set
//! overlapping the particle bounds is collected, then each child shape's
//! AABB is mapped back onto the proxy array with two binary searches.

use glam::Vec2;
use std::cmp::Ordering;

use crate::constants::LINEAR_SLOP;
use crate::contact::{compute_tag, relative_tag, BodyContact, ParticleContact};
use crate::math::{Aabb, Transform};
use crate::particle::flags;
use crate::shape::Shape;
use crate::system::ParticleSystem;
use crate::world::{RayCastInput, RigidWorld};

/// Body contacts kept per particle by the strict filter, nearest first.
const MAX_STRICT_CONTACTS_PER_POINT: i32 = 3;

impl ParticleSystem {
    /// Rebuild the particle-particle contact list from current positions.
    ///
    /// With `except_zombie`, contacts touching a zombie particle are dropped
    /// before returning (used when forming structural bonds, where stale
    /// endpoints must not leak into pairs or triads).
    pub fn update_contacts(&mut self, except_zombie: bool) {
        let inverse_diameter = self.inverse_diameter;
        for proxy in &mut self.proxies {
            let p = self.position.data[proxy.index as usize];
            proxy.tag = compute_tag(inverse_diameter * p.x, inverse_diameter * p.y);
        }
        self.proxies.sort_unstable();
        self.contacts.clear();
        let n = self.proxies.len();
        let mut bottom_left = 0;
        for a in 0..n {
            let (tag_a, index_a) = (self.proxies[a].tag, self.proxies[a].index);
            let right_tag = relative_tag(tag_a, 1, 0);
            for b in (a + 1)..n {
                if right_tag < self.proxies[b].tag {
                    break;
                }
                self.add_contact(index_a, self.proxies[b].index);
            }
            let bottom_left_tag = relative_tag(tag_a, -1, 1);
            while bottom_left < n {
                if bottom_left_tag <= self.proxies[bottom_left].tag {
                    break;
                }
                bottom_left += 1;
            }
            let bottom_right_tag = relative_tag(tag_a, 1, 1);
            for b in bottom_left..n {
                if bottom_right_tag < self.proxies[b].tag {
                    break;
                }
                self.add_contact(index_a, self.proxies[b].index);
            }
        }
        if except_zombie {
            self.contacts.retain(|c| c.flags & flags::ZOMBIE == 0);
        }
    }

    /// Record a contact if the two particles are strictly closer than one
    /// diameter. Stored with `index_a < index_b` and the normal pointing
    /// from A to B.
    fn add_contact(&mut self, a: i32, b: i32) {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let d = self.position.data[b as usize] - self.position.data[a as usize];
        let dist_sq = d.length_squared();
        if dist_sq < self.squared_diameter {
            let inv_d = 1.0 / dist_sq.sqrt();
            self.contacts.push(ParticleContact {
                index_a: a,
                index_b: b,
                flags: self.flags.data[a as usize] | self.flags.data[b as usize],
                weight: 1.0 - dist_sq * inv_d * self.inverse_diameter,
                normal: inv_d * d,
            });
        }
    }

    /// Proxy index range whose tags may fall inside `aabb`. Candidates still
    /// need an exact position check.
    pub(crate) fn proxy_range(&self, lower: Vec2, upper: Vec2) -> (usize, usize) {
        let lower_tag = compute_tag(
            self.inverse_diameter * lower.x,
            self.inverse_diameter * lower.y,
        );
        let upper_tag = compute_tag(
            self.inverse_diameter * upper.x,
            self.inverse_diameter * upper.y,
        );
        let first = self.proxies.partition_point(|p| p.tag < lower_tag);
        let last = first + self.proxies[first..].partition_point(|p| p.tag <= upper_tag);
        (first, last)
    }

    /// Rebuild the particle-body contact list by querying the rigid world
    /// for fixtures near the particle population.
    pub fn update_body_contacts<W: RigidWorld>(&mut self, world: &W) {
        let mut aabb = Aabb::EMPTY;
        for i in 0..self.count as usize {
            aabb.combine_point(self.position.data[i]);
        }
        aabb.extend(self.particle_diameter);
        self.body_contacts.clear();

        let mut fixtures = std::mem::take(&mut self.fixture_scratch);
        fixtures.clear();
        world.query_aabb(&aabb, &mut |fixture| {
            fixtures.push(fixture);
            true
        });

        let inv_particle_mass = self.particle_inv_mass();
        for &fixture in &fixtures {
            if world.is_sensor(fixture) {
                continue;
            }
            let body = world.body_of(fixture);
            let state = world.body_state(body);
            let body_mass = state.mass;
            let body_inertia = state.inertia - body_mass * state.local_center.length_squared();
            let inv_body_mass = if body_mass > 0.0 { 1.0 / body_mass } else { 0.0 };
            let inv_body_inertia = if body_inertia > 0.0 {
                1.0 / body_inertia
            } else {
                0.0
            };
            for child in 0..world.child_count(fixture) {
                let mut child_aabb = world.child_aabb(fixture, child);
                child_aabb.extend(self.particle_diameter);
                let (first, last) = self.proxy_range(child_aabb.lower, child_aabb.upper);
                for k in first..last {
                    let a = self.proxies[k].index;
                    let ap = self.position.data[a as usize];
                    if !child_aabb.contains(ap) {
                        continue;
                    }
                    let (distance, normal) = world.compute_distance(fixture, ap, child);
                    if distance < self.particle_diameter {
                        let inv_am = if self.flags.data[a as usize] & flags::WALL != 0 {
                            0.0
                        } else {
                            inv_particle_mass
                        };
                        let rp = ap - state.world_center;
                        let rpn = rp.perp_dot(normal);
                        let inv_m = inv_am + inv_body_mass + inv_body_inertia * rpn * rpn;
                        self.body_contacts.push(BodyContact {
                            index: a,
                            body,
                            fixture,
                            weight: 1.0 - distance * self.inverse_diameter,
                            normal: -normal,
                            mass: if inv_m > 0.0 { 1.0 / inv_m } else { 0.0 },
                        });
                    }
                }
            }
        }
        fixtures.clear();
        self.fixture_scratch = fixtures;

        if self.def.strict_contact_check {
            self.remove_spurious_body_contacts(world);
        }
    }

    /// Prune body contacts whose normal cannot correspond to a real surface.
    ///
    /// The broad phase reports every overlapping fixture, which breaks down
    /// at seams between adjacent shapes (a floor tiled from several boxes):
    /// the neighbor tile reports a corner-ish normal that would kick the
    /// particle sideways. Back-projecting the contact point along the stored
    /// normal must land inside the generating fixture; contacts that fail
    /// are discarded, and only the nearest few per particle are considered
    /// at all.
    fn remove_spurious_body_contacts<W: RigidWorld>(&mut self, world: &W) {
        self.body_contacts.sort_by(|l, r| {
            l.index.cmp(&r.index).then_with(|| {
                r.weight
                    .partial_cmp(&l.weight)
                    .unwrap_or(Ordering::Equal)
            })
        });
        let diameter = self.particle_diameter;
        let positions = &self.position.data;
        let mut last_index = -1;
        let mut kept_for_particle = 0;
        self.body_contacts.retain(|contact| {
            if contact.index != last_index {
                kept_for_particle = 0;
                last_index = contact.index;
            }
            kept_for_particle += 1;
            if kept_for_particle > MAX_STRICT_CONTACTS_PER_POINT {
                return false;
            }
            let projected = positions[contact.index as usize]
                + diameter * (1.0 - contact.weight) * contact.normal;
            world.test_point(contact.fixture, projected)
        });
    }

    /// Visit every particle strictly inside `aabb`. The callback returns
    /// `false` to stop the query.
    pub fn query_aabb(&self, aabb: &Aabb, mut callback: impl FnMut(i32) -> bool) {
        if self.proxies.is_empty() {
            return;
        }
        let (first, last) = self.proxy_range(aabb.lower, aabb.upper);
        for k in first..last {
            let i = self.proxies[k].index;
            if aabb.strictly_contains(self.position.data[i as usize]) && !callback(i) {
                break;
            }
        }
    }

    /// AABB query over a shape placed by `xf`.
    pub fn query_shape_aabb(
        &self,
        shape: &Shape,
        xf: &Transform,
        callback: impl FnMut(i32) -> bool,
    ) {
        let aabb = shape.compute_aabb_transformed(xf);
        self.query_aabb(&aabb, callback);
    }

    /// Cast a segment against every particle disc it crosses.
    ///
    /// The callback receives `(index, point, normal, fraction)` and returns
    /// a new maximum fraction: return the reported fraction to clip the ray,
    /// 0 to terminate, or 1 to keep scanning unclipped. Particles are
    /// reported in proxy order, not in fraction order.
    pub fn ray_cast(
        &self,
        point1: Vec2,
        point2: Vec2,
        mut callback: impl FnMut(i32, Vec2, Vec2, f32) -> f32,
    ) {
        if self.proxies.is_empty() {
            return;
        }
        let lower_tag = compute_tag(
            self.inverse_diameter * point1.x.min(point2.x) - 1.0,
            self.inverse_diameter * point1.y.min(point2.y) - 1.0,
        );
        let upper_tag = compute_tag(
            self.inverse_diameter * point1.x.max(point2.x) + 1.0,
            self.inverse_diameter * point1.y.max(point2.y) + 1.0,
        );
        let first = self.proxies.partition_point(|p| p.tag < lower_tag);
        let last = first + self.proxies[first..].partition_point(|p| p.tag <= upper_tag);
        let mut fraction = 1.0f32;
        // Solving |(1-t)·point1 + t·point2 - center|² = diameter² for the
        // smaller root in [0, fraction].
        let v = point2 - point1;
        let v2 = v.dot(v);
        for k in first..last {
            let i = self.proxies[k].index;
            let p = point1 - self.position.data[i as usize];
            let pv = p.dot(v);
            let p2 = p.dot(p);
            let determinant = pv * pv - v2 * (p2 - self.squared_diameter);
            if determinant < 0.0 {
                continue;
            }
            let sqrt_determinant = determinant.sqrt();
            let mut t = (-pv - sqrt_determinant) / v2;
            if t > fraction {
                continue;
            }
            if t < 0.0 {
                t = (-pv + sqrt_determinant) / v2;
                if t < 0.0 || t > fraction {
                    continue;
                }
            }
            let n = (p + t * v).normalize_or_zero();
            let f = callback(i, point1 + t * v, n, t);
            fraction = fraction.min(f);
            if fraction <= 0.0 {
                break;
            }
        }
    }

    /// Kinetic energy in approaching contact pairs; a cheap splash metric.
    pub fn compute_collision_energy(&self) -> f32 {
        let mut sum_v2 = 0.0;
        for contact in &self.contacts {
            let a = contact.index_a as usize;
            let b = contact.index_b as usize;
            let v = self.velocity.data[b] - self.velocity.data[a];
            let vn = v.dot(contact.normal);
            if vn < 0.0 {
                sum_v2 += vn * vn;
            }
        }
        0.5 * self.particle_mass() * sum_v2
    }

    /// Predicted-sweep continuous collision against rigid-world fixtures.
    ///
    /// Rays run from each particle's current position (swept along with the
    /// body on the first sub-step) to its predicted position; a hit rewrites
    /// the velocity so the particle lands [`LINEAR_SLOP`] outside the
    /// surface, and the reaction impulse goes to the body, discounted when
    /// the body is lighter than the fluid.
    pub(crate) fn solve_collision<W: RigidWorld>(
        &mut self,
        world: &mut W,
        step: &crate::world::TimeStep,
    ) {
        let mut aabb = Aabb::EMPTY;
        for i in 0..self.count as usize {
            let p1 = self.position.data[i];
            let p2 = p1 + step.dt * self.velocity.data[i];
            aabb.combine_point(p1);
            aabb.combine_point(p2);
        }

        let mut fixtures = std::mem::take(&mut self.fixture_scratch);
        fixtures.clear();
        world.query_aabb(&aabb, &mut |fixture| {
            fixtures.push(fixture);
            true
        });

        let particle_mass = self.particle_mass();
        for &fixture in &fixtures {
            if world.is_sensor(fixture) {
                continue;
            }
            let body = world.body_of(fixture);
            let state = world.body_state(body);
            let mut limit_body_velocity = false;
            for child in 0..world.child_count(fixture) {
                let mut child_aabb = world.child_aabb(fixture, child);
                child_aabb.extend(self.particle_diameter);
                let (first, last) = self.proxy_range(child_aabb.lower, child_aabb.upper);
                for k in first..last {
                    let a = self.proxies[k].index;
                    let ap = self.position.data[a as usize];
                    if !child_aabb.contains(ap) {
                        continue;
                    }
                    let av = self.velocity.data[a as usize];
                    // On the first sub-step, sweep the start point along
                    // with the body's own motion this world step so fast
                    // bodies do not tunnel through resting particles.
                    let p1 = if self.iteration_index == 0 {
                        state.transform.apply(state.transform0.apply_inv(ap))
                    } else {
                        ap
                    };
                    let input = RayCastInput {
                        p1,
                        p2: ap + step.dt * av,
                        max_fraction: 1.0,
                    };
                    if let Some(output) = world.ray_cast(fixture, child, &input) {
                        let p = (1.0 - output.fraction) * input.p1
                            + output.fraction * input.p2
                            + LINEAR_SLOP * output.normal;
                        let v = step.inv_dt * (p - ap);
                        self.velocity.data[a as usize] = v;
                        let mut f = particle_mass * (av - v);
                        f = f.dot(output.normal) * output.normal;
                        let density_ratio = world.density(fixture) * self.inverse_density;
                        if density_ratio < 1.0 {
                            f *= density_ratio;
                        }
                        world.apply_linear_impulse(body, f, p);
                        limit_body_velocity = true;
                    }
                }
            }
            if limit_body_velocity {
                // Cap the body's kinetic energy after particle impulses so
                // a light body in heavy fluid cannot be accelerated without
                // bound.
                let state = world.body_state(body);
                let m = state.mass;
                let i = state.inertia - m * state.local_center.length_squared();
                let v = state.linear_velocity;
                let w = state.angular_velocity;
                let energy = 0.5 * m * v.dot(v) + 0.5 * i * w * w;
                let energy_cap = m * self.critical_velocity_squared(step);
                if energy > energy_cap {
                    let s = energy_cap / energy;
                    world.set_linear_velocity(body, s * v);
                    world.set_angular_velocity(body, s * w);
                }
            }
        }
        fixtures.clear();
        self.fixture_scratch = fixtures;
    }
}
