//! A hand-rolled rigid world for exercising the particle-body coupling:
//! static and dynamic bodies with box and circle fixtures, exact distance
//! and ray math, and impulse recording.

#![allow(dead_code)]

use glam::Vec2;
use silt::{
    Aabb, BodyId, BodyState, FixtureId, RayCastInput, RayCastOutput, RigidWorld, Transform,
};

pub struct MockBody {
    pub mass: f32,
    /// About the center of mass; local centers are zero in this mock.
    pub inertia: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub transform: Transform,
    pub transform0: Transform,
    /// Every `(impulse, point)` the solver applied.
    pub impulses: Vec<(Vec2, Vec2)>,
}

impl MockBody {
    pub fn fixed() -> Self {
        Self {
            mass: 0.0,
            inertia: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            transform: Transform::IDENTITY,
            transform0: Transform::IDENTITY,
            impulses: Vec::new(),
        }
    }

    pub fn dynamic(mass: f32, inertia: f32, position: Vec2) -> Self {
        let transform = Transform::new(position, 0.0);
        Self {
            mass,
            inertia,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            transform,
            transform0: transform,
            impulses: Vec::new(),
        }
    }
}

pub enum MockShape {
    /// Solid axis-aligned box in world coordinates.
    Box(Aabb),
    Circle { center: Vec2, radius: f32 },
    /// A box that reports a scripted contact normal regardless of geometry;
    /// lets tests exercise the strict-contact back-projection prune.
    BogusNormalBox { aabb: Aabb, normal: Vec2 },
}

pub struct MockFixture {
    pub body: usize,
    pub shape: MockShape,
    pub density: f32,
    pub sensor: bool,
}

pub struct MockWorld {
    pub gravity: Vec2,
    pub bodies: Vec<MockBody>,
    pub fixtures: Vec<MockFixture>,
}

impl MockWorld {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            bodies: Vec::new(),
            fixtures: Vec::new(),
        }
    }

    pub fn add_body(&mut self, body: MockBody) -> usize {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    pub fn add_fixture(&mut self, body: usize, shape: MockShape, density: f32) -> FixtureId {
        self.fixtures.push(MockFixture {
            body,
            shape,
            density,
            sensor: false,
        });
        FixtureId((self.fixtures.len() - 1) as u32)
    }

    /// A ground slab with its top face at `top_y`.
    pub fn with_ground(gravity: Vec2, top_y: f32) -> Self {
        let mut world = Self::new(gravity);
        let body = world.add_body(MockBody::fixed());
        world.add_fixture(
            body,
            MockShape::Box(Aabb::new(
                Vec2::new(-100.0, top_y - 10.0),
                Vec2::new(100.0, top_y),
            )),
            1.0,
        );
        world
    }

    fn shape_aabb(shape: &MockShape) -> Aabb {
        match shape {
            MockShape::Box(aabb) | MockShape::BogusNormalBox { aabb, .. } => *aabb,
            MockShape::Circle { center, radius } => Aabb::new(
                *center - Vec2::splat(*radius),
                *center + Vec2::splat(*radius),
            ),
        }
    }
}

/// Signed distance and outward normal from an axis-aligned box.
fn box_distance(aabb: &Aabb, p: Vec2) -> (f32, Vec2) {
    if aabb.contains(p) {
        let left = p.x - aabb.lower.x;
        let right = aabb.upper.x - p.x;
        let bottom = p.y - aabb.lower.y;
        let top = aabb.upper.y - p.y;
        let min = left.min(right).min(bottom).min(top);
        let normal = if min == top {
            Vec2::Y
        } else if min == bottom {
            -Vec2::Y
        } else if min == right {
            Vec2::X
        } else {
            -Vec2::X
        };
        (-min, normal)
    } else {
        let clamped = p.clamp(aabb.lower, aabb.upper);
        let d = p - clamped;
        let distance = d.length();
        (distance, d / distance)
    }
}

/// Slab-method ray cast against a box; reports entry from outside only.
fn box_ray_cast(aabb: &Aabb, input: &RayCastInput) -> Option<RayCastOutput> {
    let p = input.p1;
    let d = input.p2 - input.p1;
    let mut tmin = f32::MIN;
    let mut tmax = f32::MAX;
    let mut normal = Vec2::ZERO;
    for axis in 0..2 {
        let (pa, da, lo, hi) = if axis == 0 {
            (p.x, d.x, aabb.lower.x, aabb.upper.x)
        } else {
            (p.y, d.y, aabb.lower.y, aabb.upper.y)
        };
        if da.abs() < 1e-12 {
            if pa < lo || pa > hi {
                return None;
            }
        } else {
            let inv = 1.0 / da;
            let mut t1 = (lo - pa) * inv;
            let mut t2 = (hi - pa) * inv;
            let mut sign = -1.0;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
                sign = 1.0;
            }
            if t1 > tmin {
                tmin = t1;
                normal = if axis == 0 {
                    Vec2::new(sign, 0.0)
                } else {
                    Vec2::new(0.0, sign)
                };
            }
            tmax = tmax.min(t2);
            if tmin > tmax {
                return None;
            }
        }
    }
    if tmin < 0.0 || tmin > input.max_fraction {
        return None;
    }
    Some(RayCastOutput {
        fraction: tmin,
        normal,
    })
}

fn circle_ray_cast(center: Vec2, radius: f32, input: &RayCastInput) -> Option<RayCastOutput> {
    let s = input.p1 - center;
    let b = s.length_squared() - radius * radius;
    let r = input.p2 - input.p1;
    let c = s.dot(r);
    let rr = r.length_squared();
    let sigma = c * c - rr * b;
    if sigma < 0.0 || rr < 1e-12 {
        return None;
    }
    let t = -(c + sigma.sqrt()) / rr;
    if (0.0..=input.max_fraction).contains(&t) {
        let normal = (s + t * r).normalize();
        Some(RayCastOutput {
            fraction: t,
            normal,
        })
    } else {
        None
    }
}

impl RigidWorld for MockWorld {
    fn gravity(&self) -> Vec2 {
        self.gravity
    }

    fn query_aabb(&self, aabb: &Aabb, report: &mut dyn FnMut(FixtureId) -> bool) {
        for (i, fixture) in self.fixtures.iter().enumerate() {
            let fa = Self::shape_aabb(&fixture.shape);
            let overlaps = fa.lower.x <= aabb.upper.x
                && aabb.lower.x <= fa.upper.x
                && fa.lower.y <= aabb.upper.y
                && aabb.lower.y <= fa.upper.y;
            if overlaps && !report(FixtureId(i as u32)) {
                return;
            }
        }
    }

    fn is_sensor(&self, fixture: FixtureId) -> bool {
        self.fixtures[fixture.0 as usize].sensor
    }

    fn density(&self, fixture: FixtureId) -> f32 {
        self.fixtures[fixture.0 as usize].density
    }

    fn body_of(&self, fixture: FixtureId) -> BodyId {
        BodyId(self.fixtures[fixture.0 as usize].body as u32)
    }

    fn child_count(&self, _fixture: FixtureId) -> i32 {
        1
    }

    fn child_aabb(&self, fixture: FixtureId, _child: i32) -> Aabb {
        Self::shape_aabb(&self.fixtures[fixture.0 as usize].shape)
    }

    fn test_point(&self, fixture: FixtureId, point: Vec2) -> bool {
        match &self.fixtures[fixture.0 as usize].shape {
            MockShape::Box(aabb) | MockShape::BogusNormalBox { aabb, .. } => aabb.contains(point),
            MockShape::Circle { center, radius } => {
                (point - *center).length_squared() <= radius * radius
            }
        }
    }

    fn compute_distance(&self, fixture: FixtureId, point: Vec2, _child: i32) -> (f32, Vec2) {
        match &self.fixtures[fixture.0 as usize].shape {
            MockShape::Box(aabb) => box_distance(aabb, point),
            MockShape::Circle { center, radius } => {
                let d = point - *center;
                let len = d.length();
                (len - radius, d / len)
            }
            MockShape::BogusNormalBox { aabb, normal } => {
                let (distance, _) = box_distance(aabb, point);
                (distance, *normal)
            }
        }
    }

    fn ray_cast(
        &self,
        fixture: FixtureId,
        _child: i32,
        input: &RayCastInput,
    ) -> Option<RayCastOutput> {
        match &self.fixtures[fixture.0 as usize].shape {
            MockShape::Box(aabb) | MockShape::BogusNormalBox { aabb, .. } => {
                box_ray_cast(aabb, input)
            }
            MockShape::Circle { center, radius } => circle_ray_cast(*center, *radius, input),
        }
    }

    fn body_state(&self, body: BodyId) -> BodyState {
        let b = &self.bodies[body.0 as usize];
        BodyState {
            mass: b.mass,
            inertia: b.inertia,
            local_center: Vec2::ZERO,
            world_center: b.transform.p,
            linear_velocity: b.linear_velocity,
            angular_velocity: b.angular_velocity,
            transform: b.transform,
            transform0: b.transform0,
        }
    }

    fn linear_velocity_from_world_point(&self, body: BodyId, point: Vec2) -> Vec2 {
        let b = &self.bodies[body.0 as usize];
        let r = point - b.transform.p;
        b.linear_velocity + Vec2::new(-b.angular_velocity * r.y, b.angular_velocity * r.x)
    }

    fn apply_linear_impulse(&mut self, body: BodyId, impulse: Vec2, point: Vec2) {
        let b = &mut self.bodies[body.0 as usize];
        b.impulses.push((impulse, point));
        if b.mass > 0.0 {
            b.linear_velocity += impulse / b.mass;
            if b.inertia > 0.0 {
                let r = point - b.transform.p;
                b.angular_velocity += r.perp_dot(impulse) / b.inertia;
            }
        }
    }

    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec2) {
        self.bodies[body.0 as usize].linear_velocity = velocity;
    }

    fn set_angular_velocity(&mut self, body: BodyId, omega: f32) {
        self.bodies[body.0 as usize].angular_velocity = omega;
    }
}

/// A world with gravity and nothing in it.
pub fn empty_world(gravity: Vec2) -> MockWorld {
    MockWorld::new(gravity)
}
