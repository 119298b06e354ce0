//! The seam between the particle core and the surrounding rigid-body world.
//!
//! The core never owns rigid bodies. It sees fixtures and bodies as opaque
//! ids, reads body state as a snapshot, and mutates bodies through exactly
//! three operations (impulse, linear velocity, angular velocity). The
//! embedding world implements [`RigidWorld`]; the test suite implements it
//! with hand-rolled box and circle fixtures.

use glam::Vec2;

use crate::group::GroupId;
use crate::math::{Aabb, Transform};

/// Opaque rigid body handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyId(pub u32);

/// Opaque fixture handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixtureId(pub u32);

/// Snapshot of the body fields the solver reads.
#[derive(Clone, Copy, Debug)]
pub struct BodyState {
    pub mass: f32,
    /// Rotational inertia about the body origin (center-of-mass inertia
    /// plus `mass * |local_center|²`).
    pub inertia: f32,
    pub local_center: Vec2,
    pub world_center: Vec2,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    /// Current transform.
    pub transform: Transform,
    /// Transform at the beginning of the enclosing world step. Used on the
    /// first sub-step to sweep particles along with moving bodies.
    pub transform0: Transform,
}

/// Ray segment from `p1` toward `p2`, clipped at `max_fraction`.
#[derive(Clone, Copy, Debug)]
pub struct RayCastInput {
    pub p1: Vec2,
    pub p2: Vec2,
    pub max_fraction: f32,
}

/// A ray hit: fraction along the segment and outward surface normal.
#[derive(Clone, Copy, Debug)]
pub struct RayCastOutput {
    pub fraction: f32,
    pub normal: Vec2,
}

/// Capabilities the particle core requires from the enclosing rigid-body
/// world.
pub trait RigidWorld {
    /// World gravity vector.
    fn gravity(&self) -> Vec2;

    /// Visit every fixture whose broad-phase AABB overlaps `aabb`. Return
    /// `false` from the visitor to stop early.
    fn query_aabb(&self, aabb: &Aabb, report: &mut dyn FnMut(FixtureId) -> bool);

    fn is_sensor(&self, fixture: FixtureId) -> bool;
    fn density(&self, fixture: FixtureId) -> f32;
    fn body_of(&self, fixture: FixtureId) -> BodyId;
    /// Number of child shapes (chain fixtures have one per segment).
    fn child_count(&self, fixture: FixtureId) -> i32;
    /// Broad-phase AABB of one child shape.
    fn child_aabb(&self, fixture: FixtureId, child: i32) -> Aabb;
    /// True when `point` is inside the fixture.
    fn test_point(&self, fixture: FixtureId, point: Vec2) -> bool;
    /// Signed distance from the child shape surface to `point`, and the
    /// outward normal at the nearest feature (pointing from the surface
    /// toward `point`).
    fn compute_distance(&self, fixture: FixtureId, point: Vec2, child: i32) -> (f32, Vec2);
    /// Ray cast against one child shape.
    fn ray_cast(&self, fixture: FixtureId, child: i32, input: &RayCastInput) -> Option<RayCastOutput>;

    fn body_state(&self, body: BodyId) -> BodyState;
    /// Velocity of the body material point at a world position.
    fn linear_velocity_from_world_point(&self, body: BodyId, point: Vec2) -> Vec2;

    fn apply_linear_impulse(&mut self, body: BodyId, impulse: Vec2, point: Vec2);
    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec2);
    fn set_angular_velocity(&mut self, body: BodyId, omega: f32);
}

/// Notified just before a particle or group is physically removed.
///
/// Particle notifications fire only for particles carrying
/// [`crate::particle::flags::DESTRUCTION_LISTENER`]; group notifications fire
/// for every destroyed group. Implementations must not call back into the
/// particle system.
pub trait DestructionListener {
    fn goodbye_particle(&mut self, index: i32);
    fn goodbye_group(&mut self, group: GroupId);
}

/// One step of the enclosing world.
#[derive(Clone, Copy, Debug)]
pub struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// Number of particle sub-steps per world step.
    pub particle_iterations: i32,
}

impl TimeStep {
    pub fn new(dt: f32, particle_iterations: i32) -> Self {
        Self {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            particle_iterations,
        }
    }
}
