//! Silt - 2D particle fluid and soft-body engine core
//!
//! A population of small disc particles advanced under gravity,
//! inter-particle forces (pressure, viscosity, surface tension, elasticity,
//! springs, powder repulsion), rigid-group motion, and two-way collisions
//! with an external rigid-body world:
//! - Sort-based neighbor index: particles are tagged with a quantized cell
//!   id and sorted, so contact enumeration is a linear sweep
//! - Fixed-order solver pipeline over shared velocity buffers
//! - Durable structure: groups over contiguous index ranges, pair/triad
//!   bonds formed from contacts and Voronoi neighborhoods
//!
//! This crate is framework-agnostic - it owns no rigid bodies, renders
//! nothing, and persists nothing. The embedding world implements
//! [`RigidWorld`] and calls [`ParticleSystem::solve`] once per step.

pub mod constants;
pub mod contact;
pub mod group;
pub mod math;
pub mod particle;
pub mod shape;
pub mod system;
pub mod voronoi;
pub mod world;

pub use contact::{BodyContact, ParticleContact, ParticlePair, ParticleTriad, Proxy};
pub use group::{group_flags, GroupDef, GroupId};
pub use math::{Aabb, Rot, Transform};
pub use particle::{flags, ParticleColor, ParticleDef, ParticleSystemDef, UserData};
pub use shape::{PolygonShape, Shape};
pub use system::ParticleSystem;
pub use voronoi::{VoronoiDiagram, VoronoiGenerator};
pub use world::{
    BodyId, BodyState, DestructionListener, FixtureId, RayCastInput, RayCastOutput, RigidWorld,
    TimeStep,
};
