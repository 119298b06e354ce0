//! Engine tuning constants.
//!
//! All solver modules use these instead of defining their own so the derived
//! scales (critical velocity, critical pressure, stride) stay consistent
//! across passes.

/// Sentinel returned by particle creation when no slot is available, and
/// stored transiently for compacted-away indices.
pub const INVALID_PARTICLE_INDEX: i32 = -1;

/// Initial arena capacity for the particle buffers.
pub const MIN_PARTICLE_BUFFER_CAPACITY: i32 = 256;

/// Pressure clamp, as a multiple of the critical pressure.
pub const MAX_PARTICLE_PRESSURE: f32 = 0.25;

/// Weight below which a particle produces no pressure.
pub const MIN_PARTICLE_WEIGHT: f32 = 1.0;

/// Maximum edge length of a triad, in diameters.
pub const MAX_TRIAD_DISTANCE: f32 = 2.0;
pub const MAX_TRIAD_DISTANCE_SQUARED: f32 = MAX_TRIAD_DISTANCE * MAX_TRIAD_DISTANCE;

/// Spacing between particles emitted into a group shape, as a fraction of
/// the diameter. Also fixes the nominal particle mass: `density * stride²`.
pub const PARTICLE_STRIDE: f32 = 0.75;

/// How far ahead of the sub-step a barrier pair sweeps for crossers, as a
/// multiple of the sub-step dt.
pub const BARRIER_COLLISION_TIME: f32 = 2.5;

/// Collision resolution leaves a particle this far outside a surface.
pub const LINEAR_SLOP: f32 = 0.005;
