//! Small 2D geometry types layered over glam.
//!
//! glam has no 2D rotor or rigid transform, so the rotation/transform algebra
//! the group and collision code needs lives here. Rotations are stored as
//! (sin, cos) pairs; the rigid-group solver deliberately feeds *non-unit*
//! pairs through [`Rot::apply`], so `apply` must stay a plain linear map.

use glam::Vec2;

/// Scalar 2D cross product `s × v` (rotates `v` by 90° and scales).
#[inline]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: Vec2,
    pub upper: Vec2,
}

impl Aabb {
    /// An inverted box that grows correctly from the first `combine_point`.
    pub const EMPTY: Aabb = Aabb {
        lower: Vec2::splat(f32::MAX),
        upper: Vec2::splat(f32::MIN),
    };

    pub fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Grow to include `p`.
    #[inline]
    pub fn combine_point(&mut self, p: Vec2) {
        self.lower = self.lower.min(p);
        self.upper = self.upper.max(p);
    }

    /// Pad every side by `margin`.
    #[inline]
    pub fn extend(&mut self, margin: f32) {
        self.lower -= Vec2::splat(margin);
        self.upper += Vec2::splat(margin);
    }

    /// Closed containment, boundary included.
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        self.lower.x <= p.x && p.x <= self.upper.x && self.lower.y <= p.y && p.y <= self.upper.y
    }

    /// Open containment, boundary excluded.
    #[inline]
    pub fn strictly_contains(&self, p: Vec2) -> bool {
        self.lower.x < p.x && p.x < self.upper.x && self.lower.y < p.y && p.y < self.upper.y
    }
}

/// Rotation as a (sin, cos) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rot {
    pub s: f32,
    pub c: f32,
}

impl Rot {
    pub const IDENTITY: Rot = Rot { s: 0.0, c: 1.0 };

    #[inline]
    pub fn new(angle: f32) -> Self {
        Self {
            s: angle.sin(),
            c: angle.cos(),
        }
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.s.atan2(self.c)
    }

    /// Apply as a linear map. Not normalized on purpose.
    #[inline]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Apply the inverse rotation (valid for unit rotations).
    #[inline]
    pub fn apply_inv(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// Compose: `self` after `other`.
    #[inline]
    pub fn mul(&self, other: Rot) -> Rot {
        Rot {
            s: self.s * other.c + self.c * other.s,
            c: self.c * other.c - self.s * other.s,
        }
    }
}

/// Rigid transform: rotate then translate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub p: Vec2,
    pub q: Rot,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    #[inline]
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            p: position,
            q: Rot::new(angle),
        }
    }

    #[inline]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.q.apply(v) + self.p
    }

    /// Map a world point into this transform's local frame.
    #[inline]
    pub fn apply_inv(&self, v: Vec2) -> Vec2 {
        self.q.apply_inv(v - self.p)
    }

    /// Compose: `self` applied after `other`.
    #[inline]
    pub fn mul(&self, other: Transform) -> Transform {
        Transform {
            p: self.q.apply(other.p) + self.p,
            q: self.q.mul(other.q),
        }
    }
}
