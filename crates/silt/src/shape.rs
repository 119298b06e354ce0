//! Emission geometry.
//!
//! Groups are filled or stroked from these shapes: polygon and circle shapes
//! are rasterized over their AABB at the particle stride, edge and chain
//! shapes are stroked along their segments. The same shapes drive
//! region-based particle destruction.
//!
//! External rigid-body fixtures are *not* represented here; they stay behind
//! [`crate::world::RigidWorld`].

use glam::Vec2;

use crate::math::{Aabb, Transform};

/// A convex polygon, counter-clockwise winding.
#[derive(Clone, Debug)]
pub struct PolygonShape {
    vertices: Vec<Vec2>,
    normals: Vec<Vec2>,
}

impl PolygonShape {
    /// Build from CCW convex vertices. Convexity is the caller's contract.
    pub fn new(vertices: Vec<Vec2>) -> Self {
        debug_assert!(vertices.len() >= 3);
        let n = vertices.len();
        let mut normals = Vec::with_capacity(n);
        for i in 0..n {
            let edge = vertices[(i + 1) % n] - vertices[i];
            debug_assert!(edge.length_squared() > f32::EPSILON * f32::EPSILON);
            normals.push(Vec2::new(edge.y, -edge.x).normalize());
        }
        Self { vertices, normals }
    }

    /// Axis-aligned box with given half extents, centered on the origin.
    pub fn rect(half_width: f32, half_height: f32) -> Self {
        Self::new(vec![
            Vec2::new(-half_width, -half_height),
            Vec2::new(half_width, -half_height),
            Vec2::new(half_width, half_height),
            Vec2::new(-half_width, half_height),
        ])
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    fn test_point(&self, p: Vec2) -> bool {
        self.vertices
            .iter()
            .zip(&self.normals)
            .all(|(&v, &n)| n.dot(p - v) <= 0.0)
    }

    fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for &v in &self.vertices {
            aabb.combine_point(v);
        }
        aabb
    }
}

/// Shape used for particle emission and region selection.
#[derive(Clone, Debug)]
pub enum Shape {
    Circle { center: Vec2, radius: f32 },
    Polygon(PolygonShape),
    /// A single segment.
    Edge { v1: Vec2, v2: Vec2 },
    /// A polyline; `closed` adds the segment from the last vertex back to
    /// the first.
    Chain { vertices: Vec<Vec2>, closed: bool },
}

impl Shape {
    /// Segment count for stroked shapes, 1 for filled shapes.
    pub fn child_count(&self) -> usize {
        match self {
            Shape::Circle { .. } | Shape::Polygon(_) | Shape::Edge { .. } => 1,
            Shape::Chain { vertices, closed } => {
                if *closed {
                    vertices.len()
                } else {
                    vertices.len().saturating_sub(1)
                }
            }
        }
    }

    /// The `i`-th segment of an edge or chain shape.
    pub fn child_edge(&self, i: usize) -> (Vec2, Vec2) {
        match self {
            Shape::Edge { v1, v2 } => {
                debug_assert_eq!(i, 0);
                (*v1, *v2)
            }
            Shape::Chain { vertices, .. } => {
                let a = vertices[i];
                let b = vertices[(i + 1) % vertices.len()];
                (a, b)
            }
            _ => unreachable!("child_edge on a filled shape"),
        }
    }

    /// True when the shape is stroked (edge/chain) rather than filled.
    pub fn is_stroked(&self) -> bool {
        matches!(self, Shape::Edge { .. } | Shape::Chain { .. })
    }

    /// Point-in-shape test in the shape's local frame. Stroked shapes have
    /// zero area and never contain a point.
    pub fn test_point_local(&self, p: Vec2) -> bool {
        match self {
            Shape::Circle { center, radius } => (p - *center).length_squared() <= radius * radius,
            Shape::Polygon(poly) => poly.test_point(p),
            Shape::Edge { .. } | Shape::Chain { .. } => false,
        }
    }

    /// Point-in-shape test with the shape placed by `xf`.
    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        self.test_point_local(xf.apply_inv(p))
    }

    /// Local-frame AABB over every vertex of the shape.
    pub fn compute_aabb(&self) -> Aabb {
        match self {
            Shape::Circle { center, radius } => Aabb::new(
                *center - Vec2::splat(*radius),
                *center + Vec2::splat(*radius),
            ),
            Shape::Polygon(poly) => poly.aabb(),
            Shape::Edge { v1, v2 } => {
                let mut aabb = Aabb::EMPTY;
                aabb.combine_point(*v1);
                aabb.combine_point(*v2);
                aabb
            }
            Shape::Chain { vertices, .. } => {
                let mut aabb = Aabb::EMPTY;
                for &v in vertices {
                    aabb.combine_point(v);
                }
                aabb
            }
        }
    }

    /// World-frame AABB with the shape placed by `xf`.
    pub fn compute_aabb_transformed(&self, xf: &Transform) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        match self {
            Shape::Circle { center, radius } => {
                let c = xf.apply(*center);
                aabb = Aabb::new(c - Vec2::splat(*radius), c + Vec2::splat(*radius));
            }
            Shape::Polygon(poly) => {
                for &v in poly.vertices() {
                    aabb.combine_point(xf.apply(v));
                }
            }
            Shape::Edge { v1, v2 } => {
                aabb.combine_point(xf.apply(*v1));
                aabb.combine_point(xf.apply(*v2));
            }
            Shape::Chain { vertices, .. } => {
                for &v in vertices {
                    aabb.combine_point(xf.apply(v));
                }
            }
        }
        aabb
    }
}
