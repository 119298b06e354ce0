//! The triangulation collaborator used at group formation, and a default
//! implementation.
//!
//! Triad construction only needs one capability: given a set of tagged
//! points, report every triple of points whose Voronoi regions are mutually
//! adjacent. [`VoronoiGenerator`] is that contract; the engine consumes
//! nothing else, and an embedder with its own triangulation can install it
//! through [`crate::ParticleSystem::set_voronoi_factory`].
//!
//! [`VoronoiDiagram`] is the built-in generator: positions are rasterized
//! onto a cell grid, each cell is claimed by its nearest generator, and
//! every grid corner where three distinct regions meet yields one candidate
//! triad. Cell ownership is computed in two phases: a seeded wavefront fill
//! gives every cell a provisional owner in one sweep, then region boundaries
//! are relaxed by true squared distance until stable. The result is exact
//! enough at the resolution the caller picks (half the particle stride).

use std::collections::VecDeque;

use glam::Vec2;

/// What group formation requires from a Voronoi diagram: take tagged points,
/// build at a resolution, and visit every mutually adjacent triple.
///
/// Construction is left to the factory installed on the particle system, so
/// implementations are free to preallocate from the generator-count hint
/// they receive there.
pub trait VoronoiGenerator {
    /// Register a generator point carrying an opaque tag.
    fn add_generator(&mut self, center: Vec2, tag: i32);
    /// Build the diagram at cell resolution `radius`. Called exactly once,
    /// after the last `add_generator`.
    fn generate(&mut self, radius: f32);
    /// Report the tags of every triple of mutually adjacent regions.
    fn get_nodes(&self, callback: &mut dyn FnMut(i32, i32, i32));
}

/// Install the built-in diagram; this is the factory a fresh
/// [`crate::ParticleSystem`] starts with.
pub fn default_voronoi_factory(generator_capacity: usize) -> Box<dyn VoronoiGenerator> {
    Box::new(VoronoiDiagram::new(generator_capacity))
}

struct Generator {
    center: Vec2,
    tag: i32,
}

struct Task {
    x: i32,
    y: i32,
    i: i32,
    /// Index into `generators`.
    generator: i32,
}

/// Discrete Voronoi diagram over a set of tagged generator points.
pub struct VoronoiDiagram {
    generators: Vec<Generator>,
    /// Owning generator index per cell, -1 while unassigned.
    diagram: Vec<i32>,
    count_x: i32,
    count_y: i32,
}

impl VoronoiDiagram {
    pub fn new(generator_capacity: usize) -> Self {
        Self {
            generators: Vec::with_capacity(generator_capacity),
            diagram: Vec::new(),
            count_x: 0,
            count_y: 0,
        }
    }

    /// Register a generator point carrying an opaque tag.
    pub fn add_generator(&mut self, center: Vec2, tag: i32) {
        debug_assert!(self.diagram.is_empty(), "diagram already generated");
        self.generators.push(Generator { center, tag });
    }

    /// Rasterize at cell size `radius` and assign every cell to its nearest
    /// generator.
    pub fn generate(&mut self, radius: f32) {
        debug_assert!(self.diagram.is_empty(), "diagram already generated");
        debug_assert!(radius > 0.0);
        if self.generators.is_empty() {
            return;
        }
        let inverse_radius = 1.0 / radius;
        let mut lower = Vec2::splat(f32::MAX);
        let mut upper = Vec2::splat(f32::MIN);
        for g in &self.generators {
            lower = lower.min(g.center);
            upper = upper.max(g.center);
        }
        self.count_x = 1 + (inverse_radius * (upper.x - lower.x)) as i32;
        self.count_y = 1 + (inverse_radius * (upper.y - lower.y)) as i32;
        self.diagram = vec![-1; (self.count_x * self.count_y) as usize];

        // Work in cell units from here on.
        for g in &mut self.generators {
            g.center = inverse_radius * (g.center - lower);
        }

        // Phase 1: wavefront fill from each generator cell. First claim
        // wins; queue order approximates distance order.
        let mut queue: VecDeque<Task> = VecDeque::new();
        for (k, g) in self.generators.iter().enumerate() {
            let x = (g.center.x as i32).clamp(0, self.count_x - 1);
            let y = (g.center.y as i32).clamp(0, self.count_y - 1);
            queue.push_back(Task {
                x,
                y,
                i: x + y * self.count_x,
                generator: k as i32,
            });
        }
        while let Some(task) = queue.pop_front() {
            let (x, y, i, k) = (task.x, task.y, task.i, task.generator);
            if self.diagram[i as usize] < 0 {
                self.diagram[i as usize] = k;
                if x > 0 {
                    queue.push_back(Task { x: x - 1, y, i: i - 1, generator: k });
                }
                if y > 0 {
                    queue.push_back(Task { x, y: y - 1, i: i - self.count_x, generator: k });
                }
                if x < self.count_x - 1 {
                    queue.push_back(Task { x: x + 1, y, i: i + 1, generator: k });
                }
                if y < self.count_y - 1 {
                    queue.push_back(Task { x, y: y + 1, i: i + self.count_x, generator: k });
                }
            }
        }

        // Phase 2: relax region boundaries by true squared distance. Seed
        // with every cell pair that disagrees with its neighbor.
        for y in 0..self.count_y {
            for x in 0..self.count_x - 1 {
                let i = x + y * self.count_x;
                let a = self.diagram[i as usize];
                let b = self.diagram[(i + 1) as usize];
                if a != b {
                    queue.push_back(Task { x, y, i, generator: b });
                    queue.push_back(Task { x: x + 1, y, i: i + 1, generator: a });
                }
            }
        }
        for y in 0..self.count_y - 1 {
            for x in 0..self.count_x {
                let i = x + y * self.count_x;
                let a = self.diagram[i as usize];
                let b = self.diagram[(i + self.count_x) as usize];
                if a != b {
                    queue.push_back(Task { x, y, i, generator: b });
                    queue.push_back(Task { x, y: y + 1, i: i + self.count_x, generator: a });
                }
            }
        }
        while let Some(task) = queue.pop_front() {
            let (x, y, i, k) = (task.x, task.y, task.i, task.generator);
            let a = self.diagram[i as usize];
            if a != k {
                let cell = Vec2::new(x as f32, y as f32);
                let current = (self.generators[a as usize].center - cell).length_squared();
                let candidate = (self.generators[k as usize].center - cell).length_squared();
                if current > candidate {
                    self.diagram[i as usize] = k;
                    if x > 0 {
                        queue.push_back(Task { x: x - 1, y, i: i - 1, generator: k });
                    }
                    if y > 0 {
                        queue.push_back(Task { x, y: y - 1, i: i - self.count_x, generator: k });
                    }
                    if x < self.count_x - 1 {
                        queue.push_back(Task { x: x + 1, y, i: i + 1, generator: k });
                    }
                    if y < self.count_y - 1 {
                        queue.push_back(Task { x, y: y + 1, i: i + self.count_x, generator: k });
                    }
                }
            }
        }
    }

    /// Report the tags of every triple of mutually adjacent regions, one
    /// call per grid corner where three regions meet.
    pub fn get_nodes(&self, mut callback: impl FnMut(i32, i32, i32)) {
        for y in 0..self.count_y - 1 {
            for x in 0..self.count_x - 1 {
                let i = (x + y * self.count_x) as usize;
                let a = self.diagram[i];
                let b = self.diagram[i + 1];
                let c = self.diagram[i + self.count_x as usize];
                let d = self.diagram[i + 1 + self.count_x as usize];
                if b != c {
                    if a != b && a != c {
                        callback(
                            self.generators[a as usize].tag,
                            self.generators[b as usize].tag,
                            self.generators[c as usize].tag,
                        );
                    }
                    if d != b && d != c {
                        callback(
                            self.generators[b as usize].tag,
                            self.generators[d as usize].tag,
                            self.generators[c as usize].tag,
                        );
                    }
                }
            }
        }
    }
}

impl VoronoiGenerator for VoronoiDiagram {
    fn add_generator(&mut self, center: Vec2, tag: i32) {
        VoronoiDiagram::add_generator(self, center, tag);
    }

    fn generate(&mut self, radius: f32) {
        VoronoiDiagram::generate(self, radius);
    }

    fn get_nodes(&self, callback: &mut dyn FnMut(i32, i32, i32)) {
        VoronoiDiagram::get_nodes(self, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_points_emit_one_triple() {
        let mut diagram = VoronoiDiagram::new(3);
        diagram.add_generator(Vec2::new(0.0, 0.0), 10);
        diagram.add_generator(Vec2::new(1.0, 0.0), 20);
        diagram.add_generator(Vec2::new(0.5, 1.0), 30);
        diagram.generate(0.1);
        let mut triples = Vec::new();
        diagram.get_nodes(|a, b, c| {
            let mut t = [a, b, c];
            t.sort_unstable();
            triples.push(t);
        });
        triples.dedup();
        assert!(triples.contains(&[10, 20, 30]));
        // No other distinct triple is possible with three generators.
        assert!(triples.iter().all(|t| *t == [10, 20, 30]));
    }

    #[test]
    fn grid_of_points_emits_corner_triples() {
        let mut diagram = VoronoiDiagram::new(4);
        diagram.add_generator(Vec2::new(0.0, 0.0), 0);
        diagram.add_generator(Vec2::new(1.0, 0.0), 1);
        diagram.add_generator(Vec2::new(0.0, 1.0), 2);
        diagram.add_generator(Vec2::new(1.0, 1.0), 3);
        diagram.generate(0.1);
        let mut seen = std::collections::HashSet::new();
        diagram.get_nodes(|a, b, c| {
            let mut t = [a, b, c];
            t.sort_unstable();
            seen.insert(t);
        });
        // Every reported triple references three distinct generators.
        for t in &seen {
            assert!(t[0] < t[1] && t[1] < t[2]);
        }
        assert!(!seen.is_empty());
    }

    #[test]
    fn empty_diagram_reports_nothing() {
        let diagram = VoronoiDiagram::new(0);
        let mut called = false;
        diagram.get_nodes(|_, _, _| called = true);
        assert!(!called);
    }
}
