//! Neighbor index and contact builder behavior:
//! - single-contact geometry (weight, normal, canonical index order)
//! - tag-sort determinism
//! - completeness against a brute-force pair scan
//! - weight accumulation symmetry
//! - AABB queries and particle ray casts over the proxy sort

use glam::Vec2;
use proptest::prelude::*;
use silt::{Aabb, ParticleDef, ParticleSystem, ParticleSystemDef};

fn system_with_radius(radius: f32) -> ParticleSystem {
    let def = ParticleSystemDef {
        radius,
        ..Default::default()
    };
    ParticleSystem::new(&def)
}

fn spawn(system: &mut ParticleSystem, positions: &[Vec2]) {
    for &p in positions {
        let index = system.create_particle(&ParticleDef {
            position: p,
            ..Default::default()
        });
        assert!(index >= 0);
    }
}

#[test]
fn single_contact_weight_normal_order() {
    let mut system = system_with_radius(0.5);
    spawn(&mut system, &[Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.0)]);
    system.update_contacts(false);

    let contacts = system.contacts();
    assert_eq!(contacts.len(), 1);
    let c = contacts[0];
    assert_eq!(c.index_a, 0);
    assert_eq!(c.index_b, 1);
    assert!((c.weight - 0.5).abs() < 1e-6);
    assert!((c.normal - Vec2::X).length() < 1e-6);
    assert!((c.normal.length() - 1.0).abs() < 1e-6);
}

#[test]
fn particles_a_diameter_apart_do_not_touch() {
    let mut system = system_with_radius(0.5);
    spawn(&mut system, &[Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)]);
    system.update_contacts(false);
    assert!(system.contacts().is_empty());
}

#[test]
fn tag_sort_determinism_five_particle_cross() {
    // Four corners at 0.95 spacing (strictly closer than one diameter) and
    // the center: the four sides plus four center spokes, diagonals too far.
    let mut system = system_with_radius(0.5);
    spawn(
        &mut system,
        &[
            Vec2::new(0.0, 0.0),
            Vec2::new(0.95, 0.0),
            Vec2::new(0.0, 0.95),
            Vec2::new(0.95, 0.95),
            Vec2::new(0.475, 0.475),
        ],
    );
    system.update_contacts(false);

    let proxies = system.proxies();
    assert_eq!(proxies.len(), 5);
    for w in proxies.windows(2) {
        assert!(
            w[0].tag < w[1].tag || (w[0].tag == w[1].tag && w[0].index < w[1].index),
            "proxies not sorted by (tag, index)"
        );
    }

    let mut pairs: Vec<(i32, i32)> = system
        .contacts()
        .iter()
        .map(|c| (c.index_a, c.index_b))
        .collect();
    pairs.sort_unstable();
    assert_eq!(
        pairs,
        vec![(0, 1), (0, 2), (0, 4), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)]
    );
}

#[test]
fn contact_invariants_on_random_cluster() {
    use rand::{Rng, SeedableRng};
    let mut system = system_with_radius(0.5);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5117);
    let positions: Vec<Vec2> = (0..60)
        .map(|_| Vec2::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)))
        .collect();
    spawn(&mut system, &positions);
    system.update_contacts(false);

    for c in system.contacts() {
        assert!(0 <= c.index_a && c.index_a < c.index_b && c.index_b < system.count());
        let d = positions[c.index_b as usize] - positions[c.index_a as usize];
        assert!(d.length() < 1.0, "contact farther than one diameter");
        assert!((c.normal.length() - 1.0).abs() < 1e-4);
        assert!(c.weight > 0.0 && c.weight <= 1.0);
        // Normal points from A to B.
        assert!(c.normal.dot(d) > 0.0);
    }
}

#[test]
fn weight_symmetry() {
    let mut system = system_with_radius(0.5);
    let positions = [
        Vec2::new(0.0, 0.0),
        Vec2::new(0.6, 0.1),
        Vec2::new(0.2, 0.5),
        Vec2::new(5.0, 5.0),
    ];
    spawn(&mut system, &positions);
    system.update_contacts(false);
    system.compute_weight();

    // Re-accumulate by hand; both endpoints must receive the same increment.
    let mut expected = vec![0.0f32; system.count() as usize];
    for c in system.contacts() {
        expected[c.index_a as usize] += c.weight;
        expected[c.index_b as usize] += c.weight;
    }
    for (w, e) in system.weights().iter().zip(&expected) {
        assert!((w - e).abs() < 1e-6);
    }
    // The isolated particle has no weight.
    assert_eq!(system.weights()[3], 0.0);
}

#[test]
fn query_aabb_is_strict() {
    let mut system = system_with_radius(0.5);
    spawn(
        &mut system,
        &[Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)],
    );
    system.update_contacts(false);

    let mut hits = Vec::new();
    system.query_aabb(
        &Aabb::new(Vec2::new(-0.5, -0.5), Vec2::new(1.5, 0.5)),
        |i| {
            hits.push(i);
            true
        },
    );
    hits.sort_unstable();
    assert_eq!(hits, vec![0, 1]);

    // A particle exactly on the boundary is excluded.
    let mut hits = Vec::new();
    system.query_aabb(
        &Aabb::new(Vec2::new(1.0, -0.5), Vec2::new(2.5, 0.5)),
        |i| {
            hits.push(i);
            true
        },
    );
    assert_eq!(hits, vec![2]);
}

#[test]
fn ray_cast_reports_all_and_clips() {
    let mut system = system_with_radius(0.5);
    spawn(
        &mut system,
        &[Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), Vec2::new(6.0, 0.0)],
    );
    system.update_contacts(false);

    // Unclipped: every disc along the segment reports once.
    let mut reported = Vec::new();
    system.ray_cast(Vec2::new(-2.0, 0.0), Vec2::new(8.0, 0.0), |i, point, _n, t| {
        reported.push((i, point.x, t));
        1.0
    });
    assert_eq!(reported.len(), 3);
    for &(i, x, t) in &reported {
        // Entry point is one diameter before the center.
        let expected_x = 3.0 * i as f32 - 1.0;
        assert!((x - expected_x).abs() < 1e-3);
        assert!((t - (expected_x + 2.0) / 10.0).abs() < 1e-4);
    }

    // Clipping to the reported fraction keeps only the nearest hit.
    let mut count = 0;
    system.ray_cast(Vec2::new(-2.0, 0.0), Vec2::new(8.0, 0.0), |_i, _p, _n, t| {
        count += 1;
        t
    });
    assert_eq!(count, 1);
}

#[test]
fn collision_energy_counts_only_approaching() {
    let mut system = system_with_radius(0.5);
    spawn(&mut system, &[Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.0)]);
    system.update_contacts(false);

    // Separating: no collision energy.
    system.velocities_mut()[0] = Vec2::new(-1.0, 0.0);
    system.velocities_mut()[1] = Vec2::new(1.0, 0.0);
    assert_eq!(system.compute_collision_energy(), 0.0);

    // Approaching at 2: energy is 0.5·m·vn².
    system.velocities_mut()[0] = Vec2::new(1.0, 0.0);
    system.velocities_mut()[1] = Vec2::new(-1.0, 0.0);
    let expected = 0.5 * system.particle_mass() * 4.0;
    assert!((system.compute_collision_energy() - expected).abs() < 1e-5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every pair of live particles strictly closer than one diameter gets
    /// exactly one contact, with canonical index order.
    #[test]
    fn neighbor_completeness(
        points in prop::collection::vec((-3.0f32..3.0, -3.0f32..3.0), 1..40)
    ) {
        let mut system = system_with_radius(0.5);
        let positions: Vec<Vec2> = points.iter().map(|&(x, y)| Vec2::new(x, y)).collect();
        spawn(&mut system, &positions);
        system.update_contacts(false);

        let mut expected = std::collections::BTreeSet::new();
        for a in 0..positions.len() {
            for b in (a + 1)..positions.len() {
                if (positions[b] - positions[a]).length_squared() < 1.0 {
                    expected.insert((a as i32, b as i32));
                }
            }
        }
        let mut actual = std::collections::BTreeSet::new();
        for c in system.contacts() {
            prop_assert!(c.index_a < c.index_b);
            prop_assert!(actual.insert((c.index_a, c.index_b)), "duplicate contact");
        }
        prop_assert_eq!(actual, expected);
    }

    /// After sorting, proxy tags are monotone.
    #[test]
    fn tag_monotonicity(
        points in prop::collection::vec((-20.0f32..20.0, -20.0f32..20.0), 1..60)
    ) {
        let mut system = system_with_radius(0.5);
        let positions: Vec<Vec2> = points.iter().map(|&(x, y)| Vec2::new(x, y)).collect();
        spawn(&mut system, &positions);
        system.update_contacts(false);
        let proxies = system.proxies();
        for w in proxies.windows(2) {
            prop_assert!(w[0].tag <= w[1].tag);
        }
        // Every particle appears exactly once.
        let mut seen: Vec<i32> = proxies.iter().map(|p| p.index).collect();
        seen.sort_unstable();
        let expected: Vec<i32> = (0..system.count()).collect();
        prop_assert_eq!(seen, expected);
    }
}
