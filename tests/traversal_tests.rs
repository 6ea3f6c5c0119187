//! Integration tests for closest-hit and any-hit traversal.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use raybvh::bvh::{BuildConfig, Bvh};
use raybvh::geom::{Ray, Triangle, TriangleIntersector, TriangleMesh};
use raybvh::{Real, Vector3};

fn build(triangles: &[Triangle]) -> Bvh {
    let mesh = TriangleMesh::from_triangles(triangles.to_vec());
    Bvh::build(&mesh.bounding_boxes(), &mesh.centers(), &BuildConfig::default())
        .expect("build failed")
}

fn closest(bvh: &Bvh, triangles: &[Triangle], ray: &Ray) -> Option<(usize, Real)> {
    bvh.intersect_closest(ray, &TriangleIntersector::new(triangles))
        .map(|(i, hit)| (i, hit.distance))
}

fn brute_force(triangles: &[Triangle], ray: &Ray) -> Option<(usize, Real)> {
    triangles
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.intersect(ray).map(|hit| (i, hit.distance)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn assert_same_hit(
    triangles: &[Triangle],
    ray: &Ray,
    got: Option<(usize, Real)>,
    expected: Option<(usize, Real)>,
) {
    match (got, expected) {
        (None, None) => {}
        (Some((i, t)), Some((j, u))) => {
            assert!((t - u).abs() <= 1e-5 * u.abs().max(1.0), "{ray:?}: t {t} vs {u}");
            // Only comparable when the nearest hit is unambiguous.
            if i != j {
                let other = triangles[i].intersect(ray).map(|h| h.distance);
                assert_eq!(other, Some(t), "{ray:?}: primitive {i} vs {j}");
            }
        }
        _ => panic!("{ray:?}: got {got:?}, expected {expected:?}"),
    }
}

fn grid() -> Vec<Triangle> {
    let mut triangles = Vec::with_capacity(200);
    for y in 0..10 {
        for x in 0..10 {
            let (x, y) = (x as Real, y as Real);
            let p00 = Vector3::new(x, y, 1.0);
            let p10 = Vector3::new(x + 1.0, y, 1.0);
            let p11 = Vector3::new(x + 1.0, y + 1.0, 1.0);
            let p01 = Vector3::new(x, y + 1.0, 1.0);
            triangles.push(Triangle::new(p00, p10, p11));
            triangles.push(Triangle::new(p00, p11, p01));
        }
    }
    triangles
}

fn random_triangles(count: usize, rng: &mut StdRng) -> Vec<Triangle> {
    (0..count)
        .map(|_| {
            let c = Vector3::new(rng.gen(), rng.gen(), rng.gen());
            let mut v = || {
                c + Vector3::new(
                    rng.gen_range(-0.05..0.05),
                    rng.gen_range(-0.05..0.05),
                    rng.gen_range(-0.05..0.05),
                )
            };
            Triangle::new(v(), v(), v())
        })
        .collect()
}

/// Rays from a sphere of radius `radius` around `center` toward random points
/// of the cube `center +- spread`.
fn random_rays(count: usize, center: Vector3, radius: Real, spread: Real, rng: &mut StdRng) -> Vec<Ray> {
    (0..count)
        .map(|_| {
            let dir = loop {
                let p = Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                if p.length() > 0.1 && p.length() <= 1.0 {
                    break p.normalize();
                }
            };
            let origin = center + dir * radius;
            let target = center
                + Vector3::new(
                    rng.gen_range(-spread..spread),
                    rng.gen_range(-spread..spread),
                    rng.gen_range(-spread..spread),
                );
            Ray::new(origin, (target - origin).normalize())
        })
        .collect()
}

#[test]
fn test_single_triangle_frontal_ray() {
    let triangles = vec![Triangle::new(
        Vector3::new(0.0, 0.0, 5.0),
        Vector3::new(1.0, 0.0, 5.0),
        Vector3::new(0.0, 1.0, 5.0),
    )];
    let bvh = build(&triangles);
    let ray = Ray::new(Vector3::new(0.25, 0.25, 0.0), Vector3::Z);
    let (index, hit) = bvh
        .intersect_closest(&ray, &TriangleIntersector::new(&triangles))
        .expect("ray should hit");
    assert_eq!(index, 0);
    assert!((hit.distance - 5.0).abs() < 1e-5);
    assert!((hit.u - 0.25).abs() < 1e-5);
    assert!((hit.v - 0.25).abs() < 1e-5);
}

#[test]
fn test_depth_ordering() {
    let far = Triangle::new(
        Vector3::new(0.0, 0.0, 5.0),
        Vector3::new(1.0, 0.0, 5.0),
        Vector3::new(0.0, 1.0, 5.0),
    );
    let near = Triangle::new(
        Vector3::new(0.0, 0.0, 3.0),
        Vector3::new(1.0, 0.0, 3.0),
        Vector3::new(0.0, 1.0, 3.0),
    );
    let triangles = vec![far, near];
    let bvh = build(&triangles);
    let ray = Ray::new(Vector3::new(0.25, 0.25, 0.0), Vector3::Z);
    let (index, t) = closest(&bvh, &triangles, &ray).expect("ray should hit");
    assert_eq!(index, 1);
    assert!((t - 3.0).abs() < 1e-5);

    // Starting past the near triangle only sees the far one.
    let ray = Ray::with_range(ray.origin, ray.direction, 4.0, Real::INFINITY);
    assert_eq!(closest(&bvh, &triangles, &ray).map(|h| h.0), Some(0));
}

#[test]
fn test_grid_hit() {
    let triangles = grid();
    let bvh = build(&triangles);
    let ray = Ray::new(Vector3::new(5.1, 5.1, 0.0), Vector3::Z);
    let (index, t) = closest(&bvh, &triangles, &ray).expect("ray should hit");
    assert!((t - 1.0).abs() < 1e-5);
    // (5.1, 5.1) lies on the diagonal shared by both triangles of cell (5, 5).
    assert!(index == 110 || index == 111, "index {index}");
}

#[test]
fn test_grid_miss_axis_aligned() {
    let triangles = grid();
    let bvh = build(&triangles);
    let intersector = TriangleIntersector::new(&triangles);
    let ray = Ray::new(Vector3::new(100.0, 100.0, 0.0), Vector3::Z);
    assert!(bvh.intersect_closest(&ray, &intersector).is_none());
    assert!(!bvh.intersect_any(&ray, &intersector));
}

#[test]
fn test_axis_aligned_rays_every_cell() {
    let triangles = grid();
    let bvh = build(&triangles);
    for y in 0..10 {
        for x in 0..10 {
            let (cx, cy) = (x as Real + 0.25, y as Real + 0.75);
            // Both signs of zero in the x and y components.
            for dir in [Vector3::new(0.0, 0.0, 1.0), Vector3::new(-0.0, -0.0, 1.0)] {
                let ray = Ray::new(Vector3::new(cx, cy, 0.0), dir);
                let (index, t) = closest(&bvh, &triangles, &ray).expect("cell should be hit");
                assert_eq!(index, 2 * (y * 10 + x) + 1);
                assert!((t - 1.0).abs() < 1e-6);
            }
            let up = Ray::new(Vector3::new(cx, cy, 2.0), Vector3::NEG_Z);
            assert_eq!(closest(&bvh, &triangles, &up).map(|h| h.0), Some(2 * (y * 10 + x) + 1));
        }
    }
}

#[test]
fn test_degenerate_centroids_match_brute_force() {
    let triangles: Vec<Triangle> = (0..64)
        .map(|k| {
            let (i, j) = ((k % 8) as Real, (k / 8) as Real);
            let a = Vector3::new(i + 1.0, j, 1.0);
            let b = Vector3::new(-j - 1.0, i + 1.0, -2.0);
            Triangle::new(a, b, -(a + b))
        })
        .collect();
    let bvh = build(&triangles);
    let mut rng = StdRng::seed_from_u64(0x55);
    for ray in random_rays(1_000, Vector3::ZERO, 30.0, 4.0, &mut rng) {
        assert_same_hit(&triangles, &ray, closest(&bvh, &triangles, &ray), brute_force(&triangles, &ray));
    }
}

#[test]
fn test_random_scene_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(42);
    let triangles = random_triangles(3_000, &mut rng);
    let bvh = build(&triangles);
    let intersector = TriangleIntersector::new(&triangles);

    let mut hits = 0;
    for ray in random_rays(2_000, Vector3::splat(0.5), 2.0, 0.6, &mut rng) {
        let expected = brute_force(&triangles, &ray);
        hits += usize::from(expected.is_some());
        assert_same_hit(&triangles, &ray, closest(&bvh, &triangles, &ray), expected);
        assert_eq!(bvh.intersect_any(&ray, &intersector), expected.is_some(), "{ray:?}");
    }
    assert!(hits > 100, "scene too sparse: {hits} hits");
}

#[test]
fn test_interval_is_honoured() {
    let mut rng = StdRng::seed_from_u64(7);
    let triangles = random_triangles(1_000, &mut rng);
    let bvh = build(&triangles);
    let intersector = TriangleIntersector::new(&triangles);

    for ray in random_rays(500, Vector3::splat(0.5), 2.0, 0.5, &mut rng) {
        let Some((_, t)) = brute_force(&triangles, &ray) else {
            continue;
        };
        // Interval ending before the closest hit.
        let before = Ray::with_range(ray.origin, ray.direction, 0.0, t * 0.5);
        assert_same_hit(&triangles, &before, closest(&bvh, &triangles, &before), brute_force(&triangles, &before));
        assert_eq!(bvh.intersect_any(&before, &intersector), brute_force(&triangles, &before).is_some());

        // Interval starting just after it.
        let after = Ray::with_range(ray.origin, ray.direction, t * 1.001, Real::INFINITY);
        assert_same_hit(&triangles, &after, closest(&bvh, &triangles, &after), brute_force(&triangles, &after));
        if let Some((_, u)) = closest(&bvh, &triangles, &after) {
            assert!(u >= after.tmin);
        }
    }
}

#[test]
fn test_ray_inside_scene() {
    let mut rng = StdRng::seed_from_u64(11);
    let triangles = random_triangles(2_000, &mut rng);
    let bvh = build(&triangles);
    // Origins inside the root box.
    for ray in random_rays(500, Vector3::splat(0.5), 0.3, 0.5, &mut rng) {
        assert_same_hit(&triangles, &ray, closest(&bvh, &triangles, &ray), brute_force(&triangles, &ray));
    }
}

#[test]
fn test_any_hit_on_empty_interval() {
    let triangles = grid();
    let bvh = build(&triangles);
    let intersector = TriangleIntersector::new(&triangles);
    let ray = Ray::with_range(Vector3::new(5.5, 5.25, 0.0), Vector3::Z, 0.0, 0.5);
    assert!(!bvh.intersect_any(&ray, &intersector));
    let ray = Ray::with_range(Vector3::new(5.5, 5.25, 0.0), Vector3::Z, 0.0, 1.5);
    assert!(bvh.intersect_any(&ray, &intersector));
}
