//! Triangle primitive and ray/triangle intersection.

use crate::bvh::{Hit, Intersector};
use crate::geom::Ray;
use crate::util::{Aabb, Real, Vector3};

/// Triangle given by its three vertex positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v0: Vector3,
    pub v1: Vector3,
    pub v2: Vector3,
}

/// Intersection of a ray with a [`Triangle`].
///
/// `u` and `v` are the barycentric weights of `v1` and `v2`; the weight of
/// `v0` is `1 - u - v`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub distance: Real,
    pub u: Real,
    pub v: Real,
}

impl Hit for TriangleHit {
    #[inline]
    fn distance(&self) -> Real {
        self.distance
    }
}

impl Triangle {
    #[inline]
    pub const fn new(v0: Vector3, v1: Vector3, v2: Vector3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute AABB of this triangle.
    #[inline]
    pub fn bounding_box(&self) -> Aabb {
        let mut b = Aabb::from_point(self.v0);
        b.extend_point(self.v1).extend_point(self.v2);
        b
    }

    /// Centroid of the triangle.
    #[inline]
    pub fn center(&self) -> Vector3 {
        (self.v0 + self.v1 + self.v2) * (1.0 / 3.0)
    }

    /// Unnormalized geometric normal, `(v1 - v0) x (v2 - v0)`.
    #[inline]
    pub fn normal(&self) -> Vector3 {
        (self.v1 - self.v0).cross(self.v2 - self.v0)
    }

    pub fn area(&self) -> Real {
        self.normal().length() * 0.5
    }

    /// Möller-Trumbore intersection, two-sided.
    ///
    /// Returns a hit only if its distance lies in `[ray.tmin, ray.tmax]`.
    /// Degenerate triangles and rays parallel to the triangle plane never hit.
    #[inline]
    pub fn intersect(&self, ray: &Ray) -> Option<TriangleHit> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det == 0.0 {
            return None;
        }
        let inv_det = 1.0 / det;
        if !inv_det.is_finite() {
            return None;
        }

        let s = ray.origin - self.v0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = e2.dot(q) * inv_det;
        if !ray.contains(t) {
            return None;
        }
        Some(TriangleHit { distance: t, u, v })
    }
}

/// [`Intersector`] over a slice of triangles indexed by primitive index.
#[derive(Debug, Clone, Copy)]
pub struct TriangleIntersector<'a> {
    triangles: &'a [Triangle],
}

impl<'a> TriangleIntersector<'a> {
    pub fn new(triangles: &'a [Triangle]) -> Self {
        Self { triangles }
    }
}

impl Intersector for TriangleIntersector<'_> {
    type Hit = TriangleHit;

    #[inline]
    fn intersect(&self, primitive_index: usize, ray: &Ray) -> Option<TriangleHit> {
        self.triangles[primitive_index].intersect(ray)
    }
}
