//! Single-ray closest-hit / any-hit traversal.
//!
//! Eager front-to-back traversal: both children of the current node are
//! tested, hit leaves are intersected immediately (tightening `tmax` before
//! any further box test) and only internal children are descended into, the
//! nearer one first.

use smallvec::SmallVec;

use super::{Bvh, Node};
use crate::geom::Ray;
use crate::util::{Real, Vector3};

/// Intersection record produced by an [`Intersector`].
pub trait Hit {
    /// Ray parameter `t` of the hit, used for ordering and `tmax` tightening.
    fn distance(&self) -> Real;
}

/// Primitive intersection callback.
///
/// Lives outside the BVH so the same tree serves any primitive that can
/// provide a bounding box and a centroid.
pub trait Intersector {
    type Hit: Hit;

    /// Intersect primitive `primitive_index` with `ray`, honouring
    /// `[ray.tmin, ray.tmax]`. `None` means miss (or failure) and traversal
    /// carries on.
    fn intersect(&self, primitive_index: usize, ray: &Ray) -> Option<Self::Hit>;
}

/// Per-ray precomputation for the slab test.
///
/// Zero direction components give infinite inverse components; the octant is
/// taken from the sign of the inverse so `+0` and `-0` pick consistent planes,
/// and any `0 * inf` NaN is dropped by `max`/`min`.
struct NodeIntersector {
    origin: Vector3,
    inverse_direction: Vector3,
    /// Index into `Node::bounds` of the entry plane per axis.
    entry: [usize; 3],
    /// Index into `Node::bounds` of the exit plane per axis.
    exit: [usize; 3],
}

impl NodeIntersector {
    fn new(ray: &Ray) -> Self {
        let inverse_direction = ray.direction.recip();
        let mut entry = [0; 3];
        let mut exit = [0; 3];
        for axis in 0..3 {
            let positive = inverse_direction[axis].is_sign_positive();
            entry[axis] = if positive { axis } else { axis + 3 };
            exit[axis] = if positive { axis + 3 } else { axis };
        }
        Self {
            origin: ray.origin,
            inverse_direction,
            entry,
            exit,
        }
    }

    #[inline]
    fn plane(&self, node: &Node, index: usize, axis: usize) -> Real {
        (node.bounds[index] - self.origin[axis]) * self.inverse_direction[axis]
    }

    /// Entry distance if `ray` overlaps the node's box within its interval.
    #[inline]
    fn intersect(&self, node: &Node, ray: &Ray) -> Option<Real> {
        let t_entry = self
            .plane(node, self.entry[0], 0)
            .max(self.plane(node, self.entry[1], 1))
            .max(self.plane(node, self.entry[2], 2))
            .max(ray.tmin);
        let t_exit = self
            .plane(node, self.exit[0], 0)
            .min(self.plane(node, self.exit[1], 1))
            .min(self.plane(node, self.exit[2], 2))
            .min(ray.tmax);
        (t_entry <= t_exit).then_some(t_entry)
    }
}

/// Deferred far child and the entry distance it was pushed with.
type TraversalStack = SmallVec<[(u32, Real); 64]>;

impl Bvh {
    /// Closest primitive hit along `ray`, as `(primitive_index, hit)`.
    ///
    /// Only hits with distance in `[ray.tmin, ray.tmax]` are reported.
    pub fn intersect_closest<I: Intersector>(
        &self,
        ray: &Ray,
        intersector: &I,
    ) -> Option<(usize, I::Hit)> {
        let mut ray = *ray;
        self.traverse::<I, false>(&mut ray, intersector)
    }

    /// Whether any primitive intersects `ray` within its interval.
    /// Stops at the first hit found (shadow and occlusion queries).
    pub fn intersect_any<I: Intersector>(&self, ray: &Ray, intersector: &I) -> bool {
        let mut ray = *ray;
        self.traverse::<I, true>(&mut ray, intersector).is_some()
    }

    fn traverse<I: Intersector, const ANY_HIT: bool>(
        &self,
        ray: &mut Ray,
        intersector: &I,
    ) -> Option<(usize, I::Hit)> {
        let mut best = None;
        let root = &self.nodes[0];
        if root.is_leaf() {
            self.intersect_leaf::<I, ANY_HIT>(root, ray, intersector, &mut best);
            return best;
        }

        let node_isect = NodeIntersector::new(ray);
        node_isect.intersect(root, ray)?;

        // Never holds more entries than the tree is deep.
        let mut stack = TraversalStack::new();
        let mut node = root;
        loop {
            let left_index = node.first_child();
            let left = &self.nodes[left_index];
            let right = &self.nodes[left_index + 1];

            let mut hit_left = node_isect.intersect(left, ray);
            if hit_left.is_some() && left.is_leaf() {
                if self.intersect_leaf::<I, ANY_HIT>(left, ray, intersector, &mut best) && ANY_HIT {
                    return best;
                }
                hit_left = None;
            }

            let mut hit_right = node_isect.intersect(right, ray);
            if hit_right.is_some() && right.is_leaf() {
                if self.intersect_leaf::<I, ANY_HIT>(right, ray, intersector, &mut best) && ANY_HIT {
                    return best;
                }
                hit_right = None;
            }

            node = match (hit_left, hit_right) {
                (Some(t_left), Some(t_right)) => {
                    let (near, far, t_far) = if t_left <= t_right {
                        (left_index, left_index + 1, t_right)
                    } else {
                        (left_index + 1, left_index, t_left)
                    };
                    stack.push((far as u32, t_far));
                    &self.nodes[near]
                }
                (Some(_), None) => left,
                (None, Some(_)) => right,
                (None, None) => loop {
                    match stack.pop() {
                        // Skip subtrees that start beyond the tightened interval.
                        Some((_, t_entry)) if t_entry > ray.tmax => continue,
                        Some((index, _)) => break &self.nodes[index as usize],
                        None => return best,
                    }
                },
            };
        }
    }

    /// Intersects every primitive of `leaf`, recording the nearest hit in
    /// `best` and shrinking `ray.tmax` to it. Returns whether anything was hit.
    #[inline]
    fn intersect_leaf<I: Intersector, const ANY_HIT: bool>(
        &self,
        leaf: &Node,
        ray: &mut Ray,
        intersector: &I,
        best: &mut Option<(usize, I::Hit)>,
    ) -> bool {
        let mut found = false;
        for &primitive in &self.primitive_indices[leaf.primitive_range()] {
            let primitive = primitive as usize;
            if let Some(hit) = intersector.intersect(primitive, ray) {
                let distance = hit.distance();
                if !ray.contains(distance) {
                    continue;
                }
                ray.tmax = distance;
                *best = Some((primitive, hit));
                found = true;
                if ANY_HIT {
                    break;
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Aabb;

    fn unit_node() -> Node {
        Node::internal(&Aabb::new(Vector3::ZERO, Vector3::ONE), 1)
    }

    #[test]
    fn test_octant_planes() {
        let ray = Ray::new(Vector3::ZERO, Vector3::new(1.0, -1.0, 1.0));
        let isect = NodeIntersector::new(&ray);
        assert_eq!(isect.entry, [0, 4, 2]);
        assert_eq!(isect.exit, [3, 1, 5]);
    }

    #[test]
    fn test_node_hit_and_miss() {
        let node = unit_node();
        let ray = Ray::new(Vector3::new(0.5, 0.5, -1.0), Vector3::new(0.01, 0.02, 1.0));
        let t = NodeIntersector::new(&ray).intersect(&node, &ray).unwrap();
        assert!((t - 1.0).abs() < 1e-4);

        let away = Ray::new(Vector3::new(0.5, 0.5, -1.0), Vector3::new(0.0, 0.1, -1.0));
        assert!(NodeIntersector::new(&away).intersect(&node, &away).is_none());
    }

    #[test]
    fn test_node_axis_aligned_rays() {
        let node = unit_node();
        // Exactly zero x and y components, both signs of zero.
        for dir in [Vector3::new(0.0, 0.0, 1.0), Vector3::new(-0.0, -0.0, 1.0)] {
            let inside = Ray::new(Vector3::new(0.5, 0.5, -1.0), dir);
            assert!(NodeIntersector::new(&inside).intersect(&node, &inside).is_some());
            let outside = Ray::new(Vector3::new(1.5, 0.5, -1.0), dir);
            assert!(NodeIntersector::new(&outside).intersect(&node, &outside).is_none());
            // Origin exactly on the min plane of a zero axis.
            let grazing = Ray::new(Vector3::new(0.0, 0.5, -1.0), dir);
            assert!(NodeIntersector::new(&grazing).intersect(&node, &grazing).is_some());
        }
    }

    #[test]
    fn test_node_respects_interval() {
        let node = unit_node();
        let ray = Ray::with_range(Vector3::new(0.5, 0.5, -5.0), Vector3::Z, 0.0, 2.0);
        assert!(NodeIntersector::new(&ray).intersect(&node, &ray).is_none());
        let ray = Ray::with_range(Vector3::new(0.5, 0.5, -5.0), Vector3::Z, 7.0, 9.0);
        assert!(NodeIntersector::new(&ray).intersect(&node, &ray).is_none());
    }
}
