//! Parallel binned SAH builder.
//!
//! Top-down construction over precomputed primitive bounding boxes and
//! centroids. Each work item `(node, begin, end, depth)` bins its centroids
//! along all three axes, sweeps the bins for the cheapest split and either
//! becomes a leaf or allocates two consecutive child slots with a single
//! atomic `fetch_add`. Large subtrees are spawned as rayon tasks, small ones
//! are processed from a task-local stack.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::Zeroable;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::{node::MAX_PRIMITIVE_COUNT, Bvh, BuildConfig, Node};
use crate::util::{Aabb, Error, Real, Result, SharedSlice, Vector3};

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    aabb: Aabb,
    primitive_count: usize,
    /// Cost of everything from this bin to the last one, filled by the right sweep.
    right_cost: Real,
    right_aabb: Aabb,
}

impl Bin {
    const EMPTY: Self = Self {
        aabb: Aabb::EMPTY,
        primitive_count: 0,
        right_cost: 0.0,
        right_aabb: Aabb::EMPTY,
    };
}

type Bins = SmallVec<[Bin; 32]>;

/// Best split found along one axis.
#[derive(Clone, Copy)]
struct AxisSplit {
    cost: Real,
    /// Boundary in bin units: bins `< position` go left. Zero means no split.
    position: usize,
    left: Aabb,
    right: Aabb,
}

impl AxisSplit {
    const NONE: Self = Self {
        cost: Real::INFINITY,
        position: 0,
        left: Aabb::EMPTY,
        right: Aabb::EMPTY,
    };
}

/// Linear map from a centroid coordinate to a bin index.
#[derive(Clone, Copy)]
struct BinMapping {
    min: Vector3,
    scale: Vector3,
    bin_count: usize,
}

impl BinMapping {
    fn new(centroid_bounds: &Aabb, bin_count: usize) -> Self {
        let diagonal = centroid_bounds.diagonal();
        let scale = Vector3::new(
            Self::axis_scale(diagonal.x, bin_count),
            Self::axis_scale(diagonal.y, bin_count),
            Self::axis_scale(diagonal.z, bin_count),
        );
        Self {
            min: centroid_bounds.min,
            scale,
            bin_count,
        }
    }

    fn axis_scale(extent: Real, bin_count: usize) -> Real {
        if extent > 0.0 {
            bin_count as Real / extent
        } else {
            0.0
        }
    }

    /// Whether centroids are spread along `axis` at all.
    #[inline]
    fn is_degenerate(&self, axis: usize) -> bool {
        self.scale[axis] == 0.0
    }

    #[inline]
    fn bin(&self, center: &Vector3, axis: usize) -> usize {
        let index = ((center[axis] - self.min[axis]) * self.scale[axis]).floor();
        // `as usize` saturates: negative rounding noise lands in bin 0.
        (index as usize).min(self.bin_count - 1)
    }
}

/// One pending node of the top-down build.
struct WorkItem<'a> {
    node: usize,
    begin: usize,
    depth: usize,
    aabb: Aabb,
    /// `primitive_indices[begin..end)`, owned exclusively by this item.
    indices: &'a mut [u32],
}

impl WorkItem<'_> {
    #[inline]
    fn size(&self) -> usize {
        self.indices.len()
    }
}

struct Builder<'a> {
    bboxes: &'a [Aabb],
    centers: &'a [Vector3],
    config: &'a BuildConfig,
    nodes: SharedSlice<'a, Node>,
    node_count: AtomicUsize,
}

impl<'a> Builder<'a> {
    /// Processes `item` and every descendant small enough to stay local.
    fn run<'s>(&'s self, scope: &rayon::Scope<'s>, item: WorkItem<'a>)
    where
        'a: 's,
    {
        let mut stack: SmallVec<[WorkItem<'a>; 64]> = SmallVec::new();
        stack.push(item);
        while let Some(item) = stack.pop() {
            let Some((left, right)) = self.split(item) else {
                continue;
            };
            let (larger, smaller) = if left.size() >= right.size() {
                (left, right)
            } else {
                (right, left)
            };
            stack.push(larger);
            if smaller.size() > self.config.parallel_threshold {
                scope.spawn(move |scope| self.run(scope, smaller));
            } else {
                stack.push(smaller);
            }
        }
    }

    /// Either turns `item` into a leaf (returns `None`) or into an internal
    /// node whose two children are returned as new work items.
    fn split(&self, item: WorkItem<'a>) -> Option<(WorkItem<'a>, WorkItem<'a>)> {
        let WorkItem {
            node,
            begin,
            depth,
            aabb,
            indices,
        } = item;
        let count = indices.len();
        if count <= 1 || depth >= self.config.max_depth {
            self.make_leaf(node, begin, count, &aabb);
            return None;
        }

        let centroid_bounds = indices.iter().fold(Aabb::EMPTY, |mut b, &p| {
            b.extend_point(self.centers[p as usize]);
            b
        });
        let mapping = BinMapping::new(&centroid_bounds, self.config.bin_count);

        let (axis, best) = self.find_best_split(indices, &mapping);

        // Reject the split unless it beats a single leaf of `count` primitives.
        let node_area = aabb.half_area();
        let leaf_cost = count as Real * node_area;
        if best.position == 0 || best.cost + self.config.traversal_cost * node_area >= leaf_cost {
            self.make_leaf(node, begin, count, &aabb);
            return None;
        }

        let mid = partition(&mut *indices, |&p| {
            mapping.bin(&self.centers[p as usize], axis) < best.position
        });
        if mid == 0 || mid == count {
            self.make_leaf(node, begin, count, &aabb);
            return None;
        }

        let left_index = self.node_count.fetch_add(2, Ordering::Relaxed);
        // SAFETY: `node` was handed to this item alone and the two child
        // slots were just allocated; no other task touches them.
        unsafe {
            self.nodes.write(node, Node::internal(&aabb, left_index as u32));
        }

        let (left_indices, right_indices) = indices.split_at_mut(mid);
        let left = WorkItem {
            node: left_index,
            begin,
            depth: depth + 1,
            aabb: best.left,
            indices: left_indices,
        };
        let right = WorkItem {
            node: left_index + 1,
            begin: begin + mid,
            depth: depth + 1,
            aabb: best.right,
            indices: right_indices,
        };
        Some((left, right))
    }

    fn make_leaf(&self, node: usize, begin: usize, count: usize, aabb: &Aabb) {
        let leaf = Node::leaf(aabb, begin as u32, count as u32);
        // SAFETY: `node` is owned by the work item being finished.
        unsafe { self.nodes.write(node, leaf) };
    }

    /// SAH binned split search across all 3 axes. Ties go to the lowest axis.
    fn find_best_split(&self, indices: &[u32], mapping: &BinMapping) -> (usize, AxisSplit) {
        let splits = if indices.len() > self.config.parallel_threshold {
            let (x, (y, z)) = rayon::join(
                || self.split_axis(indices, mapping, 0),
                || {
                    rayon::join(
                        || self.split_axis(indices, mapping, 1),
                        || self.split_axis(indices, mapping, 2),
                    )
                },
            );
            [x, y, z]
        } else {
            [
                self.split_axis(indices, mapping, 0),
                self.split_axis(indices, mapping, 1),
                self.split_axis(indices, mapping, 2),
            ]
        };

        let mut best_axis = 0;
        for axis in 1..3 {
            if splits[axis].cost < splits[best_axis].cost {
                best_axis = axis;
            }
        }
        (best_axis, splits[best_axis])
    }

    fn split_axis(&self, indices: &[u32], mapping: &BinMapping, axis: usize) -> AxisSplit {
        if mapping.is_degenerate(axis) {
            return AxisSplit::NONE;
        }

        let bin_count = self.config.bin_count;
        let mut bins: Bins = SmallVec::from_elem(Bin::EMPTY, bin_count);

        // Assign primitives to bins
        for &p in indices {
            let bin = &mut bins[mapping.bin(&self.centers[p as usize], axis)];
            bin.aabb.extend(&self.bboxes[p as usize]);
            bin.primitive_count += 1;
        }

        // Sweep from right: suffix costs
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for bin in bins[1..].iter_mut().rev() {
            sweep.extend(&bin.aabb);
            sweep_count += bin.primitive_count;
            bin.right_cost = sweep.half_area() * sweep_count as Real;
            bin.right_aabb = sweep;
        }

        // Sweep from left and evaluate every boundary
        let mut best = AxisSplit::NONE;
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..bin_count - 1 {
            sweep.extend(&bins[i].aabb);
            sweep_count += bins[i].primitive_count;
            if sweep_count == 0 || sweep_count == indices.len() {
                continue;
            }
            let cost = sweep.half_area() * sweep_count as Real + bins[i + 1].right_cost;
            if cost < best.cost {
                best = AxisSplit {
                    cost,
                    position: i + 1,
                    left: sweep,
                    right: bins[i + 1].right_aabb,
                };
            }
        }
        best
    }
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

/// Build a BVH over `bboxes.len()` primitives.
///
/// `bboxes[i]` and `centers[i]` describe primitive `i`. Leaves reference
/// contiguous ranges of the returned BVH's primitive index permutation.
#[tracing::instrument(skip_all, fields(primitive_count = bboxes.len()))]
pub fn build(bboxes: &[Aabb], centers: &[Vector3], config: &BuildConfig) -> Result<Bvh> {
    config.validate()?;
    let n = bboxes.len();
    if n == 0 {
        return Err(Error::EmptyInput);
    }
    if centers.len() != n {
        return Err(Error::LengthMismatch {
            bboxes: n,
            centers: centers.len(),
        });
    }
    if n > MAX_PRIMITIVE_COUNT {
        return Err(Error::TooManyPrimitives(n));
    }

    let mut nodes = vec![Node::zeroed(); 2 * n + 1];
    let mut primitive_indices = vec![0u32; n];

    // Root bounds and identity permutation in one parallel pass
    let root_aabb = primitive_indices
        .par_iter_mut()
        .enumerate()
        .map(|(i, slot)| {
            *slot = i as u32;
            bboxes[i]
        })
        .reduce(|| Aabb::EMPTY, |a, b| a.union(&b));

    let node_count = {
        let builder = Builder {
            bboxes,
            centers,
            config,
            nodes: SharedSlice::new(&mut nodes),
            node_count: AtomicUsize::new(1),
        };
        let root = WorkItem {
            node: 0,
            begin: 0,
            depth: 0,
            aabb: root_aabb,
            indices: &mut primitive_indices,
        };
        rayon::scope(|scope| builder.run(scope, root));
        builder.node_count.load(Ordering::Acquire)
    };
    nodes.truncate(node_count);

    tracing::debug!(node_count, "BVH built");

    Ok(Bvh {
        nodes,
        primitive_indices,
        traversal_cost: config.traversal_cost,
        max_depth: config.max_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(cx: Real, cy: Real, cz: Real) -> Aabb {
        let c = Vector3::new(cx, cy, cz);
        Aabb::new(c - Vector3::splat(0.5), c + Vector3::splat(0.5))
    }

    fn build_boxes(boxes: &[Aabb], config: &BuildConfig) -> Bvh {
        let centers: Vec<Vector3> = boxes.iter().map(Aabb::center).collect();
        build(boxes, &centers, config).unwrap()
    }

    #[test]
    fn test_empty_input() {
        let err = build(&[], &[], &BuildConfig::default()).unwrap_err();
        assert_eq!(err, Error::EmptyInput);
    }

    #[test]
    fn test_length_mismatch() {
        let boxes = [make_box(0.0, 0.0, 0.0)];
        let err = build(&boxes, &[], &BuildConfig::default()).unwrap_err();
        assert_eq!(err, Error::LengthMismatch { bboxes: 1, centers: 0 });
    }

    #[test]
    fn test_invalid_config() {
        let boxes = [make_box(0.0, 0.0, 0.0)];
        let config = BuildConfig::default().with_bin_count(0);
        assert!(matches!(
            build(&boxes, &[Vector3::ZERO], &config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_single_primitive() {
        let bvh = build_boxes(&[make_box(0.0, 0.0, 0.0)], &BuildConfig::default());
        assert_eq!(bvh.node_count(), 1); // just a leaf
        assert!(bvh.nodes()[0].is_leaf());
        assert_eq!(bvh.nodes()[0].primitive_count(), 1);
        assert_eq!(bvh.primitive_indices(), &[0]);
    }

    #[test]
    fn test_many_primitives_builds_tree() {
        // 100 boxes spread along X axis -> should split into a tree
        let boxes: Vec<Aabb> = (0..100).map(|i| make_box(i as Real * 2.0, 0.0, 0.0)).collect();
        let bvh = build_boxes(&boxes, &BuildConfig::default());

        assert!(bvh.node_count() > 1, "BVH should have internal nodes");
        assert!(bvh.node_count() <= 2 * 100 - 1);

        let mut sorted = bvh.primitive_indices().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<u32>>());

        let root = bvh.nodes()[0].aabb();
        assert_eq!(root.min.x, -0.5);
        assert_eq!(root.max.x, 198.5);
        assert!(bvh.validate(&boxes).is_ok());
    }

    #[test]
    fn test_children_are_consecutive() {
        let boxes: Vec<Aabb> = (0..64)
            .map(|i| make_box((i % 4) as Real * 3.0, (i / 4 % 4) as Real * 3.0, (i / 16) as Real * 3.0))
            .collect();
        let bvh = build_boxes(&boxes, &BuildConfig::default());
        for node in bvh.nodes().iter().filter(|n| !n.is_leaf()) {
            let left = node.first_child();
            assert_eq!(left % 2, 1, "left children sit at odd indices");
            let union = bvh.nodes()[left].aabb().union(&bvh.nodes()[left + 1].aabb());
            assert_eq!(node.aabb(), union);
        }
    }

    #[test]
    fn test_identical_centroids_become_leaf() {
        let boxes = vec![make_box(1.0, 1.0, 1.0); 16];
        let bvh = build_boxes(&boxes, &BuildConfig::default());
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.nodes()[0].primitive_count(), 16);
    }

    #[test]
    fn test_depth_cap_forces_leaves() {
        let boxes: Vec<Aabb> = (0..256).map(|i| make_box(i as Real * 2.0, 0.0, 0.0)).collect();
        let config = BuildConfig::default().with_max_depth(3);
        let bvh = build_boxes(&boxes, &config);
        assert!(bvh.depth() <= 3);
        assert!(bvh.validate(&boxes).is_ok());
    }

    #[test]
    fn test_parallel_and_serial_agree_on_coverage() {
        let boxes: Vec<Aabb> = (0..5000)
            .map(|i| make_box((i * 7919 % 1000) as Real, (i * 104729 % 997) as Real, (i % 13) as Real))
            .collect();
        let serial = build_boxes(&boxes, &BuildConfig::default().with_parallel_threshold(usize::MAX));
        let parallel = build_boxes(&boxes, &BuildConfig::default().with_parallel_threshold(16));
        assert!(serial.validate(&boxes).is_ok());
        assert!(parallel.validate(&boxes).is_ok());
        // Same splits are chosen regardless of scheduling.
        assert_eq!(serial.node_count(), parallel.node_count());
        let (a, b) = (serial.sah_cost(), parallel.sah_cost());
        assert!((a - b).abs() <= 1e-5 * a.max(b));
    }

    #[test]
    fn test_partition() {
        let mut values = [5, 1, 8, 2, 9, 3];
        let mid = partition(&mut values, |&v| v < 5);
        assert_eq!(mid, 3);
        assert!(values[..mid].iter().all(|&v| v < 5));
        assert!(values[mid..].iter().all(|&v| v >= 5));
    }

    #[test]
    fn test_bin_mapping_clamps() {
        let bounds = Aabb::new(Vector3::ZERO, Vector3::new(1.0, 0.0, 2.0));
        let mapping = BinMapping::new(&bounds, 32);
        assert_eq!(mapping.bin(&Vector3::ZERO, 0), 0);
        assert_eq!(mapping.bin(&Vector3::new(1.0, 0.0, 0.0), 0), 31);
        assert_eq!(mapping.bin(&Vector3::new(0.5, 0.0, 0.0), 0), 16);
        assert!(mapping.is_degenerate(1));
        assert!(!mapping.is_degenerate(2));
    }
}
