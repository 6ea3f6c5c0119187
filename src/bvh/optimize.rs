//! Parallel reinsertion optimizer.
//!
//! Lowers the SAH cost of a built tree by detaching subtrees and reattaching
//! them under better parents. Iteration `k` of a pass with stride `u` handles
//! every node `i` with `i = k + 1 (mod u)` in parallel:
//!
//! 1. every selected node searches its best destination,
//! 2. candidates take 64-bit locks on the nodes they would touch, encoded as
//!    `(improvement bits << 32) | node`, so the larger improvement wins,
//! 3. candidates that do not own all their locks drop out,
//! 4. the survivors, pairwise disjoint, are applied in parallel and refit.
//!
//! Leaf contents never change; only the topology and internal boxes do. The
//! depth cap the tree was built with holds after every iteration.

use std::sync::atomic::{AtomicI64, Ordering};

use rayon::prelude::*;

use super::{Bvh, OptimizerConfig};
use crate::util::{Aabb, Real, Result, SharedSlice};

/// Parent of the root.
pub const NO_PARENT: u32 = u32::MAX;

/// Summary of an [`Bvh::optimize`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizeReport {
    pub passes: usize,
    pub reinsertions: usize,
    /// Passes undone because they increased the cost.
    pub rollbacks: usize,
    pub initial_cost: Real,
    pub final_cost: Real,
}

/// Best destination found for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Insertion {
    out: u32,
    improvement: Real,
}

impl Insertion {
    const NONE: Self = Self {
        out: 0,
        improvement: 0.0,
    };

    #[inline]
    fn is_some(&self) -> bool {
        self.improvement > 0.0
    }
}

/// Sibling of a non-root node: left children sit at odd indices.
#[inline]
pub fn sibling(index: usize) -> usize {
    debug_assert!(index != 0, "the root has no sibling");
    if index % 2 == 1 {
        index + 1
    } else {
        index - 1
    }
}

/// Lock token: improvement in the high word, owner in the low word.
///
/// Positive IEEE-754 floats order like their bit patterns, so comparing the
/// tokens as integers compares improvements first and owners second.
#[inline]
fn lock_token(improvement: Real, owner: usize) -> i64 {
    debug_assert!(improvement > 0.0);
    ((improvement_bits(improvement) as i64) << 32) | (owner as i64 & 0xFFFF_FFFF)
}

#[cfg(not(feature = "f64"))]
#[inline]
fn improvement_bits(improvement: Real) -> u32 {
    improvement.to_bits()
}

/// Rounds to single precision, which keeps the order but not strictly:
/// improvements closer than one `f32` ulp tie and the higher node wins.
/// Values below the smallest subnormal still map above zero.
#[cfg(feature = "f64")]
#[inline]
fn improvement_bits(improvement: Real) -> u32 {
    (improvement as f32).to_bits().max(1)
}

#[inline]
fn lock_owner(token: i64) -> usize {
    (token & 0xFFFF_FFFF) as usize
}

struct Optimizer<'a> {
    bvh: &'a mut Bvh,
    parents: Vec<u32>,
    /// Edges from the root, per node.
    depths: Vec<usize>,
    /// Edges to the deepest leaf below, per node.
    heights: Vec<usize>,
}

impl<'a> Optimizer<'a> {
    fn new(bvh: &'a mut Bvh) -> Self {
        let parents = bvh.parents();
        let node_count = bvh.nodes.len();
        let mut optimizer = Self {
            bvh,
            parents,
            depths: vec![0; node_count],
            heights: vec![0; node_count],
        };
        optimizer.update_levels();
        optimizer
    }

    /// Recomputes `depths` and `heights` for the current topology.
    fn update_levels(&mut self) {
        let nodes = &self.bvh.nodes;
        let mut order = Vec::with_capacity(nodes.len());
        let mut stack = vec![0usize];
        self.depths[0] = 0;
        while let Some(index) = stack.pop() {
            order.push(index);
            let node = &nodes[index];
            if !node.is_leaf() {
                let left = node.first_child();
                self.depths[left] = self.depths[index] + 1;
                self.depths[left + 1] = self.depths[index] + 1;
                stack.push(left);
                stack.push(left + 1);
            }
        }
        // Children come after their parent in `order`.
        for &index in order.iter().rev() {
            let node = &nodes[index];
            self.heights[index] = if node.is_leaf() {
                0
            } else {
                let left = node.first_child();
                1 + self.heights[left].max(self.heights[left + 1])
            };
        }
    }

    /// Whether `input` moved under `out` keeps every leaf within the depth
    /// cap. Both subtrees end up one level below `out`'s current slot.
    #[inline]
    fn fits(&self, input: usize, out: usize) -> bool {
        self.depths[out] + 1 + self.heights[input].max(self.heights[out]) <= self.bvh.max_depth
    }

    #[inline]
    fn parent(&self, index: usize) -> usize {
        self.parents[index] as usize
    }

    /// The six nodes a reinsertion of `input` under `out` touches.
    fn conflicts(&self, input: usize, out: usize) -> [usize; 6] {
        let parent_in = self.parent(input);
        [
            input,
            sibling(input),
            parent_in,
            if parent_in == 0 { input } else { self.parent(parent_in) },
            out,
            if out == 0 { out } else { self.parent(out) },
        ]
    }

    /// Searches the destination maximizing the SAH improvement of moving
    /// `input`, walking down into promising subtrees and back up through
    /// its ancestors. Destinations that would break the depth cap are skipped.
    fn search(&self, input: usize) -> Insertion {
        let nodes = &self.bvh.nodes;
        let parent_in = self.parent(input);
        let bbox_in = nodes[input].aabb();
        let area_parent = nodes[parent_in].half_area();

        let mut down = true;
        let mut pivot = parent_in;
        let mut out = sibling(input);
        let mut out_best = out;
        let mut bbox_pivot = Aabb::EMPTY;
        let mut d: Real = 0.0;
        let mut d_best: Real = 0.0;
        let d_bound = area_parent - bbox_in.half_area();

        loop {
            let bbox_out = nodes[out].aabb();
            let area_merged = bbox_in.union(&bbox_out).half_area();
            if down {
                let d_direct = area_parent - area_merged;
                if d_best < d_direct + d && self.fits(input, out) {
                    d_best = d_direct + d;
                    out_best = out;
                }
                d += bbox_out.half_area() - area_merged;
                if nodes[out].is_leaf() || d_bound + d <= d_best {
                    down = false;
                } else {
                    out = nodes[out].first_child();
                }
            } else {
                d -= bbox_out.half_area() - area_merged;
                if pivot == self.parent(out) {
                    bbox_pivot.extend(&bbox_out);
                    out = pivot;
                    if out != parent_in {
                        let area_merged = bbox_in.union(&bbox_pivot).half_area();
                        let d_direct = area_parent - area_merged;
                        if d_best < d_direct + d && self.fits(input, out) {
                            d_best = d_direct + d;
                            out_best = out;
                        }
                        d += nodes[out].half_area() - bbox_pivot.half_area();
                    }
                    if out == 0 {
                        break;
                    }
                    out = sibling(pivot);
                    pivot = self.parent(out);
                    down = true;
                } else if out % 2 == 1 {
                    out = sibling(out);
                    down = true;
                } else {
                    out = self.parent(out);
                }
            }
        }

        if out_best == input || out_best == sibling(input) || out_best == parent_in {
            return Insertion::NONE;
        }
        Insertion {
            out: out_best as u32,
            improvement: d_best,
        }
    }

    /// Runs one strided iteration. Returns the number of reinsertions applied.
    fn iterate(&mut self, first: usize, stride: usize, locks: &[AtomicI64]) -> usize {
        let node_count = self.bvh.nodes.len();
        let candidates: Vec<usize> = (first..node_count).step_by(stride).collect();

        self.update_levels();
        locks.par_iter().for_each(|lock| lock.store(0, Ordering::Relaxed));

        let this = &*self;
        let outs: Vec<(usize, Insertion)> = candidates
            .par_iter()
            .map(|&i| (i, this.search(i)))
            .filter(|(_, insertion)| insertion.is_some())
            .collect();

        outs.par_iter().for_each(|&(i, insertion)| {
            let token = lock_token(insertion.improvement, i);
            for c in this.conflicts(i, insertion.out as usize) {
                locks[c].fetch_max(token, Ordering::Relaxed);
            }
        });

        let mut winners: Vec<(usize, Insertion)> = outs
            .into_par_iter()
            .filter(|&(i, insertion)| {
                this.conflicts(i, insertion.out as usize)
                    .iter()
                    .all(|&c| lock_owner(locks[c].load(Ordering::Relaxed)) == i)
            })
            .collect();
        winners.par_sort_unstable_by(|a, b| {
            b.1.improvement
                .total_cmp(&a.1.improvement)
                .then(a.0.cmp(&b.0))
        });
        let winners: Vec<(usize, usize)> = winners
            .into_iter()
            .map(|(i, insertion)| (i, insertion.out as usize))
            .collect();

        self.apply_within_depth(winners)
    }

    /// Applies `winners` (best first) and checks the depth cap.
    ///
    /// Each winner fits on its own, but one can move a subtree holding
    /// another's destination, so together they may overshoot. An overshooting
    /// batch is undone and retried with its better half.
    fn apply_within_depth(&mut self, mut winners: Vec<(usize, usize)>) -> usize {
        if winners.is_empty() {
            return 0;
        }
        let snapshot = (self.bvh.nodes.clone(), self.parents.clone());
        loop {
            self.apply(&winners);
            if self.bvh.depth() <= self.bvh.max_depth {
                return winners.len();
            }
            self.bvh.nodes.clone_from(&snapshot.0);
            self.parents.clone_from(&snapshot.1);
            tracing::trace!(batch = winners.len(), "batch exceeds max depth, halving");
            if winners.len() == 1 {
                return 0;
            }
            winners.truncate(winners.len() / 2);
        }
    }

    /// Applies non-conflicting reinsertions in parallel, then refits.
    fn apply(&mut self, winners: &[(usize, usize)]) {
        let refit_roots: Vec<[usize; 2]> = {
            let parents_snapshot = &self.parents;
            winners
                .iter()
                .map(|&(input, out)| [out, parents_snapshot[input] as usize])
                .collect()
        };

        {
            let nodes = SharedSlice::new(&mut self.bvh.nodes);
            let parents = SharedSlice::new(&mut self.parents);
            winners.par_iter().for_each(|&(input, out)| {
                // SAFETY: every node read or written below is in the conflict
                // set of this reinsertion, which it owns exclusively after
                // lock validation. Parent entries written belong to children
                // of owned nodes and so are not touched by any other winner.
                unsafe { reinsert(&nodes, &parents, input, out) };
            });
        }

        for &[out, old_parent] in &refit_roots {
            self.refit_from(out);
            self.refit_from(old_parent);
        }
    }

    /// Recomputes the boxes of `index` (if internal) and all its ancestors.
    fn refit_from(&mut self, mut index: usize) {
        loop {
            let node = self.bvh.nodes[index];
            if !node.is_leaf() {
                let left = node.first_child();
                let aabb = self.bvh.nodes[left]
                    .aabb()
                    .union(&self.bvh.nodes[left + 1].aabb());
                self.bvh.nodes[index].set_aabb(&aabb);
            }
            if index == 0 {
                break;
            }
            index = self.parent(index);
        }
    }

    /// One outer pass: iterations `1..=stride` at the given stride.
    fn pass(&mut self, stride: usize, locks: &[AtomicI64]) -> usize {
        let mut moved = 0;
        for k in 0..stride {
            moved += self.iterate(k + 1, stride, locks);
        }
        moved
    }

    fn run(&mut self, config: &OptimizerConfig) -> OptimizeReport {
        self.run_with(config, Self::pass)
    }

    fn run_with<F>(&mut self, config: &OptimizerConfig, mut pass: F) -> OptimizeReport
    where
        F: FnMut(&mut Self, usize, &[AtomicI64]) -> usize,
    {
        let initial_cost = self.bvh.sah_cost();
        let mut report = OptimizeReport {
            passes: 0,
            reinsertions: 0,
            rollbacks: 0,
            initial_cost,
            final_cost: initial_cost,
        };
        if self.bvh.nodes.len() < 5 {
            return report;
        }

        let locks: Vec<AtomicI64> = (0..self.bvh.nodes.len()).map(|_| AtomicI64::new(0)).collect();
        let mut stride = config.stride;
        let mut old_cost = initial_cost;

        while stride > 1 && report.passes < config.max_passes {
            let snapshot = (self.bvh.nodes.clone(), self.parents.clone());
            let moved = pass(self, stride, &locks);
            report.passes += 1;

            let cost = self.bvh.sah_cost();
            tracing::trace!(pass = report.passes, stride, moved, cost, "reinsertion pass");

            if cost > old_cost {
                (self.bvh.nodes, self.parents) = snapshot;
                report.rollbacks += 1;
                stride -= 1;
                tracing::debug!(stride, "pass increased SAH cost, rolled back");
                continue;
            }

            report.reinsertions += moved;
            if old_cost - cost <= config.threshold {
                stride -= 1;
                tracing::debug!(stride, cost, "converged at stride, shrinking");
            }
            old_cost = cost;
        }

        report.final_cost = old_cost;
        report
    }
}

/// Moves `input` under `out`: `out` becomes an internal node with children
/// `input` and a copy of the old `out`, and the old sibling of `input` takes
/// the place of its former parent.
///
/// # Safety
///
/// No other task may concurrently access the nodes in
/// `conflicts(input, out)` nor the parent entries of their children.
unsafe fn reinsert(
    nodes: &SharedSlice<'_, super::Node>,
    parents: &SharedSlice<'_, u32>,
    input: usize,
    out: usize,
) {
    let sibling_in = sibling(input);
    let parent_in = parents.read(input) as usize;
    let sibling_node = nodes.read(sibling_in);
    let out_node = nodes.read(out);

    let mut new_out = out_node;
    new_out.set_aabb(&out_node.aabb().union(&nodes.read(input).aabb()));
    new_out.make_internal(input.min(sibling_in) as u32);
    nodes.write(out, new_out);
    nodes.write(sibling_in, out_node);
    nodes.write(parent_in, sibling_node);

    if !out_node.is_leaf() {
        let first = out_node.first_child();
        parents.write(first, sibling_in as u32);
        parents.write(first + 1, sibling_in as u32);
    }
    if !sibling_node.is_leaf() {
        let first = sibling_node.first_child();
        parents.write(first, parent_in as u32);
        parents.write(first + 1, parent_in as u32);
    }
    parents.write(sibling_in, out as u32);
    parents.write(input, out as u32);
}

impl Bvh {
    /// Parent index of every node; the root maps to [`NO_PARENT`].
    pub fn parents(&self) -> Vec<u32> {
        let mut parents = vec![NO_PARENT; self.nodes.len()];
        {
            let shared = SharedSlice::new(&mut parents);
            self.nodes.par_iter().enumerate().for_each(|(i, node)| {
                if !node.is_leaf() {
                    let left = node.first_child();
                    // SAFETY: every node has a single parent, so each child
                    // entry is written by exactly one iteration.
                    unsafe {
                        shared.write(left, i as u32);
                        shared.write(left + 1, i as u32);
                    }
                }
            });
        }
        parents
    }

    /// Runs parallel reinsertion until the stride reaches 1.
    ///
    /// The SAH cost never increases between outer passes; a pass that would
    /// raise it is rolled back.
    #[tracing::instrument(skip_all, fields(node_count = self.nodes.len()))]
    pub fn optimize(&mut self, config: &OptimizerConfig) -> Result<OptimizeReport> {
        config.validate()?;
        let report = Optimizer::new(self).run(config);
        tracing::debug!(
            passes = report.passes,
            reinsertions = report.reinsertions,
            initial_cost = report.initial_cost,
            final_cost = report.final_cost,
            "BVH optimized"
        );
        Ok(report)
    }
}
