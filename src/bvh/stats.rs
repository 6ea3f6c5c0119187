//! Cost, shape statistics and structural validation.

use std::fmt;

use rayon::prelude::*;

use super::Bvh;
use crate::util::{Aabb, Error, Real, Result};

const SUM_CHUNK: usize = 4096;

/// Summary of a tree's shape.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BvhStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub depth: usize,
    pub max_leaf_size: usize,
    pub average_leaf_size: f64,
    pub sah_cost: Real,
}

impl fmt::Display for BvhStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} leaves (avg {:.2}, max {} prims), depth {}, SAH {:.3}",
            self.node_count,
            self.leaf_count,
            self.average_leaf_size,
            self.max_leaf_size,
            self.depth,
            self.sah_cost
        )
    }
}

impl Bvh {
    /// SAH cost normalized by the root's half area:
    /// `(traversal_cost * sum(internal areas) + sum(leaf area * count)) / root area`.
    ///
    /// A tree whose root has zero area (all primitives degenerate to a point)
    /// reports the unnormalized sum.
    pub fn sah_cost(&self) -> Real {
        let traversal_cost = self.traversal_cost as f64;
        // Fixed chunks keep the summation order, and so the result, repeatable.
        let partial: Vec<f64> = self
            .nodes
            .par_chunks(SUM_CHUNK)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|node| {
                        let area = node.half_area() as f64;
                        if node.is_leaf() {
                            area * node.primitive_count() as f64
                        } else {
                            area * traversal_cost
                        }
                    })
                    .sum::<f64>()
            })
            .collect();
        let sum: f64 = partial.iter().sum();
        let root_area = self.nodes[0].half_area() as f64;
        if root_area > 0.0 {
            (sum / root_area) as Real
        } else {
            sum as Real
        }
    }

    /// Length of the longest root-to-leaf path, in edges.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, d)) = stack.pop() {
            let node = &self.nodes[index];
            if node.is_leaf() {
                depth = depth.max(d);
            } else {
                stack.push((node.first_child(), d + 1));
                stack.push((node.first_child() + 1, d + 1));
            }
        }
        depth
    }

    pub fn stats(&self) -> BvhStats {
        let (leaf_count, max_leaf_size) = self
            .nodes
            .iter()
            .filter(|node| node.is_leaf())
            .fold((0, 0), |(count, max), node| {
                (count + 1, max.max(node.primitive_count() as usize))
            });
        BvhStats {
            node_count: self.nodes.len(),
            leaf_count,
            depth: self.depth(),
            max_leaf_size,
            average_leaf_size: self.primitive_indices.len() as f64 / leaf_count.max(1) as f64,
            sah_cost: self.sah_cost(),
        }
    }

    /// Checks the structural invariants against the boxes the tree was built
    /// from:
    ///
    /// - every node is reachable from the root exactly once
    /// - left children sit at odd indices with the right child next to them
    /// - internal boxes equal the union of their children
    /// - leaf boxes contain their primitives' boxes
    /// - every primitive is referenced by exactly one leaf
    /// - at most `2N - 1` nodes
    /// - no leaf deeper than [`Bvh::max_depth`]
    pub fn validate(&self, bboxes: &[Aabb]) -> Result<()> {
        let n = self.primitive_indices.len();
        if bboxes.len() != n {
            return Err(Error::invariant(format!(
                "tree has {} primitives, {} boxes given",
                n,
                bboxes.len()
            )));
        }
        if self.nodes.is_empty() || self.nodes.len() > (2 * n).saturating_sub(1).max(1) {
            return Err(Error::invariant(format!(
                "{} nodes for {} primitives",
                self.nodes.len(),
                n
            )));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut covered = vec![false; n];
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            if depth > self.max_depth {
                return Err(Error::invariant(format!(
                    "node {index} at depth {depth} exceeds max depth {}",
                    self.max_depth
                )));
            }
            if std::mem::replace(&mut visited[index], true) {
                return Err(Error::invariant(format!("node {index} reached twice")));
            }
            let node = &self.nodes[index];
            let aabb = node.aabb();

            if node.is_leaf() {
                let range = node.primitive_range();
                if node.primitive_count() == 0 || range.end > n {
                    return Err(Error::invariant(format!(
                        "leaf {index} has bad primitive range {range:?}"
                    )));
                }
                for &primitive in &self.primitive_indices[range] {
                    let primitive = primitive as usize;
                    if primitive >= n || std::mem::replace(&mut covered[primitive], true) {
                        return Err(Error::invariant(format!(
                            "primitive {primitive} referenced twice or out of range"
                        )));
                    }
                    if !aabb.contains(&bboxes[primitive]) {
                        return Err(Error::invariant(format!(
                            "leaf {index} does not contain primitive {primitive}"
                        )));
                    }
                }
                continue;
            }

            let left = node.first_child();
            if left % 2 != 1 || left + 1 >= self.nodes.len() {
                return Err(Error::invariant(format!(
                    "node {index} has bad first child {left}"
                )));
            }
            let union = self.nodes[left].aabb().union(&self.nodes[left + 1].aabb());
            if union != aabb {
                return Err(Error::invariant(format!(
                    "node {index} box {aabb:?} is not the union of its children {union:?}"
                )));
            }
            stack.push((left, depth + 1));
            stack.push((left + 1, depth + 1));
        }

        if let Some(index) = visited.iter().position(|&v| !v) {
            return Err(Error::invariant(format!("node {index} is unreachable")));
        }
        if let Some(primitive) = covered.iter().position(|&c| !c) {
            return Err(Error::invariant(format!(
                "primitive {primitive} is not in any leaf"
            )));
        }
        Ok(())
    }
}
