//! Bounding volume hierarchy over arbitrary primitives.
//!
//! The tree only sees per-primitive bounding boxes and centroids at build
//! time, and an [`Intersector`] at query time:
//!
//! - [`build`] - Parallel binned SAH construction
//! - [`Bvh::optimize`] - Parallel reinsertion to lower the SAH cost
//! - [`Bvh::intersect_closest`] / [`Bvh::intersect_any`] - Ray traversal
//! - [`Bvh::stats`] / [`Bvh::validate`] - Diagnostics
//!
//! Nodes live in one flat array with the root at index 0. The children of an
//! internal node always occupy two consecutive slots, left at an odd index.

mod build;
mod config;
mod node;
mod optimize;
mod stats;
mod traverse;

pub use build::build;
pub use config::{BuildConfig, OptimizerConfig};
pub use node::{Node, MAX_PRIMITIVE_COUNT};
pub use optimize::{sibling, OptimizeReport, NO_PARENT};
pub use stats::BvhStats;
pub use traverse::{Hit, Intersector};

use crate::util::{Aabb, Real, Result, Vector3};

/// Flat BVH: node array plus the primitive index permutation leaves refer to.
#[derive(Debug, Clone)]
pub struct Bvh {
    pub(crate) nodes: Vec<Node>,
    pub(crate) primitive_indices: Vec<u32>,
    pub(crate) traversal_cost: Real,
    pub(crate) max_depth: usize,
}

impl Bvh {
    /// Builds a BVH; see [`build`].
    pub fn build(bboxes: &[Aabb], centers: &[Vector3], config: &BuildConfig) -> Result<Self> {
        build(bboxes, centers, config)
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Permutation of primitive ids; leaves reference contiguous ranges of it.
    #[inline]
    pub fn primitive_indices(&self) -> &[u32] {
        &self.primitive_indices
    }

    #[inline]
    pub fn primitive_count(&self) -> usize {
        self.primitive_indices.len()
    }

    /// Traversal cost relative to one primitive intersection, used by
    /// [`Bvh::sah_cost`].
    #[inline]
    pub fn traversal_cost(&self) -> Real {
        self.traversal_cost
    }

    /// Depth cap the tree was built with.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}
