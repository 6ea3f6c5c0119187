//! Packed BVH node.
//!
//! Flat array layout optimized for traversal:
//! - 32-byte nodes at single precision (two per cache line)
//! - bounds stored as `[min.x, min.y, min.z, max.x, max.y, max.z]` so the
//!   traverser can index entry/exit planes by ray octant
//! - no parent pointer; siblings are consecutive (`left`, `left + 1`)

use bytemuck::{Pod, Zeroable};

use crate::util::{Aabb, Real, Vector3};

const LEAF_BIT: u32 = 1 << 31;
const COUNT_MASK: u32 = !LEAF_BIT;

/// Largest primitive count representable in a leaf.
pub const MAX_PRIMITIVE_COUNT: usize = COUNT_MASK as usize;

/// BVH node.
///
/// Internal node: `first_child_or_primitive` = left child index, count = 0.
/// Leaf node: `first_child_or_primitive` = first slot in the primitive index
/// array, count = number of primitives.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Node {
    pub bounds: [Real; 6],
    /// Bit 31: leaf flag. Bits 0..31: primitive count.
    flags_and_count: u32,
    pub first_child_or_primitive: u32,
}

#[cfg(not(feature = "f64"))]
const _: () = assert!(std::mem::size_of::<Node>() == 32);

impl Node {
    pub fn leaf(aabb: &Aabb, first_primitive: u32, primitive_count: u32) -> Self {
        let mut node = Self::zeroed();
        node.set_aabb(aabb);
        node.make_leaf(first_primitive, primitive_count);
        node
    }

    pub fn internal(aabb: &Aabb, first_child: u32) -> Self {
        let mut node = Self::zeroed();
        node.set_aabb(aabb);
        node.make_internal(first_child);
        node
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags_and_count & LEAF_BIT != 0
    }

    /// Number of referenced primitives; zero for internal nodes.
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        self.flags_and_count & COUNT_MASK
    }

    /// Left child index. Only meaningful for internal nodes.
    #[inline]
    pub fn first_child(&self) -> usize {
        self.first_child_or_primitive as usize
    }

    /// Slots of the primitive index array covered by this leaf.
    #[inline]
    pub fn primitive_range(&self) -> std::ops::Range<usize> {
        let first = self.first_child_or_primitive as usize;
        first..first + self.primitive_count() as usize
    }

    #[inline]
    pub fn make_leaf(&mut self, first_primitive: u32, primitive_count: u32) {
        debug_assert!(primitive_count <= COUNT_MASK);
        self.flags_and_count = LEAF_BIT | (primitive_count & COUNT_MASK);
        self.first_child_or_primitive = first_primitive;
    }

    #[inline]
    pub fn make_internal(&mut self, first_child: u32) {
        self.flags_and_count = 0;
        self.first_child_or_primitive = first_child;
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        let b = &self.bounds;
        Aabb::new(Vector3::new(b[0], b[1], b[2]), Vector3::new(b[3], b[4], b[5]))
    }

    #[inline]
    pub fn set_aabb(&mut self, aabb: &Aabb) {
        self.bounds = [
            aabb.min.x, aabb.min.y, aabb.min.z, aabb.max.x, aabb.max.y, aabb.max.z,
        ];
    }

    #[inline]
    pub fn half_area(&self) -> Real {
        self.aabb().half_area()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_leaf() {
            write!(
                f,
                "Leaf({:?}, first={}, count={})",
                self.aabb(),
                self.first_child_or_primitive,
                self.primitive_count()
            )
        } else {
            write!(f, "Internal({:?}, left={})", self.aabb(), self.first_child_or_primitive)
        }
    }
}
