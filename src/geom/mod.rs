//! Geometric primitives consumed by the BVH.
//!
//! - [`Ray`] - Ray with a mutable `[tmin, tmax]` interval
//! - [`Triangle`] / [`TriangleHit`] - Triangle and its intersection record
//! - [`TriangleMesh`] - Triangle soup with carried shading attributes

mod mesh;
mod ray;
mod triangle;

pub use mesh::{TriangleAttributes, TriangleMesh};
pub use ray::Ray;
pub use triangle::{Triangle, TriangleHit, TriangleIntersector};
