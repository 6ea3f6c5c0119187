//! # raybvh
//!
//! Parallel bounding volume hierarchy for triangle ray tracing.
//!
//! A binned SAH builder runs as rayon tasks, an optional reinsertion
//! optimizer lowers the tree's SAH cost in parallel afterwards, and a
//! single-ray traverser answers closest-hit and any-hit queries.
//!
//! ## Modules
//!
//! - [`util`] - Basic types (precision aliases, AABB, errors)
//! - [`geom`] - Rays, triangles and triangle meshes
//! - [`bvh`] - Tree construction, optimization and traversal
//! - [`accel`] - Mesh-level acceleration structure
//!
//! ## Example
//!
//! ```no_run
//! use raybvh::prelude::*;
//!
//! let mesh = TriangleMesh::from_triangles(vec![Triangle::new(
//!     Vector3::new(-1.0, -1.0, 1.0),
//!     Vector3::new(1.0, -1.0, 1.0),
//!     Vector3::new(0.0, 1.0, 1.0),
//! )]);
//! let accel = AccelerationStructure::new(
//!     mesh,
//!     &BuildConfig::default(),
//!     Some(&OptimizerConfig::default()),
//! )?;
//!
//! let ray = Ray::new(Vector3::ZERO, Vector3::Z);
//! if let Some(hit) = accel.raycast(&ray) {
//!     println!("hit triangle {} at t={}", hit.triangle_index, hit.distance);
//! }
//! # Ok::<(), raybvh::Error>(())
//! ```

pub mod util;
pub mod geom;
pub mod bvh;
pub mod accel;

// Re-export commonly used types
pub use util::{Aabb, Error, Real, Result, Vector3};
pub use accel::{AccelerationStructure, SurfaceHit};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Aabb, Error, Real, Result, Vector2, Vector3};
    pub use crate::geom::*;
    pub use crate::bvh::{BuildConfig, Bvh, Hit, Intersector, OptimizerConfig};
    pub use crate::accel::{AccelerationStructure, SurfaceHit};
}
