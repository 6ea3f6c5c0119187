//! Utility types shared by every module.
//!
//! - [`Real`] / [`Vector3`] / [`Vector2`] - Compile-time selected precision
//! - [`Aabb`] - Axis-aligned bounding box
//! - [`Error`] / [`Result`] - Error handling

mod error;
mod math;
mod shared;

pub use error::*;
pub use math::*;
pub(crate) use shared::SharedSlice;
