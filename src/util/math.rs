//! Scalar/vector aliases and the axis-aligned bounding box.
//!
//! The scalar precision is picked at compile time: `f32` with `glam::Vec3` by
//! default, `f64` with `glam::DVec3` when the `f64` feature is enabled. All
//! algorithms in the crate are written against [`Real`] and [`Vector3`].

use std::fmt;

#[cfg(not(feature = "f64"))]
mod precision {
    /// Scalar type used for every geometric computation.
    pub type Real = f32;
    /// Three-component vector matching [`Real`].
    pub type Vector3 = glam::Vec3;
    /// Two-component vector matching [`Real`] (texture coordinates).
    pub type Vector2 = glam::Vec2;
}

#[cfg(feature = "f64")]
mod precision {
    /// Scalar type used for every geometric computation.
    pub type Real = f64;
    /// Three-component vector matching [`Real`].
    pub type Vector3 = glam::DVec3;
    /// Two-component vector matching [`Real`] (texture coordinates).
    pub type Vector2 = glam::DVec2;
}

pub use precision::*;

/// Axis-aligned bounding box.
///
/// After any construction `min <= max` componentwise, except for
/// [`Aabb::EMPTY`] which is the identity of [`Aabb::extend`].
#[derive(Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3,
    pub max: Vector3,
}

impl Aabb {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vector3::splat(Real::INFINITY),
        max: Vector3::splat(Real::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: Vector3) -> Self {
        Self { min: p, max: p }
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn extend_point(&mut self, p: Vector3) -> &mut Self {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
        self
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn extend(&mut self, other: &Self) -> &mut Self {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self
    }

    /// Union of two boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// `max - min`.
    #[inline]
    pub fn diagonal(&self) -> Vector3 {
        self.max - self.min
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vector3 {
        (self.min + self.max) * 0.5
    }

    /// Half of the surface area, the SAH cost proxy.
    ///
    /// Zero for [`Aabb::EMPTY`], so empty bins contribute nothing to a sweep.
    #[inline]
    pub fn half_area(&self) -> Real {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.diagonal();
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        other.is_empty()
            || (self.min.cmple(other.min).all() && self.max.cmpge(other.max).all())
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb({:?} - {:?})", self.min, self.max)
    }
}
