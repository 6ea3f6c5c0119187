//! Rays with a mutable parametric interval.

use crate::util::{Real, Vector3};

/// A ray `origin + t * direction` restricted to `t` in `[tmin, tmax]`.
///
/// `tmax` shrinks during closest-hit traversal as nearer hits are found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3,
    pub direction: Vector3,
    pub tmin: Real,
    pub tmax: Real,
}

impl Ray {
    /// Ray over `[0, +inf)`.
    #[inline]
    pub fn new(origin: Vector3, direction: Vector3) -> Self {
        Self::with_range(origin, direction, 0.0, Real::INFINITY)
    }

    #[inline]
    pub fn with_range(origin: Vector3, direction: Vector3, tmin: Real, tmax: Real) -> Self {
        Self {
            origin,
            direction,
            tmin,
            tmax,
        }
    }

    /// Point at parameter `t`.
    #[inline]
    pub fn at(&self, t: Real) -> Vector3 {
        self.origin + self.direction * t
    }

    /// Whether `t` lies inside the current interval.
    #[inline]
    pub fn contains(&self, t: Real) -> bool {
        t >= self.tmin && t <= self.tmax
    }
}
