//! Error types for BVH construction and validation.

use thiserror::Error;

/// Main error type for BVH operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// `build` was called without any primitive
    #[error("Cannot build a BVH over zero primitives")]
    EmptyInput,

    /// Bounding boxes and centers are not index-aligned
    #[error("Input length mismatch: {bboxes} bounding boxes, {centers} centers")]
    LengthMismatch { bboxes: usize, centers: usize },

    /// Primitive count does not fit in the node's 31-bit count field
    #[error("Too many primitives: {0}")]
    TooManyPrimitives(usize),

    /// A vertex index of an indexed mesh is out of bounds
    #[error("Vertex index {index} out of bounds (count: {count})")]
    VertexOutOfBounds { index: usize, count: usize },

    /// A tuning knob is out of its valid range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A structural invariant of the tree does not hold
    #[error("BVH invariant violated: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

/// Result type alias for BVH operations.
pub type Result<T> = std::result::Result<T, Error>;
