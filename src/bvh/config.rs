//! Runtime tuning knobs for construction and optimization.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::util::{Error, Real, Result};

/// Parameters of the binned SAH builder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BuildConfig {
    /// Number of centroid bins per axis.
    pub bin_count: usize,
    /// Depth at which a leaf is forced.
    pub max_depth: usize,
    /// Work items above this many primitives are spawned as separate tasks
    /// and have their three axes binned in parallel.
    pub parallel_threshold: usize,
    /// SAH cost of visiting an internal node, relative to one primitive test.
    pub traversal_cost: Real,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            bin_count: 32,
            max_depth: 64,
            parallel_threshold: 1024,
            traversal_cost: 1.5,
        }
    }
}

impl BuildConfig {
    pub fn with_bin_count(mut self, bin_count: usize) -> Self {
        self.bin_count = bin_count;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }

    pub fn with_traversal_cost(mut self, traversal_cost: Real) -> Self {
        self.traversal_cost = traversal_cost;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bin_count < 2 {
            return Err(Error::config(format!(
                "bin_count must be at least 2, got {}",
                self.bin_count
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::config("max_depth must be at least 1"));
        }
        if !self.traversal_cost.is_finite() || self.traversal_cost < 0.0 {
            return Err(Error::config(format!(
                "traversal_cost must be finite and non-negative, got {}",
                self.traversal_cost
            )));
        }
        Ok(())
    }
}

/// Parameters of the parallel reinsertion optimizer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OptimizerConfig {
    /// Initial stride `u`: one iteration handles the nodes `i = k mod u`.
    pub stride: usize,
    /// Minimum SAH cost decrease of an outer pass before the stride shrinks.
    pub threshold: Real,
    /// Hard cap on outer passes.
    pub max_passes: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            stride: 9,
            threshold: 0.1,
            max_passes: 1000,
        }
    }
}

impl OptimizerConfig {
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_threshold(mut self, threshold: Real) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::config("stride must be at least 1"));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(Error::config(format!(
                "threshold must be finite and non-negative, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}
