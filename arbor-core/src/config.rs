//! # Configuration Management
//!
//! Tuning for the forest engine. Defaults reproduce the classic random
//! projection forest behaviour; callers only override them for experiments.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seed used when `set_seed` was never called.
pub const DEFAULT_SEED: u64 = 1_234_567_890_987_654_321;

/// Refinement steps of the two-means split heuristic.
pub const TWO_MEANS_ITERATIONS: usize = 200;

/// Attempts at a balanced hyperplane before falling back to a random split.
pub const SPLIT_ATTEMPTS: usize = 3;

/// Random bit picks tried by the Hamming split before scanning every bit.
pub const HAMMING_BIT_PICKS: usize = 20;

/// Smallest acceptable share of items on either side of a split.
pub const MIN_SPLIT_FRACTION: f64 = 0.05;

/// Trees grown per round when the tree count is chosen automatically.
pub const AUTO_TREE_BATCH: usize = 4;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub build: BuildConfig,
    pub search: SearchConfig,
}

impl IndexConfig {
    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.build.leaf_size == Some(0) {
            return Err(Error::Configuration {
                message: "leaf_size must be at least 1".to_string(),
            });
        }
        if self.build.two_means_iterations == 0 {
            return Err(Error::Configuration {
                message: "two_means_iterations must be at least 1".to_string(),
            });
        }
        if self.build.split_attempts == 0 {
            return Err(Error::Configuration {
                message: "split_attempts must be at least 1".to_string(),
            });
        }
        if self.search.search_k_factor == 0 {
            return Err(Error::Configuration {
                message: "search_k_factor must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Tree construction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum items per leaf. `None` derives it from the vector width.
    pub leaf_size: Option<usize>,
    pub two_means_iterations: usize,
    pub split_attempts: usize,
    pub default_seed: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            leaf_size: None,
            two_means_iterations: TWO_MEANS_ITERATIONS,
            split_attempts: SPLIT_ATTEMPTS,
            default_seed: DEFAULT_SEED,
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// A non-positive `search_k` expands to `n * n_trees * search_k_factor`.
    pub search_k_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { search_k_factor: 1 }
    }
}
