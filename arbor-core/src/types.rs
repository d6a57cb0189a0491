//! # Core Data Types
//!
//! Types shared between the engine, the boundary and the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// External item identifier
pub type ItemId = i32;

/// Distance metrics recognised by the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Angular,
    Euclidean,
    Manhattan,
    Dot,
    Hamming,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Angular,
        MetricKind::Euclidean,
        MetricKind::Manhattan,
        MetricKind::Dot,
        MetricKind::Hamming,
    ];

    /// Name accepted by the factory
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Angular => "angular",
            MetricKind::Euclidean => "euclidean",
            MetricKind::Manhattan => "manhattan",
            MetricKind::Dot => "dot",
            MetricKind::Hamming => "hamming",
        }
    }

    /// Tag byte stored in index file headers
    pub fn as_byte(&self) -> u8 {
        match self {
            MetricKind::Angular => 0,
            MetricKind::Euclidean => 1,
            MetricKind::Manhattan => 2,
            MetricKind::Dot => 3,
            MetricKind::Hamming => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MetricKind::Angular),
            1 => Some(MetricKind::Euclidean),
            2 => Some(MetricKind::Manhattan),
            3 => Some(MetricKind::Dot),
            4 => Some(MetricKind::Hamming),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    // Exact, case-sensitive match: "cosine" or "Angular" are not metrics.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownMetric { name: s.to_string() })
    }
}

/// Nearest neighbor query result, ordered by increasing distance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub ids: Vec<ItemId>,
    /// Present only when the caller asked for distances
    pub distances: Option<Vec<f32>>,
}

impl Neighbors {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
