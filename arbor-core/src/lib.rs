//! # Arbor Core
//!
//! Building blocks shared by every Arbor crate:
//! - Error type and result alias
//! - Index configuration
//! - Item, metric and neighbor types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   arbor-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • types   - Item ids, metrics, neighbor lists  │
//! │  • config  - Build and search tuning           │
//! │  • error   - Error handling                    │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::{BuildConfig, IndexConfig, SearchConfig};
pub use error::{Error, Result};
pub use types::{ItemId, MetricKind, Neighbors};
