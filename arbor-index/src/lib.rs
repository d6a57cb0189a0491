//! # Arbor Index
//!
//! Approximate nearest-neighbor search behind one metric-agnostic interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      create(dim, name)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   angular / euclidean / manhattan / dot        hamming      │
//! │              │                                    │         │
//! │      ForestIndex<M: Metric>               HammingAdapter    │
//! │         (f32 vectors)                  (packs into u64 bits)│
//! │              │                                    │         │
//! │              │                        ForestIndex<Hamming>  │
//! │              └──────────────┬─────────────────────┘         │
//! │                             │                               │
//! │                   Box<dyn AnnIndex>                         │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `distance`: SIMD-accelerated distance kernels (AVX2/FMA)
//! - `metric`: Per-metric split and ranking policies
//! - `forest`: Tree build, search and lifecycle
//! - `storage`: On-disk persistence (memory-mapped load)
//! - `traits`: Common AnnIndex trait
//! - `hamming`: Float-to-bit adapter for the Hamming backend
//! - `factory`: Metric name to backend selection

pub mod distance;
pub mod factory;
pub mod forest;
pub mod hamming;
pub mod metric;
mod storage;
pub mod traits;

pub use factory::{create, create_kind, create_with_config};
pub use forest::{ForestIndex, NnsResult};
pub use hamming::{pack, packed_len, unpack, HammingAdapter};
pub use metric::{Angular, DotProduct, Euclidean, Hamming, Manhattan, Metric};
pub use traits::AnnIndex;

pub use arbor_core::{Error, IndexConfig, ItemId, MetricKind, Neighbors, Result};
