//! # Hamming Adapter
//!
//! Serves the float-vector [`AnnIndex`] contract on top of a forest of
//! packed bit-vectors.
//!
//! ```text
//!   external  [0.9, 0.1, 0.6, 0.4, 1.0]        f_external = 5
//!                │ pack: bit i set iff v[i] > 0.5
//!                ▼
//!   internal  [0b10101]                        f_internal = ceil(5 / 64) = 1
//!                │ unpack: 1.0 / 0.0 per bit
//!                ▼
//!   get_item  [1.0, 0.0, 1.0, 0.0, 1.0]
//! ```
//!
//! Packing is lossy; only the threshold survives a round trip.

use std::path::Path;

use arbor_core::{Error, IndexConfig, ItemId, MetricKind, Neighbors, Result};

use crate::forest::ForestIndex;
use crate::metric::Hamming;
use crate::traits::AnnIndex;

const WORD_BITS: usize = 64;

/// Number of `u64` words needed for `f` bits
#[inline]
pub fn packed_len(f: usize) -> usize {
    f.div_ceil(WORD_BITS)
}

/// Threshold `v` at 0.5 into `f_internal` little-endian bit words
pub fn pack(v: &[f32], f_internal: usize) -> Vec<u64> {
    let mut words = vec![0u64; f_internal];
    for (i, &x) in v.iter().enumerate() {
        if x > 0.5 {
            words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
        }
    }
    words
}

/// Expand the first `f_external` bits of `words` into 0.0 / 1.0 values
pub fn unpack(words: &[u64], f_external: usize) -> Vec<f32> {
    (0..f_external)
        .map(|i| {
            if (words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 == 1 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Hamming backend behind the float-vector interface
#[derive(Debug)]
pub struct HammingAdapter {
    f_external: usize,
    f_internal: usize,
    index: ForestIndex<Hamming>,
}

impl HammingAdapter {
    pub fn new(f: usize, config: IndexConfig) -> Self {
        let f_internal = packed_len(f);
        Self {
            f_external: f,
            f_internal,
            index: ForestIndex::new(f_internal, config),
        }
    }

    /// Width of the packed representation in words
    pub fn packed_dimension(&self) -> usize {
        self.f_internal
    }

    fn pack_checked(&self, vector: &[f32]) -> Result<Vec<u64>> {
        if vector.len() != self.f_external {
            return Err(Error::DimensionMismatch {
                expected: self.f_external,
                actual: vector.len(),
            });
        }
        Ok(pack(vector, self.f_internal))
    }
}

fn to_neighbors((ids, distances): (Vec<ItemId>, Option<Vec<u64>>)) -> Neighbors {
    Neighbors {
        ids,
        distances: distances.map(|d| d.into_iter().map(|x| x as f32).collect()),
    }
}

impl AnnIndex for HammingAdapter {
    fn add_item(&mut self, item: ItemId, vector: &[f32]) -> Result<()> {
        let packed = self.pack_checked(vector)?;
        self.index.add_item(item, &packed)
    }

    fn build(&mut self, n_trees: i32, n_threads: i32) -> Result<()> {
        self.index.build(n_trees, n_threads)
    }

    fn unbuild(&mut self) -> Result<()> {
        self.index.unbuild()
    }

    fn save(&mut self, path: &Path, prefault: bool) -> Result<()> {
        self.index.save(path, prefault)
    }

    fn load(&mut self, path: &Path, prefault: bool) -> Result<()> {
        self.index.load(path, prefault)
    }

    fn unload(&mut self) {
        self.index.unload()
    }

    fn on_disk_build(&mut self, path: &Path) -> Result<()> {
        self.index.on_disk_build(path)
    }

    fn get_distance(&self, i: ItemId, j: ItemId) -> Result<f32> {
        Ok(self.index.get_distance(i, j)? as f32)
    }

    fn get_nns_by_item(
        &self,
        item: ItemId,
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors> {
        self.index
            .get_nns_by_item(item, n, search_k, include_distances)
            .map(to_neighbors)
    }

    fn get_nns_by_vector(
        &self,
        vector: &[f32],
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors> {
        let packed = self.pack_checked(vector)?;
        self.index
            .get_nns_by_vector(&packed, n, search_k, include_distances)
            .map(to_neighbors)
    }

    fn get_item(&self, item: ItemId) -> Result<Vec<f32>> {
        let words = self.index.get_item(item)?;
        Ok(unpack(&words, self.f_external))
    }

    fn get_n_items(&self) -> i32 {
        self.index.n_items() as i32
    }

    fn get_n_trees(&self) -> i32 {
        self.index.n_trees() as i32
    }

    fn set_seed(&mut self, seed: u64) {
        self.index.set_seed(seed)
    }

    fn verbose(&mut self, enabled: bool) {
        self.index.verbose(enabled)
    }

    fn dimension(&self) -> usize {
        self.f_external
    }

    fn metric(&self) -> MetricKind {
        MetricKind::Hamming
    }
}
