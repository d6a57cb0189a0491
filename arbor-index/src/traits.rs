//! # Index Traits
//!
//! Metric-erased interface shared by every backend.
//!
//! Callers work with `f32` vectors and `f32` distances whatever the metric;
//! the Hamming backend converts at its edge.

use std::path::Path;

use arbor_core::{ItemId, MetricKind, Neighbors, Result};

use crate::forest::ForestIndex;
use crate::metric::Metric;

/// Approximate nearest-neighbor index - implemented by every metric backend
pub trait AnnIndex: Send {
    /// Register or overwrite the vector for `item`
    fn add_item(&mut self, item: ItemId, vector: &[f32]) -> Result<()>;

    /// Grow `n_trees` trees (`-1` picks the count) using `n_threads` workers (`-1` for all cores)
    fn build(&mut self, n_trees: i32, n_threads: i32) -> Result<()>;

    fn unbuild(&mut self) -> Result<()>;

    /// Write the index to `path` and reopen it read-only
    fn save(&mut self, path: &Path, prefault: bool) -> Result<()>;

    fn load(&mut self, path: &Path, prefault: bool) -> Result<()>;

    fn unload(&mut self);

    /// Stream the next build straight into `path`
    fn on_disk_build(&mut self, path: &Path) -> Result<()>;

    fn get_distance(&self, i: ItemId, j: ItemId) -> Result<f32>;

    fn get_nns_by_item(
        &self,
        item: ItemId,
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors>;

    fn get_nns_by_vector(
        &self,
        vector: &[f32],
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors>;

    fn get_item(&self, item: ItemId) -> Result<Vec<f32>>;

    /// One past the largest id ever added
    fn get_n_items(&self) -> i32;

    fn get_n_trees(&self) -> i32;

    fn set_seed(&mut self, seed: u64);

    fn verbose(&mut self, enabled: bool);

    /// Vector dimension as seen by callers
    fn dimension(&self) -> usize;

    fn metric(&self) -> MetricKind;
}

impl<M> AnnIndex for ForestIndex<M>
where
    M: Metric<Elem = f32, Distance = f32>,
{
    fn add_item(&mut self, item: ItemId, vector: &[f32]) -> Result<()> {
        ForestIndex::add_item(self, item, vector)
    }

    fn build(&mut self, n_trees: i32, n_threads: i32) -> Result<()> {
        ForestIndex::build(self, n_trees, n_threads)
    }

    fn unbuild(&mut self) -> Result<()> {
        ForestIndex::unbuild(self)
    }

    fn save(&mut self, path: &Path, prefault: bool) -> Result<()> {
        ForestIndex::save(self, path, prefault)
    }

    fn load(&mut self, path: &Path, prefault: bool) -> Result<()> {
        ForestIndex::load(self, path, prefault)
    }

    fn unload(&mut self) {
        ForestIndex::unload(self)
    }

    fn on_disk_build(&mut self, path: &Path) -> Result<()> {
        ForestIndex::on_disk_build(self, path)
    }

    fn get_distance(&self, i: ItemId, j: ItemId) -> Result<f32> {
        ForestIndex::get_distance(self, i, j)
    }

    fn get_nns_by_item(
        &self,
        item: ItemId,
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors> {
        let (ids, distances) =
            ForestIndex::get_nns_by_item(self, item, n, search_k, include_distances)?;
        Ok(Neighbors { ids, distances })
    }

    fn get_nns_by_vector(
        &self,
        vector: &[f32],
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<Neighbors> {
        let (ids, distances) =
            ForestIndex::get_nns_by_vector(self, vector, n, search_k, include_distances)?;
        Ok(Neighbors { ids, distances })
    }

    fn get_item(&self, item: ItemId) -> Result<Vec<f32>> {
        ForestIndex::get_item(self, item)
    }

    fn get_n_items(&self) -> i32 {
        self.n_items() as i32
    }

    fn get_n_trees(&self) -> i32 {
        self.n_trees() as i32
    }

    fn set_seed(&mut self, seed: u64) {
        ForestIndex::set_seed(self, seed)
    }

    fn verbose(&mut self, enabled: bool) {
        ForestIndex::verbose(self, enabled)
    }

    fn dimension(&self) -> usize {
        ForestIndex::dimension(self)
    }

    fn metric(&self) -> MetricKind {
        ForestIndex::metric(self)
    }
}
