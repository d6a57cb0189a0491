//! # Random Projection Forest
//!
//! The engine behind every backend: a forest of binary trees whose inner
//! nodes split space according to the metric policy `M` and whose leaves
//! hold item ids.
//!
//! ## Lifecycle
//!
//! ```text
//!            add_item            build
//!   ┌──────────────────┐    ┌───────────────┐
//!   │      Mutable     │───▶│     Built     │──save──▶ Loaded (read-only)
//!   └──────────────────┘◀───└───────────────┘             │
//!            ▲        unbuild                             │
//!            └──────────────────── unload ◀───────────────┘
//! ```
//!
//! ## Build
//! Each tree is grown independently from its own seeded RNG, so a forest
//! built on 1 thread and on 16 threads is identical for a given seed. The
//! automatic tree count grows in fixed rounds of `AUTO_TREE_BATCH` trees.
//!
//! ## Search
//! Best-first descent over all trees with a shared priority queue until
//! `search_k` candidates are collected, then exact re-ranking.

use std::collections::BinaryHeap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use arbor_core::config::{AUTO_TREE_BATCH, MIN_SPLIT_FRACTION};
use arbor_core::{Error, IndexConfig, ItemId, MetricKind, Result};

use crate::metric::Metric;
use crate::storage;

/// Neighbor ids plus, when requested, their native distances
pub type NnsResult<D> = (Vec<ItemId>, Option<Vec<D>>);

/// A tree node; children are indices into the forest's node arena
#[derive(Debug, Clone)]
pub(crate) enum Node<S> {
    Leaf(Vec<ItemId>),
    Split { split: S, children: [u32; 2] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Mutable,
    Built,
    Loaded,
}

/// Forest index over internal vectors of `M::Elem`
pub struct ForestIndex<M: Metric> {
    config: IndexConfig,
    /// Internal vector width
    dimension: usize,
    /// Contiguous vector storage, dense by item id: [v0_d0, .., v0_dn, v1_d0, ..]
    vectors: Vec<M::Elem>,
    nodes: Vec<Node<M::Split>>,
    roots: Vec<u32>,
    state: State,
    seed: u64,
    verbose: bool,
    on_disk: Option<PathBuf>,
    _metric: PhantomData<M>,
}

impl<M: Metric> fmt::Debug for ForestIndex<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForestIndex")
            .field("metric", &M::KIND)
            .field("dimension", &self.dimension)
            .field("n_items", &self.n_items())
            .field("n_trees", &self.roots.len())
            .field("state", &self.state)
            .finish()
    }
}

impl<M: Metric> ForestIndex<M> {
    /// Create an empty, mutable index whose vectors have `dimension` elements
    pub fn new(dimension: usize, config: IndexConfig) -> Self {
        let seed = config.build.default_seed;
        Self {
            config,
            dimension,
            vectors: Vec::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
            state: State::Mutable,
            seed,
            verbose: false,
            on_disk: None,
            _metric: PhantomData,
        }
    }

    pub fn metric(&self) -> MetricKind {
        M::KIND
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// One past the largest id ever added
    pub fn n_items(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == State::Loaded
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn verbose(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    /// Maximum number of ids held by a leaf
    fn leaf_size(&self) -> usize {
        let derived = self.dimension * std::mem::size_of::<M::Elem>()
            / std::mem::size_of::<ItemId>()
            + 2;
        self.config.build.leaf_size.unwrap_or(derived).max(1)
    }

    #[inline]
    fn vector(&self, item: ItemId) -> &[M::Elem] {
        let start = item as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn check_item(&self, item: ItemId) -> Result<()> {
        if item < 0 || item as usize >= self.n_items() {
            return Err(Error::InvalidItem { item });
        }
        Ok(())
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    fn progress(&self, args: fmt::Arguments<'_>) {
        if self.verbose {
            info!(metric = %M::KIND, "{}", args);
        } else {
            debug!(metric = %M::KIND, "{}", args);
        }
    }

    /// Register or overwrite the vector for `item`
    pub fn add_item(&mut self, item: ItemId, vector: &[M::Elem]) -> Result<()> {
        match self.state {
            State::Loaded => {
                return Err(Error::invalid_state("You can't add an item to a loaded index"))
            }
            State::Built => {
                return Err(Error::invalid_state("You can't add an item to a built index"))
            }
            State::Mutable => {}
        }
        self.check_dimension(vector.len())?;
        if item < 0 {
            return Err(Error::InvalidItem { item });
        }

        let start = item as usize * self.dimension;
        let end = start + self.dimension;
        if self.vectors.len() < end {
            self.vectors.resize(end, M::Elem::default());
        }
        self.vectors[start..end].copy_from_slice(vector);
        Ok(())
    }

    /// Grow the forest.
    ///
    /// `n_trees < 0` keeps adding trees until the forest holds at least as
    /// many nodes as there are items. `n_threads <= 0` uses every core.
    pub fn build(&mut self, n_trees: i32, n_threads: i32) -> Result<()> {
        match self.state {
            State::Loaded => return Err(Error::invalid_state("You can't build a loaded index")),
            State::Built => return Err(Error::invalid_state("You can't build a built index")),
            State::Mutable => {}
        }

        let threads = if n_threads <= 0 {
            rayon::current_num_threads()
        } else {
            n_threads as usize
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to start build threads: {}", e),
            })?;

        let started = std::time::Instant::now();
        let n_items = self.n_items();
        let mut trees: Vec<Vec<Node<M::Split>>> = Vec::new();

        if n_trees >= 0 {
            let this = &*self;
            trees = pool.install(|| {
                (0..n_trees as u64)
                    .into_par_iter()
                    .map(|t| this.build_tree(t))
                    .collect()
            });
        } else {
            let mut node_count = 0usize;
            while trees.is_empty() || node_count < n_items {
                let first = trees.len() as u64;
                let this = &*self;
                let batch: Vec<Vec<Node<M::Split>>> = pool.install(|| {
                    (first..first + AUTO_TREE_BATCH as u64)
                        .into_par_iter()
                        .map(|t| this.build_tree(t))
                        .collect()
                });
                node_count += batch.iter().map(Vec::len).sum::<usize>();
                trees.extend(batch);
                self.progress(format_args!("{} trees, {} nodes", trees.len(), node_count));
            }
        }

        // Merge per-tree arenas, rebasing child indices.
        for tree in trees {
            let base = self.nodes.len() as u32;
            let root = base + tree.len() as u32 - 1;
            self.nodes.extend(tree.into_iter().map(|node| match node {
                Node::Split { split, children } => Node::Split {
                    split,
                    children: [children[0] + base, children[1] + base],
                },
                leaf => leaf,
            }));
            self.roots.push(root);
            self.progress(format_args!("pass {}", self.roots.len()));
        }

        self.state = State::Built;
        info!(
            metric = %M::KIND,
            n_items,
            n_trees = self.roots.len(),
            n_nodes = self.nodes.len(),
            threads,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index built"
        );

        if let Some(path) = self.on_disk.clone() {
            if let Err(err) = storage::write_index(self, &path) {
                self.nodes.clear();
                self.roots.clear();
                self.state = State::Mutable;
                return Err(err);
            }
            info!(path = %path.display(), "Index written to on-disk target");
        }
        Ok(())
    }

    /// Grow one tree over every item; the root is the last node of the returned arena
    fn build_tree(&self, tree_no: u64) -> Vec<Node<M::Split>> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(tree_no));
        let mut nodes = Vec::new();
        let indices: Vec<ItemId> = (0..self.n_items() as ItemId).collect();
        self.make_tree(indices, &mut nodes, &mut rng);
        nodes
    }

    fn make_tree(
        &self,
        indices: Vec<ItemId>,
        nodes: &mut Vec<Node<M::Split>>,
        rng: &mut StdRng,
    ) -> u32 {
        if indices.len() <= self.leaf_size() {
            nodes.push(Node::Leaf(indices));
            return nodes.len() as u32 - 1;
        }

        let points: Vec<&[M::Elem]> = indices.iter().map(|&i| self.vector(i)).collect();
        let attempts = self.config.build.split_attempts.max(1);
        let mut split = M::degenerate_split(self.dimension);
        let mut sides: [Vec<ItemId>; 2] = [Vec::new(), Vec::new()];

        for _ in 0..attempts {
            split = M::create_split(&points, self.dimension, &self.config.build, rng);
            sides[0].clear();
            sides[1].clear();
            for (&item, point) in indices.iter().zip(points.iter()) {
                let right = M::side(&split, point, rng);
                sides[right as usize].push(item);
            }
            if imbalance(&sides) <= 1.0 - MIN_SPLIT_FRACTION {
                break;
            }
        }

        // No usable hyperplane: fall back to a coin flip per item.
        while imbalance(&sides) > 0.99 {
            split = M::degenerate_split(self.dimension);
            sides[0].clear();
            sides[1].clear();
            for &item in &indices {
                sides[rng.gen::<bool>() as usize].push(item);
            }
        }

        let [left_items, right_items] = sides;
        let left = self.make_tree(left_items, nodes, rng);
        let right = self.make_tree(right_items, nodes, rng);
        nodes.push(Node::Split {
            split,
            children: [left, right],
        });
        nodes.len() as u32 - 1
    }

    /// Drop every tree and return to the mutable state
    pub fn unbuild(&mut self) -> Result<()> {
        if self.state == State::Loaded {
            return Err(Error::invalid_state("You can't unbuild a loaded index"));
        }
        self.nodes.clear();
        self.roots.clear();
        self.state = State::Mutable;
        Ok(())
    }

    /// Persist the forest, then reopen it read-only from `path`
    pub fn save(&mut self, path: &Path, prefault: bool) -> Result<()> {
        if self.state == State::Mutable {
            return Err(Error::invalid_state(
                "You can't save an index that hasn't been built",
            ));
        }
        if self.on_disk.as_deref() == Some(path) {
            return Ok(());
        }
        storage::write_index(self, path)?;
        self.load(path, prefault)
    }

    /// Replace the contents with the index stored at `path`, read-only
    pub fn load(&mut self, path: &Path, prefault: bool) -> Result<()> {
        let loaded = storage::read_index::<M>(path, self.dimension, prefault)?;
        self.vectors = loaded.vectors;
        self.nodes = loaded.nodes;
        self.roots = loaded.roots;
        self.state = State::Loaded;
        self.on_disk = None;
        info!(
            path = %path.display(),
            metric = %M::KIND,
            n_items = self.n_items(),
            n_trees = self.roots.len(),
            prefault,
            "Index loaded"
        );
        Ok(())
    }

    /// Release everything and return to an empty mutable index
    pub fn unload(&mut self) {
        self.vectors = Vec::new();
        self.nodes = Vec::new();
        self.roots = Vec::new();
        self.state = State::Mutable;
        self.on_disk = None;
        debug!(metric = %M::KIND, "Index unloaded");
    }

    /// Build straight into `path`: the file is created now and written when `build` finishes
    pub fn on_disk_build(&mut self, path: &Path) -> Result<()> {
        if self.state != State::Mutable {
            return Err(Error::invalid_state(
                "You can't build on disk into a built or loaded index",
            ));
        }
        std::fs::File::create(path)
            .map_err(|e| Error::io(format!("Unable to open {}", path.display()), e))?;
        self.on_disk = Some(path.to_path_buf());
        Ok(())
    }

    /// Metric distance between two stored items
    pub fn get_distance(&self, i: ItemId, j: ItemId) -> Result<M::Distance> {
        self.check_item(i)?;
        self.check_item(j)?;
        Ok(M::normalized_distance(M::distance(
            self.vector(i),
            self.vector(j),
        )))
    }

    pub fn get_item(&self, item: ItemId) -> Result<Vec<M::Elem>> {
        self.check_item(item)?;
        Ok(self.vector(item).to_vec())
    }

    pub fn get_nns_by_item(
        &self,
        item: ItemId,
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<NnsResult<M::Distance>> {
        self.check_item(item)?;
        self.search(self.vector(item), n, search_k, include_distances)
    }

    pub fn get_nns_by_vector(
        &self,
        vector: &[M::Elem],
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<NnsResult<M::Distance>> {
        self.check_dimension(vector.len())?;
        self.search(vector, n, search_k, include_distances)
    }

    fn search(
        &self,
        query: &[M::Elem],
        n: usize,
        search_k: i32,
        include_distances: bool,
    ) -> Result<NnsResult<M::Distance>> {
        if self.state == State::Mutable {
            return Err(Error::invalid_state(
                "You can't query an index that hasn't been built",
            ));
        }

        let search_k = if search_k <= 0 {
            n * self.roots.len() * self.config.search.search_k_factor
        } else {
            search_k as usize
        };

        let mut queue: BinaryHeap<(OrderedFloat, u32)> = self
            .roots
            .iter()
            .map(|&root| (OrderedFloat(M::PQ_INITIAL), root))
            .collect();

        let mut candidates: Vec<ItemId> = Vec::new();
        while candidates.len() < search_k {
            let Some((OrderedFloat(priority), idx)) = queue.pop() else {
                break;
            };
            match &self.nodes[idx as usize] {
                Node::Leaf(items) => candidates.extend_from_slice(items),
                Node::Split { split, children } => {
                    let margin = M::margin(split, query);
                    queue.push((
                        OrderedFloat(M::pq_distance(priority, margin, 1)),
                        children[1],
                    ));
                    queue.push((
                        OrderedFloat(M::pq_distance(priority, margin, 0)),
                        children[0],
                    ));
                }
            }
        }

        candidates.sort_unstable();
        candidates.dedup();

        let mut scored: Vec<(M::Distance, ItemId)> = candidates
            .into_iter()
            .map(|item| (M::distance(query, self.vector(item)), item))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(n);

        let ids = scored.iter().map(|&(_, item)| item).collect();
        let distances = include_distances.then(|| {
            scored
                .iter()
                .map(|&(d, _)| M::normalized_distance(d))
                .collect()
        });
        Ok((ids, distances))
    }

    pub(crate) fn vectors(&self) -> &[M::Elem] {
        &self.vectors
    }

    pub(crate) fn nodes(&self) -> &[Node<M::Split>] {
        &self.nodes
    }

    pub(crate) fn roots(&self) -> &[u32] {
        &self.roots
    }
}

/// Share of items on the larger side of a split
fn imbalance(sides: &[Vec<ItemId>; 2]) -> f64 {
    let (l, r) = (sides[0].len() as f64, sides[1].len() as f64);
    if l + r == 0.0 {
        return 0.0;
    }
    l.max(r) / (l + r)
}

/// Wrapper for f32 to implement Ord (for BinaryHeap)
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}
