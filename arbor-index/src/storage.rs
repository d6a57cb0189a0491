//! # Index Persistence
//!
//! Forests are written with little-endian framing to a temp file that is
//! renamed into place, so readers never observe a half-written index.
//! Loading maps the file with `memmap2`; `prefault` asks the kernel to
//! populate every page up front.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  magic: [u8; 8] = "ARBORIDX"                                │
//! │  version: u32                                               │
//! │  metric: u8                                                 │
//! │  dimension: u32   (internal elements per vector)            │
//! │  n_items: u64     n_nodes: u64     n_roots: u64             │
//! │  vectors: [elem; n_items * dimension]                       │
//! │  nodes:   tag u8 = 0 → count u32, [i32; count]              │
//! │           tag u8 = 1 → left u32, right u32, split           │
//! │           (children always precede their parent)            │
//! │  roots:   [u32; n_roots]                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::MmapOptions;
use tracing::debug;

use arbor_core::{Error, ItemId, MetricKind, Result};

use crate::forest::{ForestIndex, Node};
use crate::metric::{Element, Metric};

const INDEX_MAGIC: &[u8; 8] = b"ARBORIDX";
const INDEX_VERSION: u32 = 1;
const HEADER_SIZE: usize = 8 + 4 + 1 + 4 + 8 * 3;

const TAG_LEAF: u8 = 0;
const TAG_SPLIT: u8 = 1;

/// Decoded forest contents
pub(crate) struct LoadedForest<M: Metric> {
    pub vectors: Vec<M::Elem>,
    pub nodes: Vec<Node<M::Split>>,
    pub roots: Vec<u32>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `index` to `path` atomically
pub(crate) fn write_index<M: Metric>(index: &ForestIndex<M>, path: &Path) -> Result<()> {
    let tmp_path = temp_path(path);
    let file = File::create(&tmp_path)
        .map_err(|e| Error::io(format!("Unable to open {}", tmp_path.display()), e))?;
    let mut w = BufWriter::new(file);

    encode(index, &mut w).map_err(|e| Error::io(format!("Unable to write {}", path.display()), e))?;
    let file = w
        .into_inner()
        .map_err(|e| Error::io(format!("Unable to flush {}", path.display()), e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::io(format!("Unable to rename into {}", path.display()), e))?;

    debug!(
        path = %path.display(),
        n_items = index.n_items(),
        n_nodes = index.nodes().len(),
        "Index written"
    );
    Ok(())
}

fn encode<M: Metric, W: Write>(index: &ForestIndex<M>, w: &mut W) -> io::Result<()> {
    w.write_all(INDEX_MAGIC)?;
    w.write_u32::<LittleEndian>(INDEX_VERSION)?;
    w.write_u8(M::KIND.as_byte())?;
    w.write_u32::<LittleEndian>(index.dimension() as u32)?;
    w.write_u64::<LittleEndian>(index.n_items() as u64)?;
    w.write_u64::<LittleEndian>(index.nodes().len() as u64)?;
    w.write_u64::<LittleEndian>(index.roots().len() as u64)?;

    for &x in index.vectors() {
        x.write_le(w)?;
    }

    for node in index.nodes() {
        match node {
            Node::Leaf(items) => {
                w.write_u8(TAG_LEAF)?;
                w.write_u32::<LittleEndian>(items.len() as u32)?;
                for &item in items {
                    w.write_i32::<LittleEndian>(item)?;
                }
            }
            Node::Split { split, children } => {
                w.write_u8(TAG_SPLIT)?;
                w.write_u32::<LittleEndian>(children[0])?;
                w.write_u32::<LittleEndian>(children[1])?;
                M::write_split(split, w)?;
            }
        }
    }

    for &root in index.roots() {
        w.write_u32::<LittleEndian>(root)?;
    }
    Ok(())
}

/// Read the forest stored at `path`, checking it matches metric `M` and `dimension`
pub(crate) fn read_index<M: Metric>(
    path: &Path,
    dimension: usize,
    prefault: bool,
) -> Result<LoadedForest<M>> {
    let file = File::open(path)
        .map_err(|e| Error::io(format!("Unable to open {}", path.display()), e))?;
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Err(Error::IndexCorruption {
            details: format!("{} is too small to be an index ({} bytes)", path.display(), len),
        });
    }

    let mut options = MmapOptions::new();
    if prefault {
        options.populate();
    }
    // SAFETY: the file is opened read-only and exclusive access is assumed for the call.
    let mmap = unsafe { options.map(&file) }
        .map_err(|e| Error::io(format!("Unable to map {}", path.display()), e))?;

    decode::<M>(&mmap[..], dimension).map_err(|e| match e {
        DecodeError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::IndexCorruption {
                details: format!("{}: truncated index ({})", path.display(), e),
            }
        }
        DecodeError::Io(e) => Error::IndexCorruption {
            details: format!("{}: {}", path.display(), e),
        },
        DecodeError::Index(e) => e,
    })
}

enum DecodeError {
    Io(io::Error),
    Index(Error),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::Io(err)
    }
}

fn corrupt(details: impl Into<String>) -> DecodeError {
    DecodeError::Index(Error::IndexCorruption {
        details: details.into(),
    })
}

fn decode<M: Metric>(
    mut r: &[u8],
    dimension: usize,
) -> std::result::Result<LoadedForest<M>, DecodeError> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(corrupt("Invalid index magic"));
    }

    let version = r.read_u32::<LittleEndian>()?;
    if version != INDEX_VERSION {
        return Err(corrupt(format!("Unsupported index version: {}", version)));
    }

    let metric_byte = r.read_u8()?;
    match MetricKind::from_byte(metric_byte) {
        Some(kind) if kind == M::KIND => {}
        Some(kind) => {
            return Err(corrupt(format!(
                "Index was built with metric {}, expected {}",
                kind,
                M::KIND
            )))
        }
        None => return Err(corrupt(format!("Invalid metric tag: {}", metric_byte))),
    }

    let stored_dimension = r.read_u32::<LittleEndian>()? as usize;
    if stored_dimension != dimension {
        return Err(DecodeError::Index(Error::DimensionMismatch {
            expected: dimension,
            actual: stored_dimension,
        }));
    }

    let n_items = r.read_u64::<LittleEndian>()? as usize;
    let n_nodes = r.read_u64::<LittleEndian>()? as usize;
    let n_roots = r.read_u64::<LittleEndian>()? as usize;

    // Reject counts the remaining bytes cannot possibly hold before allocating.
    let vector_bytes = n_items
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(std::mem::size_of::<M::Elem>()))
        .ok_or_else(|| corrupt("Item count overflows"))?;
    if vector_bytes > r.len() || n_nodes > r.len() || n_roots > r.len() {
        return Err(corrupt("Header counts exceed file size"));
    }

    let mut vectors = Vec::with_capacity(n_items * dimension);
    for _ in 0..n_items * dimension {
        vectors.push(M::Elem::read_le(&mut r)?);
    }

    let mut nodes = Vec::with_capacity(n_nodes);
    for _ in 0..n_nodes {
        let node = match r.read_u8()? {
            TAG_LEAF => {
                let count = r.read_u32::<LittleEndian>()? as usize;
                if count > r.len() {
                    return Err(corrupt("Leaf size exceeds file size"));
                }
                let mut items: Vec<ItemId> = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = r.read_i32::<LittleEndian>()?;
                    if item < 0 || item as usize >= n_items {
                        return Err(corrupt(format!("Leaf references unknown item {}", item)));
                    }
                    items.push(item);
                }
                Node::Leaf(items)
            }
            TAG_SPLIT => {
                let left = r.read_u32::<LittleEndian>()?;
                let right = r.read_u32::<LittleEndian>()?;
                // Children precede their parent, which rules out cycles.
                let this = nodes.len();
                if left as usize >= this || right as usize >= this {
                    return Err(corrupt(format!("Split {} references a later node", this)));
                }
                let split = M::read_split(&mut r, dimension)?;
                Node::Split {
                    split,
                    children: [left, right],
                }
            }
            tag => return Err(corrupt(format!("Invalid node tag: {}", tag))),
        };
        nodes.push(node);
    }

    let mut roots = Vec::with_capacity(n_roots);
    for _ in 0..n_roots {
        let root = r.read_u32::<LittleEndian>()?;
        if root as usize >= n_nodes {
            return Err(corrupt("Root references unknown node"));
        }
        roots.push(root);
    }

    Ok(LoadedForest {
        vectors,
        nodes,
        roots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Angular, BitSplit, Euclidean, Hamming};
    use arbor_core::IndexConfig;
    use tempfile::TempDir;

    fn built_index() -> ForestIndex<Euclidean> {
        let mut index = ForestIndex::<Euclidean>::new(3, IndexConfig::default());
        for i in 0..30 {
            let x = i as f32;
            index.add_item(i, &[x, x * 0.5, -x]).unwrap();
        }
        index.build(3, 1).unwrap();
        index
    }

    #[test]
    fn test_write_then_read_preserves_forest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.arb");
        let index = built_index();
        write_index(&index, &path).unwrap();

        let loaded = read_index::<Euclidean>(&path, 3, false).unwrap();
        assert_eq!(loaded.vectors, index.vectors());
        assert_eq!(loaded.roots, index.roots());
        assert_eq!(loaded.nodes.len(), index.nodes().len());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_metric_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.arb");
        write_index(&built_index(), &path).unwrap();

        let err = read_index::<Angular>(&path, 3, true).err().unwrap();
        assert_eq!(err.error_code(), "INDEX_CORRUPTION");
    }

    #[test]
    fn test_dimension_mismatch_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.arb");
        write_index(&built_index(), &path).unwrap();

        let err = read_index::<Euclidean>(&path, 4, false).err().unwrap();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.arb");
        write_index(&built_index(), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let err = read_index::<Euclidean>(&path, 3, false).err().unwrap();
        assert_eq!(err.error_code(), "INDEX_CORRUPTION");
    }

    /// Header of a one-item, single-root file with `n_nodes` nodes
    fn header(metric: MetricKind, dimension: u32, n_nodes: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.write_u32::<LittleEndian>(INDEX_VERSION).unwrap();
        buf.write_u8(metric.as_byte()).unwrap();
        buf.write_u32::<LittleEndian>(dimension).unwrap();
        buf.write_u64::<LittleEndian>(1).unwrap();
        buf.write_u64::<LittleEndian>(n_nodes).unwrap();
        buf.write_u64::<LittleEndian>(1).unwrap();
        buf
    }

    #[test]
    fn test_self_referencing_split_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cyclic.arb");
        let mut buf = header(MetricKind::Euclidean, 1, 1);
        buf.write_f32::<LittleEndian>(1.0).unwrap();
        buf.write_u8(TAG_SPLIT).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_f32::<LittleEndian>(1.0).unwrap();
        buf.write_f32::<LittleEndian>(0.0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        fs::write(&path, &buf).unwrap();

        let err = read_index::<Euclidean>(&path, 1, false).err().unwrap();
        assert_eq!(err.error_code(), "INDEX_CORRUPTION");
    }

    #[test]
    fn test_forward_child_reference_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.arb");
        let mut buf = header(MetricKind::Hamming, 1, 2);
        buf.write_u64::<LittleEndian>(0b1).unwrap();
        buf.write_u8(TAG_SPLIT).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u8(TAG_LEAF).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_i32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        fs::write(&path, &buf).unwrap();

        let err = read_index::<Hamming>(&path, 1, false).err().unwrap();
        assert_eq!(err.error_code(), "INDEX_CORRUPTION");
    }

    #[test]
    fn test_out_of_range_split_bit_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bits.arb");
        let mut buf = header(MetricKind::Hamming, 1, 3);
        buf.write_u64::<LittleEndian>(0b1).unwrap();
        for _ in 0..2 {
            buf.write_u8(TAG_LEAF).unwrap();
            buf.write_u32::<LittleEndian>(1).unwrap();
            buf.write_i32::<LittleEndian>(0).unwrap();
        }
        buf.write_u8(TAG_SPLIT).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        Hamming::write_split(&BitSplit { bit: 9999 }, &mut buf).unwrap();
        buf.write_u32::<LittleEndian>(2).unwrap();
        fs::write(&path, &buf).unwrap();

        let err = read_index::<Hamming>(&path, 1, false).err().unwrap();
        assert_eq!(err.error_code(), "INDEX_CORRUPTION");

        // The same layout with an in-range bit loads.
        let at = buf.len() - 8;
        buf[at..at + 4].copy_from_slice(&63u32.to_le_bytes());
        fs::write(&path, &buf).unwrap();
        let loaded = read_index::<Hamming>(&path, 1, false).unwrap();
        assert_eq!(loaded.roots, vec![2]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_index::<Euclidean>(&dir.path().join("nope.arb"), 3, false)
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
