//! # Metric Policies
//!
//! A [`Metric`] tells the forest engine everything that depends on the
//! distance function: the stored element type, how to split a set of
//! points, which side of a split a vector falls on, and how to rank
//! branches during search.
//!
//! ```text
//!   Angular / Euclidean / Manhattan / DotProduct   elem = f32, split = hyperplane
//!   Hamming                                        elem = u64, split = single bit
//! ```
//!
//! Float metrics share the two-means hyperplane heuristic; Hamming picks a
//! bit on which the points disagree.

use std::fmt::Debug;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::Rng;

use arbor_core::config::{BuildConfig, HAMMING_BIT_PICKS};
use arbor_core::MetricKind;

use crate::distance::{
    angular_distance_squared, dot_product, hamming_distance, l1_distance, l2_distance_squared,
    norm, normalize,
};

/// Scalar stored in an internal vector
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()>;
    fn read_le<R: Read>(r: &mut R) -> io::Result<Self>;
}

impl Element for f32 {
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self)
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_f32::<LittleEndian>()
    }
}

impl Element for u64 {
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self)
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

/// Distance policy for a forest backend
pub trait Metric: Send + Sync + 'static {
    type Elem: Element;
    /// Native distance type; Hamming counts bits in `u64`.
    type Distance: Copy + PartialOrd + Debug + Send + Sync + 'static;
    type Split: Clone + Debug + Send + Sync;

    const KIND: MetricKind;

    /// Starting priority for tree roots in the search queue
    const PQ_INITIAL: f32;

    /// Raw distance, only used for ordering
    fn distance(a: &[Self::Elem], b: &[Self::Elem]) -> Self::Distance;

    /// Distance as reported to callers
    fn normalized_distance(d: Self::Distance) -> Self::Distance;

    /// Pick a split for `points`, which holds at least two vectors of width `dim`.
    fn create_split(
        points: &[&[Self::Elem]],
        dim: usize,
        config: &BuildConfig,
        rng: &mut StdRng,
    ) -> Self::Split;

    /// Split whose margin carries no information, used when no balanced split exists
    fn degenerate_split(dim: usize) -> Self::Split;

    fn margin(split: &Self::Split, v: &[Self::Elem]) -> f32;

    /// `true` sends `v` to the right child
    fn side(split: &Self::Split, v: &[Self::Elem], rng: &mut StdRng) -> bool;

    /// Priority of `child` (0 = left, 1 = right) given its parent's priority
    fn pq_distance(priority: f32, margin: f32, child: usize) -> f32;

    fn write_split<W: Write>(split: &Self::Split, w: &mut W) -> io::Result<()>;
    fn read_split<R: Read>(r: &mut R, dim: usize) -> io::Result<Self::Split>;
}

// ============================================================================
// Float metrics
// ============================================================================

/// Oriented hyperplane `offset + <normal, v> = 0`
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperplane {
    pub normal: Vec<f32>,
    pub offset: f32,
}

fn hyperplane_margin(split: &Hyperplane, v: &[f32]) -> f32 {
    split.offset + dot_product(&split.normal, v)
}

fn hyperplane_side(split: &Hyperplane, v: &[f32], rng: &mut StdRng) -> bool {
    let m = hyperplane_margin(split, v);
    if m != 0.0 {
        m > 0.0
    } else {
        rng.gen()
    }
}

fn hyperplane_pq_distance(priority: f32, margin: f32, child: usize) -> f32 {
    let margin = if child == 1 { margin } else { -margin };
    priority.min(margin)
}

fn write_hyperplane<W: Write>(split: &Hyperplane, w: &mut W) -> io::Result<()> {
    for &x in &split.normal {
        w.write_f32::<LittleEndian>(x)?;
    }
    w.write_f32::<LittleEndian>(split.offset)
}

fn read_hyperplane<R: Read>(r: &mut R, dim: usize) -> io::Result<Hyperplane> {
    let mut normal = vec![0.0f32; dim];
    r.read_f32_into::<LittleEndian>(&mut normal)?;
    let offset = r.read_f32::<LittleEndian>()?;
    Ok(Hyperplane { normal, offset })
}

fn zero_hyperplane(dim: usize) -> Hyperplane {
    Hyperplane {
        normal: vec![0.0; dim],
        offset: 0.0,
    }
}

/// Two-means clustering seeded from two distinct random points.
///
/// With `cosine` the centroids are maintained on unit directions.
fn two_means(
    points: &[&[f32]],
    dim: usize,
    cosine: bool,
    iterations: usize,
    rng: &mut StdRng,
    dist: fn(&[f32], &[f32]) -> f32,
) -> (Vec<f32>, Vec<f32>) {
    let count = points.len();
    debug_assert!(count >= 2);

    let i = rng.gen_range(0..count);
    let mut j = rng.gen_range(0..count - 1);
    if j >= i {
        j += 1;
    }

    let mut p = points[i].to_vec();
    let mut q = points[j].to_vec();
    if cosine {
        normalize(&mut p);
        normalize(&mut q);
    }

    let mut ic = 1.0f32;
    let mut jc = 1.0f32;
    for _ in 0..iterations {
        let point = points[rng.gen_range(0..count)];
        let di = ic * dist(&p, point);
        let dj = jc * dist(&q, point);
        let nk = if cosine { norm(point) } else { 1.0 };
        if !(nk > 0.0) {
            continue;
        }

        if di < dj {
            for z in 0..dim {
                p[z] = (p[z] * ic + point[z] / nk) / (ic + 1.0);
            }
            ic += 1.0;
        } else if dj < di {
            for z in 0..dim {
                q[z] = (q[z] * jc + point[z] / nk) / (jc + 1.0);
            }
            jc += 1.0;
        }
    }

    (p, q)
}

/// Hyperplane through the origin separating the two angular centroids
fn angular_split(
    points: &[&[f32]],
    dim: usize,
    config: &BuildConfig,
    rng: &mut StdRng,
) -> Hyperplane {
    let (p, q) = two_means(
        points,
        dim,
        true,
        config.two_means_iterations,
        rng,
        angular_distance_squared,
    );
    let mut normal: Vec<f32> = p.iter().zip(q.iter()).map(|(a, b)| a - b).collect();
    normalize(&mut normal);
    Hyperplane { normal, offset: 0.0 }
}

/// Perpendicular bisector of the two centroids
fn bisector_split(
    points: &[&[f32]],
    dim: usize,
    config: &BuildConfig,
    rng: &mut StdRng,
    dist: fn(&[f32], &[f32]) -> f32,
) -> Hyperplane {
    let (p, q) = two_means(points, dim, false, config.two_means_iterations, rng, dist);
    let mut normal: Vec<f32> = p.iter().zip(q.iter()).map(|(a, b)| a - b).collect();
    normalize(&mut normal);
    let offset = -normal
        .iter()
        .zip(p.iter().zip(q.iter()))
        .map(|(n, (a, b))| n * (a + b) / 2.0)
        .sum::<f32>();
    Hyperplane { normal, offset }
}

macro_rules! hyperplane_common {
    () => {
        type Elem = f32;
        type Distance = f32;
        type Split = Hyperplane;

        const PQ_INITIAL: f32 = f32::INFINITY;

        fn degenerate_split(dim: usize) -> Hyperplane {
            zero_hyperplane(dim)
        }

        fn margin(split: &Hyperplane, v: &[f32]) -> f32 {
            hyperplane_margin(split, v)
        }

        fn side(split: &Hyperplane, v: &[f32], rng: &mut StdRng) -> bool {
            hyperplane_side(split, v, rng)
        }

        fn pq_distance(priority: f32, margin: f32, child: usize) -> f32 {
            hyperplane_pq_distance(priority, margin, child)
        }

        fn write_split<W: Write>(split: &Hyperplane, w: &mut W) -> io::Result<()> {
            write_hyperplane(split, w)
        }

        fn read_split<R: Read>(r: &mut R, dim: usize) -> io::Result<Hyperplane> {
            read_hyperplane(r, dim)
        }
    };
}

/// Angular distance `sqrt(2 - 2cos)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Angular;

impl Metric for Angular {
    hyperplane_common!();

    const KIND: MetricKind = MetricKind::Angular;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        angular_distance_squared(a, b)
    }

    fn normalized_distance(d: f32) -> f32 {
        d.max(0.0).sqrt()
    }

    fn create_split(
        points: &[&[f32]],
        dim: usize,
        config: &BuildConfig,
        rng: &mut StdRng,
    ) -> Hyperplane {
        angular_split(points, dim, config, rng)
    }
}

/// Euclidean (L2) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl Metric for Euclidean {
    hyperplane_common!();

    const KIND: MetricKind = MetricKind::Euclidean;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        l2_distance_squared(a, b)
    }

    fn normalized_distance(d: f32) -> f32 {
        d.max(0.0).sqrt()
    }

    fn create_split(
        points: &[&[f32]],
        dim: usize,
        config: &BuildConfig,
        rng: &mut StdRng,
    ) -> Hyperplane {
        bisector_split(points, dim, config, rng, l2_distance_squared)
    }
}

/// Manhattan (L1) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct Manhattan;

impl Metric for Manhattan {
    hyperplane_common!();

    const KIND: MetricKind = MetricKind::Manhattan;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        l1_distance(a, b)
    }

    fn normalized_distance(d: f32) -> f32 {
        d.max(0.0)
    }

    fn create_split(
        points: &[&[f32]],
        dim: usize,
        config: &BuildConfig,
        rng: &mut StdRng,
    ) -> Hyperplane {
        bisector_split(points, dim, config, rng, l1_distance)
    }
}

/// Inner product. Ranks by `-dot` and reports the dot product itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProduct;

impl Metric for DotProduct {
    hyperplane_common!();

    const KIND: MetricKind = MetricKind::Dot;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        -dot_product(a, b)
    }

    fn normalized_distance(d: f32) -> f32 {
        -d
    }

    fn create_split(
        points: &[&[f32]],
        dim: usize,
        config: &BuildConfig,
        rng: &mut StdRng,
    ) -> Hyperplane {
        angular_split(points, dim, config, rng)
    }
}

// ============================================================================
// Hamming
// ============================================================================

/// Split on a single bit of the packed vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSplit {
    pub bit: u32,
}

impl BitSplit {
    #[inline]
    fn is_set(&self, v: &[u64]) -> bool {
        let word = (self.bit / 64) as usize;
        (v[word] >> (self.bit % 64)) & 1 == 1
    }
}

/// Bit-difference count over packed `u64` words
#[derive(Debug, Clone, Copy, Default)]
pub struct Hamming;

impl Hamming {
    fn splits_evenly(split: &BitSplit, points: &[&[u64]]) -> bool {
        let set = points.iter().filter(|p| split.is_set(p)).count();
        set > 0 && set < points.len()
    }
}

impl Metric for Hamming {
    type Elem = u64;
    type Distance = u64;
    type Split = BitSplit;

    const KIND: MetricKind = MetricKind::Hamming;

    // Exact in f32, and far above any tree depth.
    const PQ_INITIAL: f32 = 16_777_216.0;

    fn distance(a: &[u64], b: &[u64]) -> u64 {
        hamming_distance(a, b)
    }

    fn normalized_distance(d: u64) -> u64 {
        d
    }

    fn create_split(
        points: &[&[u64]],
        dim: usize,
        _config: &BuildConfig,
        rng: &mut StdRng,
    ) -> BitSplit {
        let bits = (dim * 64) as u32;
        for _ in 0..HAMMING_BIT_PICKS {
            let split = BitSplit {
                bit: rng.gen_range(0..bits),
            };
            if Self::splits_evenly(&split, points) {
                return split;
            }
        }

        // Random picks failed; scan for any bit that separates the points.
        (0..bits)
            .map(|bit| BitSplit { bit })
            .find(|split| Self::splits_evenly(split, points))
            .unwrap_or(BitSplit { bit: 0 })
    }

    fn degenerate_split(_dim: usize) -> BitSplit {
        BitSplit { bit: 0 }
    }

    fn margin(split: &BitSplit, v: &[u64]) -> f32 {
        if split.is_set(v) {
            1.0
        } else {
            0.0
        }
    }

    fn side(split: &BitSplit, v: &[u64], _rng: &mut StdRng) -> bool {
        split.is_set(v)
    }

    fn pq_distance(priority: f32, margin: f32, child: usize) -> f32 {
        let goes_right = margin != 0.0;
        if goes_right == (child == 1) {
            priority
        } else {
            priority - 1.0
        }
    }

    fn write_split<W: Write>(split: &BitSplit, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(split.bit)
    }

    fn read_split<R: Read>(r: &mut R, dim: usize) -> io::Result<BitSplit> {
        let bit = r.read_u32::<LittleEndian>()?;
        if bit as usize >= dim * 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("split bit {} outside {} words", bit, dim),
            ));
        }
        Ok(BitSplit { bit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_euclidean_split_separates_clusters() {
        let a = [0.0f32, 0.0];
        let b = [0.1f32, 0.0];
        let c = [10.0f32, 10.0];
        let d = [10.1f32, 10.0];
        let points: Vec<&[f32]> = vec![&a, &b, &c, &d];
        let split = Euclidean::create_split(&points, 2, &BuildConfig::default(), &mut rng());

        let m_a = Euclidean::margin(&split, &a);
        let m_c = Euclidean::margin(&split, &c);
        assert!(m_a * m_c < 0.0, "clusters on the same side: {m_a} {m_c}");
        assert_eq!(m_a.signum(), Euclidean::margin(&split, &b).signum());
        assert_eq!(m_c.signum(), Euclidean::margin(&split, &d).signum());
    }

    #[test]
    fn test_angular_split_passes_through_origin() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let points: Vec<&[f32]> = vec![&a, &b];
        let split = Angular::create_split(&points, 2, &BuildConfig::default(), &mut rng());
        assert_eq!(split.offset, 0.0);
        assert!((norm(&split.normal) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hamming_split_finds_differing_bit() {
        // Only bit 70 differs.
        let a = [0u64, 0];
        let b = [0u64, 1 << 6];
        let points: Vec<&[u64]> = vec![&a, &b];
        let split = Hamming::create_split(&points, 2, &BuildConfig::default(), &mut rng());
        assert_eq!(split.bit, 70);
        assert!(!Hamming::side(&split, &a, &mut rng()));
        assert!(Hamming::side(&split, &b, &mut rng()));
    }

    #[test]
    fn test_hyperplane_pq_distance_takes_min() {
        assert_eq!(Euclidean::pq_distance(f32::INFINITY, 0.5, 1), 0.5);
        assert_eq!(Euclidean::pq_distance(f32::INFINITY, 0.5, 0), -0.5);
        assert_eq!(Euclidean::pq_distance(0.2, 0.5, 1), 0.2);
    }

    #[test]
    fn test_hamming_pq_distance_penalises_wrong_branch() {
        let p = Hamming::PQ_INITIAL;
        assert_eq!(Hamming::pq_distance(p, 1.0, 1), p);
        assert_eq!(Hamming::pq_distance(p, 1.0, 0), p - 1.0);
        assert_eq!(Hamming::pq_distance(p, 0.0, 0), p);
    }

    #[test]
    fn test_normalized_distances() {
        assert_eq!(Euclidean::normalized_distance(25.0), 5.0);
        assert_eq!(Angular::normalized_distance(-1e-7), 0.0);
        assert_eq!(DotProduct::normalized_distance(-32.0), 32.0);
        assert_eq!(Hamming::normalized_distance(3), 3);
    }

    #[test]
    fn test_split_codec() {
        let split = Hyperplane {
            normal: vec![0.6, -0.8],
            offset: 1.5,
        };
        let mut buf = Vec::new();
        Euclidean::write_split(&split, &mut buf).unwrap();
        let decoded = Euclidean::read_split(&mut buf.as_slice(), 2).unwrap();
        assert_eq!(decoded, split);
    }

    #[test]
    fn test_hamming_split_bit_must_fit_dimension() {
        let mut buf = Vec::new();
        Hamming::write_split(&BitSplit { bit: 127 }, &mut buf).unwrap();
        assert_eq!(Hamming::read_split(&mut buf.as_slice(), 2).unwrap().bit, 127);

        let err = Hamming::read_split(&mut buf.as_slice(), 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
