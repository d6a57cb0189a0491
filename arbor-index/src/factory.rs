//! # Index Factory
//!
//! Maps a metric name onto the backend that serves it. This is the only
//! place the metric tag is matched.

use tracing::debug;

use arbor_core::{Error, IndexConfig, MetricKind, Result};

use crate::forest::ForestIndex;
use crate::hamming::HammingAdapter;
use crate::metric::{Angular, DotProduct, Euclidean, Manhattan};
use crate::traits::AnnIndex;

/// Create an index for `metric`, or `None` if the name is unknown or `dimension` is zero
pub fn create(dimension: usize, metric: &str) -> Option<Box<dyn AnnIndex>> {
    create_with_config(dimension, metric, &IndexConfig::default())
}

/// Like [`create`], with engine tuning taken from `config`
pub fn create_with_config(
    dimension: usize,
    metric: &str,
    config: &IndexConfig,
) -> Option<Box<dyn AnnIndex>> {
    let kind: MetricKind = metric.parse().ok()?;
    match create_kind(dimension, kind, config) {
        Ok(index) => Some(index),
        Err(err) => {
            debug!(metric, dimension, code = err.error_code(), "Index not created: {}", err);
            None
        }
    }
}

/// Typed constructor reporting why construction failed
pub fn create_kind(
    dimension: usize,
    kind: MetricKind,
    config: &IndexConfig,
) -> Result<Box<dyn AnnIndex>> {
    if dimension == 0 {
        return Err(Error::Configuration {
            message: "dimension must be at least 1".to_string(),
        });
    }
    config.validate()?;

    let config = config.clone();
    let index: Box<dyn AnnIndex> = match kind {
        MetricKind::Angular => Box::new(ForestIndex::<Angular>::new(dimension, config)),
        MetricKind::Euclidean => Box::new(ForestIndex::<Euclidean>::new(dimension, config)),
        MetricKind::Manhattan => Box::new(ForestIndex::<Manhattan>::new(dimension, config)),
        MetricKind::Dot => Box::new(ForestIndex::<DotProduct>::new(dimension, config)),
        MetricKind::Hamming => Box::new(HammingAdapter::new(dimension, config)),
    };
    Ok(index)
}
