//! # Arbor C ABI
//!
//! Opaque-handle interface to the Arbor index for foreign callers.
//!
//! ## Conventions
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  arbor_alloc ──▶ *mut ArborIndex ──▶ arbor_* calls (borrow)  │
//! │                                  └─▶ arbor_dealloc (once)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  status calls      1 = success, 0 = failure                  │
//! │  count calls       value, or -1 on failure                   │
//! │  error, error_len  optional caller buffer for the message    │
//! │  outputs           caller buffers sized by dimension or `n`  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A null handle makes every call a no-op that returns its failure
//! sentinel. Panics never cross the boundary.

mod error_buffer;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::slice;

use tracing::warn;

use arbor_core::{Error, Result};
use arbor_index::AnnIndex;

use crate::error_buffer::write_message;

/// Opaque index handle owned by the caller between `arbor_alloc` and `arbor_dealloc`
pub struct ArborIndex {
    inner: Box<dyn AnnIndex>,
}

const SUCCESS: c_int = 1;
const FAILURE: c_int = 0;

fn null_argument(name: &'static str) -> Error {
    Error::Configuration {
        message: format!("{} must not be null", name),
    }
}

/// Run `f`, logging failures and converting panics into errors
fn guarded<T>(op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        Err(Error::Internal {
            message: "internal panic".to_string(),
        })
    });
    if let Err(err) = &result {
        warn!(op, code = err.error_code(), "{}", err);
    }
    result
}

/// Map a status result onto `1`/`0`, filling the error buffer on failure
unsafe fn status(result: Result<()>, error: *mut c_char, error_len: usize) -> c_int {
    match result {
        Ok(()) => SUCCESS,
        Err(err) => {
            write_message(&err.to_string(), error, error_len);
            FAILURE
        }
    }
}

unsafe fn index_ref<'a>(handle: *const ArborIndex) -> Result<&'a (dyn AnnIndex + 'static)> {
    handle
        .as_ref()
        .map(|h| h.inner.as_ref())
        .ok_or_else(|| null_argument("index"))
}

unsafe fn index_mut<'a>(handle: *mut ArborIndex) -> Result<&'a mut (dyn AnnIndex + 'static)> {
    handle
        .as_mut()
        .map(|h| h.inner.as_mut())
        .ok_or_else(|| null_argument("index"))
}

unsafe fn c_path<'a>(path: *const c_char) -> Result<&'a Path> {
    if path.is_null() {
        return Err(null_argument("path"));
    }
    CStr::from_ptr(path)
        .to_str()
        .map(Path::new)
        .map_err(|_| Error::Configuration {
            message: "path is not valid UTF-8".to_string(),
        })
}

/// Borrow `dimension` floats from `vector`
unsafe fn c_vector<'a>(vector: *const f32, dimension: usize) -> Result<&'a [f32]> {
    if vector.is_null() {
        return Err(null_argument("vector"));
    }
    Ok(slice::from_raw_parts(vector, dimension))
}

/// Copy neighbors into the caller's buffers, returning how many were written
unsafe fn write_neighbors(
    nns: arbor_core::Neighbors,
    out_ids: *mut i32,
    out_distances: *mut f32,
) -> i32 {
    ptr::copy_nonoverlapping(nns.ids.as_ptr(), out_ids, nns.ids.len());
    if !out_distances.is_null() {
        if let Some(distances) = &nns.distances {
            ptr::copy_nonoverlapping(distances.as_ptr(), out_distances, distances.len());
        }
    }
    nns.ids.len() as i32
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create an index of `dim` dimensions for `metric`.
///
/// Returns null for an unknown metric name, `dim < 1`, or a null / non-UTF-8 name.
///
/// # Safety
/// `metric` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn arbor_alloc(dim: i32, metric: *const c_char) -> *mut ArborIndex {
    if metric.is_null() || dim < 1 {
        warn!(dim, "arbor_alloc: invalid arguments");
        return ptr::null_mut();
    }
    let Ok(name) = CStr::from_ptr(metric).to_str() else {
        warn!(dim, "arbor_alloc: metric name is not UTF-8");
        return ptr::null_mut();
    };
    let created = panic::catch_unwind(|| arbor_index::create(dim as usize, name))
        .ok()
        .flatten();
    match created {
        Some(inner) => Box::into_raw(Box::new(ArborIndex { inner })),
        None => {
            warn!(dim, metric = name, code = "UNKNOWN_METRIC", "arbor_alloc: no index created");
            ptr::null_mut()
        }
    }
}

/// Destroy an index created by [`arbor_alloc`].
///
/// # Safety
/// `index` must be null or a handle from `arbor_alloc` not yet deallocated.
#[no_mangle]
pub unsafe extern "C" fn arbor_dealloc(index: *mut ArborIndex) {
    if !index.is_null() {
        drop(Box::from_raw(index));
    }
}

/// # Safety
/// `index` must be null or a live handle; `vector` must hold `dimension` floats;
/// `error` must be null or valid for `error_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn arbor_add_item(
    index: *mut ArborIndex,
    item: i32,
    vector: *const f32,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("add_item", || {
        let index = index_mut(index)?;
        let vector = c_vector(vector, index.dimension())?;
        index.add_item(item, vector)
    });
    status(result, error, error_len)
}

/// Build `n_trees` trees (`-1` chooses) on `n_threads` threads (`-1` for all cores).
///
/// # Safety
/// `index` must be null or a live handle; `error` must be null or valid for `error_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn arbor_build(
    index: *mut ArborIndex,
    n_trees: c_int,
    n_threads: c_int,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("build", || index_mut(index)?.build(n_trees, n_threads));
    status(result, error, error_len)
}

/// # Safety
/// `index` must be null or a live handle; `error` must be null or valid for `error_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn arbor_unbuild(
    index: *mut ArborIndex,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("unbuild", || index_mut(index)?.unbuild());
    status(result, error, error_len)
}

/// Write the index to `path`; the handle then serves it read-only.
///
/// # Safety
/// `index` must be null or a live handle; `path` must be null or a valid NUL-terminated
/// string; `error` must be null or valid for `error_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn arbor_save(
    index: *mut ArborIndex,
    path: *const c_char,
    prefault: bool,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("save", || {
        let index = index_mut(index)?;
        index.save(c_path(path)?, prefault)
    });
    status(result, error, error_len)
}

/// # Safety
/// Same requirements as [`arbor_save`].
#[no_mangle]
pub unsafe extern "C" fn arbor_load(
    index: *mut ArborIndex,
    path: *const c_char,
    prefault: bool,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("load", || {
        let index = index_mut(index)?;
        index.load(c_path(path)?, prefault)
    });
    status(result, error, error_len)
}

/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_unload(index: *mut ArborIndex) {
    if let Some(h) = index.as_mut() {
        h.inner.unload();
    }
}

/// # Safety
/// Same requirements as [`arbor_save`].
#[no_mangle]
pub unsafe extern "C" fn arbor_on_disk_build(
    index: *mut ArborIndex,
    path: *const c_char,
    error: *mut c_char,
    error_len: usize,
) -> c_int {
    let result = guarded("on_disk_build", || {
        let index = index_mut(index)?;
        index.on_disk_build(c_path(path)?)
    });
    status(result, error, error_len)
}

// ============================================================================
// Queries
// ============================================================================

/// Store the distance between items `i` and `j` in `out`.
///
/// # Safety
/// `index` must be null or a live handle; `out` must be null or valid for one write.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_distance(
    index: *const ArborIndex,
    i: i32,
    j: i32,
    out: *mut f32,
) -> c_int {
    let result = guarded("get_distance", || {
        if out.is_null() {
            return Err(null_argument("out"));
        }
        *out = index_ref(index)?.get_distance(i, j)?;
        Ok(())
    });
    status(result, ptr::null_mut(), 0)
}

/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_n_items(index: *const ArborIndex) -> i32 {
    match index.as_ref() {
        Some(h) => h.inner.get_n_items(),
        None => -1,
    }
}

/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_n_trees(index: *const ArborIndex) -> i32 {
    match index.as_ref() {
        Some(h) => h.inner.get_n_trees(),
        None => -1,
    }
}

/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_dimension(index: *const ArborIndex) -> i32 {
    match index.as_ref() {
        Some(h) => h.inner.dimension() as i32,
        None => -1,
    }
}

/// Write the stored vector of `item` into `out_vector` (`dimension` floats).
///
/// # Safety
/// `index` must be null or a live handle; `out_vector` must be null or valid
/// for `dimension` writes.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_item(
    index: *const ArborIndex,
    item: i32,
    out_vector: *mut f32,
) -> c_int {
    let result = guarded("get_item", || {
        if out_vector.is_null() {
            return Err(null_argument("out_vector"));
        }
        let v = index_ref(index)?.get_item(item)?;
        ptr::copy_nonoverlapping(v.as_ptr(), out_vector, v.len());
        Ok(())
    });
    status(result, ptr::null_mut(), 0)
}

/// Up to `n` neighbors of `item`. Returns the number written, or -1.
///
/// # Safety
/// `index` must be null or a live handle; `out_ids` must be valid for `n` writes;
/// `out_distances` must be null or valid for `n` writes.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_nns_by_item(
    index: *const ArborIndex,
    item: i32,
    n: usize,
    search_k: c_int,
    out_ids: *mut i32,
    out_distances: *mut f32,
) -> i32 {
    let result = guarded("get_nns_by_item", || {
        if out_ids.is_null() {
            return Err(null_argument("out_ids"));
        }
        let include = !out_distances.is_null();
        let nns = index_ref(index)?.get_nns_by_item(item, n, search_k, include)?;
        Ok(write_neighbors(nns, out_ids, out_distances))
    });
    result.unwrap_or(-1)
}

/// Up to `n` neighbors of `vector` (`dimension` floats). Returns the number written, or -1.
///
/// # Safety
/// As [`arbor_get_nns_by_item`]; `vector` must hold `dimension` floats.
#[no_mangle]
pub unsafe extern "C" fn arbor_get_nns_by_vector(
    index: *const ArborIndex,
    vector: *const f32,
    n: usize,
    search_k: c_int,
    out_ids: *mut i32,
    out_distances: *mut f32,
) -> i32 {
    let result = guarded("get_nns_by_vector", || {
        if out_ids.is_null() {
            return Err(null_argument("out_ids"));
        }
        let index = index_ref(index)?;
        let vector = c_vector(vector, index.dimension())?;
        let include = !out_distances.is_null();
        let nns = index.get_nns_by_vector(vector, n, search_k, include)?;
        Ok(write_neighbors(nns, out_ids, out_distances))
    });
    result.unwrap_or(-1)
}

// ============================================================================
// Settings
// ============================================================================

/// Seed used by the next `arbor_build`.
///
/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_set_seed(index: *mut ArborIndex, seed: u64) {
    if let Some(h) = index.as_mut() {
        h.inner.set_seed(seed);
    }
}

/// # Safety
/// `index` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn arbor_verbose(index: *mut ArborIndex, enabled: bool) {
    if let Some(h) = index.as_mut() {
        h.inner.verbose(enabled);
    }
}
