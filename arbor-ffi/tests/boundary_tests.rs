//! Foreign-call boundary tests, driving the C ABI the way a C caller would.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use arbor::*;
use tempfile::TempDir;

fn alloc(dim: i32, metric: &str) -> *mut ArborIndex {
    let name = CString::new(metric).unwrap();
    unsafe { arbor_alloc(dim, name.as_ptr()) }
}

fn message(buf: &[c_char]) -> String {
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_str()
        .unwrap()
        .to_string()
}

fn c_path(path: &std::path::Path) -> CString {
    CString::new(path.to_str().unwrap()).unwrap()
}

#[test]
fn test_unknown_metric_yields_null() {
    assert!(alloc(3, "cosine").is_null());
    assert!(alloc(0, "angular").is_null());
    assert!(unsafe { arbor_alloc(3, ptr::null()) }.is_null());
}

#[test]
fn test_null_handle_sentinels() {
    let h = alloc(3, "cosine");
    let mut err = [0 as c_char; 64];
    let v = [0.0f32; 3];
    let mut ids = [0i32; 4];
    let mut out = 0.0f32;
    unsafe {
        assert_eq!(arbor_get_n_items(h), -1);
        assert_eq!(arbor_get_n_trees(h), -1);
        assert_eq!(arbor_get_dimension(h), -1);
        assert_eq!(arbor_add_item(h, 0, v.as_ptr(), err.as_mut_ptr(), err.len()), 0);
        assert_eq!(message(&err), "Configuration error: index must not be null");
        assert_eq!(arbor_build(h, 1, 1, ptr::null_mut(), 0), 0);
        assert_eq!(arbor_unbuild(h, ptr::null_mut(), 0), 0);
        assert_eq!(arbor_get_distance(h, 0, 1, &mut out), 0);
        assert_eq!(arbor_get_item(h, 0, out_ptr(&mut [0.0; 3])), 0);
        assert_eq!(
            arbor_get_nns_by_item(h, 0, 4, -1, ids.as_mut_ptr(), ptr::null_mut()),
            -1
        );
        assert_eq!(
            arbor_get_nns_by_vector(h, v.as_ptr(), 4, -1, ids.as_mut_ptr(), ptr::null_mut()),
            -1
        );
        arbor_unload(h);
        arbor_set_seed(h, 1);
        arbor_verbose(h, true);
        arbor_dealloc(h);
    }
}

fn out_ptr(buf: &mut [f32]) -> *mut f32 {
    buf.as_mut_ptr()
}

#[test]
fn test_hamming_get_item_over_boundary() {
    let h = alloc(5, "hamming");
    assert!(!h.is_null());
    let v = [0.9f32, 0.1, 0.6, 0.4, 1.0];
    let mut out = [7.0f32; 5];
    unsafe {
        assert_eq!(arbor_add_item(h, 0, v.as_ptr(), ptr::null_mut(), 0), 1);
        assert_eq!(arbor_get_item(h, 0, out.as_mut_ptr()), 1);
        assert_eq!(arbor_get_dimension(h), 5);
        arbor_dealloc(h);
    }
    assert_eq!(out, [1.0, 0.0, 1.0, 0.0, 1.0]);
}

#[test]
fn test_lifecycle_errors_fill_buffer() {
    let h = alloc(4, "euclidean");
    let v = [1.0f32, 2.0, 3.0, 4.0];
    let mut err = [0 as c_char; 128];
    unsafe {
        assert_eq!(arbor_add_item(h, 0, v.as_ptr(), err.as_mut_ptr(), err.len()), 1);
        assert_eq!(arbor_build(h, 2, 1, err.as_mut_ptr(), err.len()), 1);
        assert_eq!(arbor_add_item(h, 1, v.as_ptr(), err.as_mut_ptr(), err.len()), 0);
        assert_eq!(message(&err), "You can't add an item to a built index");

        // Truncated to the buffer, still NUL-terminated.
        let mut small = [0x55 as c_char; 10];
        assert_eq!(arbor_build(h, 2, 1, small.as_mut_ptr(), small.len()), 0);
        assert_eq!(message(&small), "You can't");

        assert_eq!(arbor_unbuild(h, ptr::null_mut(), 0), 1);
        assert_eq!(arbor_add_item(h, 1, v.as_ptr(), ptr::null_mut(), 0), 1);
        arbor_dealloc(h);
    }
}

#[test]
fn test_angular_128_over_boundary() {
    let h = alloc(128, "angular");
    unsafe {
        for i in 0..10 {
            let v: Vec<f32> = (0..128).map(|d| ((i * 31 + d) % 17) as f32 - 8.0).collect();
            assert_eq!(arbor_add_item(h, i, v.as_ptr(), ptr::null_mut(), 0), 1);
        }
        assert_eq!(arbor_build(h, 10, 1, ptr::null_mut(), 0), 1);
        assert_eq!(arbor_get_n_items(h), 10);
        assert_eq!(arbor_get_n_trees(h), 10);
        arbor_dealloc(h);
    }
}

#[test]
fn test_nns_written_into_caller_buffers() {
    let h = alloc(2, "euclidean");
    let mut ids = [-1i32; 8];
    let mut distances = [-1.0f32; 8];
    unsafe {
        for i in 0..5 {
            let v = [i as f32, 0.0];
            arbor_add_item(h, i, v.as_ptr(), ptr::null_mut(), 0);
        }
        arbor_set_seed(h, 17);
        assert_eq!(arbor_build(h, 3, 1, ptr::null_mut(), 0), 1);

        let n = arbor_get_nns_by_item(h, 0, 3, -1, ids.as_mut_ptr(), distances.as_mut_ptr());
        assert_eq!(n, 3);
        assert_eq!(&ids[..3], &[0, 1, 2]);
        assert_eq!(&distances[..3], &[0.0, 1.0, 2.0]);
        assert_eq!(ids[3], -1);

        let q = [3.9f32, 0.0];
        let n = arbor_get_nns_by_vector(h, q.as_ptr(), 8, -1, ids.as_mut_ptr(), ptr::null_mut());
        assert_eq!(n, 5);
        assert_eq!(ids[0], 4);

        let mut d = 0.0f32;
        assert_eq!(arbor_get_distance(h, 0, 4, &mut d), 1);
        assert_eq!(d, 4.0);
        assert_eq!(arbor_get_distance(h, 0, 9, &mut d), 0);
        arbor_dealloc(h);
    }
}

#[test]
fn test_save_and_load_over_boundary() {
    let dir = TempDir::new().unwrap();
    let path = c_path(&dir.path().join("index.arb"));
    let mut err = [0 as c_char; 256];
    unsafe {
        let h = alloc(3, "manhattan");
        for i in 0..20 {
            let v = [i as f32, (i % 3) as f32, 1.0];
            arbor_add_item(h, i, v.as_ptr(), ptr::null_mut(), 0);
        }
        assert_eq!(arbor_build(h, 4, -1, ptr::null_mut(), 0), 1);
        assert_eq!(arbor_save(h, path.as_ptr(), false, err.as_mut_ptr(), err.len()), 1);
        arbor_dealloc(h);

        let h = alloc(3, "manhattan");
        assert_eq!(arbor_load(h, path.as_ptr(), true, err.as_mut_ptr(), err.len()), 1);
        assert_eq!(arbor_get_n_items(h), 20);
        assert_eq!(arbor_get_n_trees(h), 4);
        let v = [0.0f32; 3];
        assert_eq!(arbor_add_item(h, 20, v.as_ptr(), err.as_mut_ptr(), err.len()), 0);
        assert_eq!(message(&err), "You can't add an item to a loaded index");

        arbor_unload(h);
        assert_eq!(arbor_get_n_items(h), 0);
        arbor_dealloc(h);

        let missing = c_path(&dir.path().join("missing.arb"));
        let h = alloc(3, "manhattan");
        assert_eq!(arbor_load(h, missing.as_ptr(), false, ptr::null_mut(), 0), 0);
        assert_eq!(arbor_load(h, ptr::null(), false, err.as_mut_ptr(), err.len()), 0);
        assert_eq!(message(&err), "Configuration error: path must not be null");
        arbor_dealloc(h);
    }
}

#[test]
fn test_on_disk_build_over_boundary() {
    let dir = TempDir::new().unwrap();
    let path = c_path(&dir.path().join("ondisk.arb"));
    unsafe {
        let h = alloc(2, "dot");
        assert_eq!(arbor_on_disk_build(h, path.as_ptr(), ptr::null_mut(), 0), 1);
        for i in 0..10 {
            let v = [i as f32, 1.0];
            arbor_add_item(h, i, v.as_ptr(), ptr::null_mut(), 0);
        }
        assert_eq!(arbor_build(h, 2, 1, ptr::null_mut(), 0), 1);
        arbor_dealloc(h);

        let h = alloc(2, "dot");
        assert_eq!(arbor_load(h, path.as_ptr(), false, ptr::null_mut(), 0), 1);
        assert_eq!(arbor_get_n_items(h), 10);
        arbor_dealloc(h);
    }
}
