//! Caller-owned error message buffers.

use std::os::raw::c_char;
use std::ptr;

/// Copy `message` into `buf` as a NUL-terminated string of at most `len` bytes.
///
/// Truncation never splits a UTF-8 sequence. A null `buf` or zero `len` is ignored.
///
/// # Safety
/// When non-null, `buf` must be valid for writes of `len` bytes.
pub(crate) unsafe fn write_message(message: &str, buf: *mut c_char, len: usize) {
    if buf.is_null() || len == 0 {
        return;
    }
    let mut end = message.len().min(len - 1);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    ptr::copy_nonoverlapping(message.as_ptr().cast::<c_char>(), buf, end);
    *buf.add(end) = 0;
}
