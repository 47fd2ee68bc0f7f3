//! Pointer and string handoff helpers shared by the exports.

use std::ffi::{CStr, CString, c_char};

use crate::error::AbiError;

/// Read a NUL-terminated UTF-8 argument.
///
/// # Safety
///
/// `ptr` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn read_c_str(ptr: *const c_char, arg: &'static str) -> Result<String, AbiError> {
    if ptr.is_null() {
        return Err(AbiError::InvalidArgument(arg));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(String::from)
        .map_err(|_| AbiError::InvalidArgument(arg))
}

/// Write `value` through an out-pointer.
///
/// # Safety
///
/// `out` must be null or valid for a write of `T`.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T, arg: &'static str) -> Result<(), AbiError> {
    if out.is_null() {
        return Err(AbiError::InvalidArgument(arg));
    }
    unsafe { out.write(value) };
    Ok(())
}

/// Hand a string to the caller, who releases it with `ez_steam_string_free`.
///
/// # Safety
///
/// `out` must be null or valid for a write of a pointer.
pub(crate) unsafe fn give_string(
    out: *mut *mut c_char,
    value: String,
    arg: &'static str,
) -> Result<(), AbiError> {
    if out.is_null() {
        return Err(AbiError::InvalidArgument(arg));
    }
    let raw = CString::new(value)?.into_raw();
    unsafe { out.write(raw) };
    Ok(())
}

/// Reclaim a string produced by [`give_string`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer from [`give_string`] not yet freed.
pub(crate) unsafe fn take_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}
