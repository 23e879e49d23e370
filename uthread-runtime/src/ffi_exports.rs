//! # FFI Exports
//!
//! C-compatible exports of the semaphore and TPS API, backed by
//! [`runtime::global`]. Build as a `staticlib` or `cdylib` and link user
//! programs with `-luthread_runtime`.
//!
//! Every function returns `0` on success and `-1` on any error. The
//! specific [`Error`] is logged at `Debug` level.
//!
//! Semaphores are handed to C as opaque pointers that stay valid until a
//! successful `sem_destroy`.

use std::ffi::{c_char, c_int};
use std::slice;

use crate::error::{Error, Result};
use crate::log::{LogBuilder, LogLevel};
use crate::runtime;
use crate::sem::SemId;
use crate::thread::ThreadId;
use crate::tps::TPS_SIZE;

/// Opaque semaphore handle as seen from C.
#[allow(non_camel_case_types)]
pub type sem_t = *mut SemId;

fn status(op: &'static str, result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => {
            let record = LogBuilder::new(LogLevel::Debug);
            if record.enabled() {
                record
                    .target("ffi")
                    .message("call failed")
                    .field_str("op", op)
                    .field_str("error", err.to_string())
                    .field_int("code", err.code() as i64)
                    .emit();
            }
            -1
        }
    }
}

unsafe fn sem_ref<'a>(sem: sem_t) -> Result<&'a SemId> {
    sem.as_ref().ok_or(Error::InvalidArgument("null semaphore"))
}

// ============================================================================
// Semaphores
// ============================================================================

/// Create a semaphore holding `count` resources.
#[no_mangle]
pub extern "C" fn sem_create(count: usize) -> sem_t {
    Box::into_raw(Box::new(runtime::global().sem_create(count)))
}

/// Destroy a semaphore. Fails while threads are blocked on it.
///
/// # Safety
/// `sem` must be null or a handle returned by `sem_create` that has not been
/// destroyed.
#[no_mangle]
pub unsafe extern "C" fn sem_destroy(sem: sem_t) -> c_int {
    let result = sem_ref(sem).and_then(|id| runtime::global().sem_destroy(*id));
    if result.is_ok() {
        drop(Box::from_raw(sem));
    }
    status("sem_destroy", result)
}

/// Take a resource, blocking until one is available.
///
/// # Safety
/// As for [`sem_destroy`].
#[no_mangle]
pub unsafe extern "C" fn sem_down(sem: sem_t) -> c_int {
    status(
        "sem_down",
        sem_ref(sem).and_then(|id| runtime::global().sem_down(*id)),
    )
}

/// Release a resource.
///
/// # Safety
/// As for [`sem_destroy`].
#[no_mangle]
pub unsafe extern "C" fn sem_up(sem: sem_t) -> c_int {
    status(
        "sem_up",
        sem_ref(sem).and_then(|id| runtime::global().sem_up(*id)),
    )
}

/// Store the semaphore's value in `*sval`.
///
/// # Safety
/// As for [`sem_destroy`]; `sval` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn sem_getvalue(sem: sem_t, sval: *mut c_int) -> c_int {
    let result = (|| {
        let id = sem_ref(sem)?;
        if sval.is_null() {
            return Err(Error::InvalidArgument("null value pointer"));
        }
        let value = runtime::global().sem_getvalue(*id)?;
        *sval = c_int::try_from(value).map_err(|_| Error::InvalidArgument("value exceeds int"))?;
        Ok(())
    })();
    status("sem_getvalue", result)
}

// ============================================================================
// Thread-Private Storage
// ============================================================================

/// Initialize TPS; a non-zero `segv` installs the fault interceptor.
#[no_mangle]
pub extern "C" fn tps_init(segv: c_int) -> c_int {
    status("tps_init", runtime::global().tps_init(segv != 0))
}

/// Create a TPS for the calling thread.
#[no_mangle]
pub extern "C" fn tps_create() -> c_int {
    status("tps_create", runtime::global().tps_create())
}

/// Destroy the calling thread's TPS.
#[no_mangle]
pub extern "C" fn tps_destroy() -> c_int {
    status("tps_destroy", runtime::global().tps_destroy())
}

fn c_range(offset: usize, length: usize, buffer_is_null: bool) -> Result<()> {
    if buffer_is_null {
        return Err(Error::InvalidArgument("null buffer"));
    }
    match offset.checked_add(length) {
        Some(end) if end <= TPS_SIZE => Ok(()),
        _ => Err(Error::InvalidArgument("offset + length exceeds TPS_SIZE")),
    }
}

/// Read `length` bytes at `offset` of the caller's TPS into `buffer`.
///
/// # Safety
/// `buffer` must be null or valid for `length` bytes of writes.
#[no_mangle]
pub unsafe extern "C" fn tps_read(offset: usize, length: usize, buffer: *mut c_char) -> c_int {
    let result = c_range(offset, length, buffer.is_null()).and_then(|()| {
        let buffer = slice::from_raw_parts_mut(buffer.cast::<u8>(), length);
        runtime::global().tps_read(offset, length, buffer)
    });
    status("tps_read", result)
}

/// Write `length` bytes of `buffer` into the caller's TPS at `offset`.
///
/// # Safety
/// `buffer` must be null or valid for `length` bytes of reads.
#[no_mangle]
pub unsafe extern "C" fn tps_write(offset: usize, length: usize, buffer: *const c_char) -> c_int {
    let result = c_range(offset, length, buffer.is_null()).and_then(|()| {
        let buffer = slice::from_raw_parts(buffer.cast::<u8>(), length);
        runtime::global().tps_write(offset, length, buffer)
    });
    status("tps_write", result)
}

/// Give the calling thread a TPS sharing the page of thread `tid`.
#[no_mangle]
pub extern "C" fn tps_clone(tid: u64) -> c_int {
    status("tps_clone", runtime::global().tps_clone(ThreadId::new(tid)))
}

/// Identity of the calling thread, usable as a `tps_clone` target.
#[no_mangle]
pub extern "C" fn uthread_self() -> u64 {
    runtime::global().current_thread().as_u64()
}
