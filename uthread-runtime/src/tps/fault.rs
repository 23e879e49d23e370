//! TPS fault interceptor.
//!
//! A `SIGSEGV`/`SIGBUS` handler that recognises accesses to TPS pages made
//! outside of a TPS call, reports them, and lets the process die. It never
//! resumes the faulting thread.
//!
//! The handler runs in signal context so it cannot lock the runtime or
//! allocate. Instead every mapped TPS page publishes its base address into
//! [`TRACKED_PAGES`] atomic slots, which the handler scans.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use super::TPS_SIZE;
use crate::error::Result;
use crate::log;

/// Capacity of the page tracking table.
pub const TRACKED_PAGES: usize = 4096;

/// Written to stderr when a fault hits a TPS page.
pub const PROTECTION_ERROR: &str = "TPS protection error!\n";

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicUsize = AtomicUsize::new(0);

static PAGES: [AtomicUsize; TRACKED_PAGES] = [EMPTY; TRACKED_PAGES];

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Publish a page base. Returns the slot to pass to [`untrack`], or `None`
/// when the table is full.
pub(crate) fn track(base: usize) -> Option<usize> {
    PAGES.iter().position(|slot| {
        slot.compare_exchange(0, base, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    })
}

/// Withdraw a page published by [`track`].
pub(crate) fn untrack(slot: usize) {
    PAGES[slot].store(0, Ordering::Release);
}

/// Start of the `TPS_SIZE` page containing `addr`.
pub fn page_boundary(addr: usize) -> usize {
    addr & !(TPS_SIZE - 1)
}

/// Whether `addr` falls inside a live TPS page of any runtime in the process.
pub fn is_tps_fault(addr: usize) -> bool {
    let boundary = page_boundary(addr);
    boundary != 0
        && PAGES
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == boundary)
}

/// Whether the interceptor has been installed in this process.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

/// Install the interceptor for `SIGSEGV` and `SIGBUS`.
///
/// Returns `false` if it was already installed.
pub fn install() -> Result<bool> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    if let Err(err) = set_handlers(&[Signal::SIGSEGV, Signal::SIGBUS]) {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(err);
    }

    log::info("fault", "TPS fault interceptor installed");
    Ok(true)
}

/// Point every signal in `signals` at the handler. On failure, signals already
/// switched get their previous action back.
fn set_handlers(signals: &[Signal]) -> Result<()> {
    let action = SigAction::new(
        SigHandler::SigAction(segv_handler),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    let mut previous = Vec::with_capacity(signals.len());
    for &sig in signals {
        // Safety: the handler only reads atomics and calls async-signal-safe
        // functions (write, signal, raise).
        match unsafe { signal::sigaction(sig, &action) } {
            Ok(old) => previous.push((sig, old)),
            Err(errno) => {
                for (sig, old) in previous.into_iter().rev() {
                    // Safety: reinstates an action the process already had.
                    let _ = unsafe { signal::sigaction(sig, &old) };
                }
                log::error("fault", format!("sigaction({:?}) failed: {}", sig, errno));
                return Err(errno.into());
            }
        }
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *const libc::siginfo_t) -> usize {
    (*info).si_addr() as usize
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *const libc::siginfo_t) -> usize {
    (*info).si_addr as usize
}

extern "C" fn segv_handler(sig: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    // Safety: the kernel passes a valid siginfo with SA_SIGINFO.
    let addr = if info.is_null() { 0 } else { unsafe { fault_address(info) } };

    if is_tps_fault(addr) {
        // Safety: write(2) is async-signal-safe; the buffer is static.
        unsafe {
            libc::write(
                libc::STDERR_FILENO,
                PROTECTION_ERROR.as_ptr().cast(),
                PROTECTION_ERROR.len(),
            );
        }
    }

    // Safety: restoring the default disposition is always sound.
    unsafe {
        let _ = signal::signal(Signal::SIGSEGV, SigHandler::SigDfl);
        let _ = signal::signal(Signal::SIGBUS, SigHandler::SigDfl);
    }
    let _ = signal::raise(Signal::try_from(sig).unwrap_or(Signal::SIGSEGV));
}
