//! # Thread-Private Storage
//!
//! Each thread may own one `TPS_SIZE` byte page that only it can read or
//! write through this API. Pages are mapped `PROT_NONE` and opened only for
//! the duration of a copy inside the runtime's critical section, so a stray
//! pointer into someone else's TPS faults instead of reading or corrupting
//! it. With fault reporting enabled such a fault is attributed on stderr
//! before the process dies (see [`fault`]).
//!
//! `tps_clone` shares the target's page lazily. The first write by either
//! sharer forks a private copy (copy-on-write).
//!
//! # Example
//!
//! ```rust,ignore
//! let rt = Runtime::new();
//! rt.tps_init(true)?;
//! rt.tps_create()?;
//! rt.tps_write(0, 5, b"hello")?;
//!
//! let mut buf = [0u8; 5];
//! rt.tps_read(0, 5, &mut buf)?;
//! ```

pub mod fault;
pub(crate) mod page;
pub(crate) mod registry;

use crate::error::{Error, Result};
use crate::log;
use crate::runtime::{Runtime, Shared};
use crate::thread::ThreadId;
use registry::TpsRegistry;

/// Size in bytes of every thread-private storage area.
pub const TPS_SIZE: usize = 4096;

/// Validate an `offset`/`length` pair against the page and the caller's buffer.
fn check_range(offset: usize, length: usize, buffer_len: usize) -> Result<()> {
    let end = offset
        .checked_add(length)
        .ok_or(Error::InvalidArgument("offset + length overflows"))?;
    if end > TPS_SIZE {
        return Err(Error::InvalidArgument("offset + length exceeds TPS_SIZE"));
    }
    if buffer_len < length {
        return Err(Error::InvalidArgument("buffer is shorter than length"));
    }
    Ok(())
}

fn registry(shared: &mut Shared) -> Result<&mut TpsRegistry> {
    shared.tps.as_mut().ok_or(Error::NotInitialized)
}

impl Runtime {
    /// Initialize thread-private storage for this runtime.
    ///
    /// With `enable_fault_reporting`, installs the process-wide fault
    /// interceptor. The `tps.fault_reporting` configuration, when set,
    /// overrides the flag.
    pub fn tps_init(&self, enable_fault_reporting: bool) -> Result<()> {
        let enable = self.config().tps.fault_reporting.unwrap_or(enable_fault_reporting);

        let mut shared = self.enter();
        if shared.tps.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if enable {
            fault::install()?;
        }
        shared.tps = Some(TpsRegistry::new(self.config().tps.max_pages));
        log::debug("tps", format!("initialized (fault reporting: {})", enable));
        Ok(())
    }

    /// Give the calling thread a zero-filled TPS.
    pub fn tps_create(&self) -> Result<()> {
        let me = self.current_thread();
        registry(&mut self.enter())?.create(me)
    }

    /// Drop the calling thread's TPS. The page is unmapped once no clone
    /// still references it.
    pub fn tps_destroy(&self) -> Result<()> {
        let me = self.current_thread();
        registry(&mut self.enter())?.destroy(me)
    }

    /// Copy `length` bytes at `offset` of the caller's TPS into `buffer`.
    pub fn tps_read(&self, offset: usize, length: usize, buffer: &mut [u8]) -> Result<()> {
        check_range(offset, length, buffer.len())?;
        let me = self.current_thread();
        registry(&mut self.enter())?.read(me, offset, &mut buffer[..length])
    }

    /// Copy `length` bytes of `buffer` into the caller's TPS at `offset`,
    /// forking a private page first if it is shared.
    pub fn tps_write(&self, offset: usize, length: usize, buffer: &[u8]) -> Result<()> {
        check_range(offset, length, buffer.len())?;
        let me = self.current_thread();
        registry(&mut self.enter())?.write(me, offset, &buffer[..length])
    }

    /// Give the calling thread a TPS sharing `target`'s page.
    pub fn tps_clone(&self, target: ThreadId) -> Result<()> {
        let me = self.current_thread();
        registry(&mut self.enter())?.clone_from(me, target)
    }

    /// Number of entries sharing the caller's page.
    pub fn tps_page_refcount(&self) -> Result<usize> {
        let me = self.current_thread();
        registry(&mut self.enter())?.refcount(me)
    }

    /// Whether the caller and `other` currently reference the same page.
    pub fn tps_shares_page_with(&self, other: ThreadId) -> Result<bool> {
        let me = self.current_thread();
        registry(&mut self.enter())?.shares_page(me, other)
    }

    /// Base address of the caller's current page.
    ///
    /// Dereferencing it outside a TPS call faults; this exists to diagnose
    /// and test the fault interceptor.
    pub fn tps_page_base(&self) -> Result<usize> {
        let me = self.current_thread();
        registry(&mut self.enter())?.page_base(me)
    }

    /// Number of threads that currently own a TPS.
    pub fn tps_len(&self) -> Result<usize> {
        Ok(registry(&mut self.enter())?.len())
    }

    /// Number of pages currently mapped for this runtime.
    pub fn tps_live_pages(&self) -> Result<usize> {
        Ok(registry(&mut self.enter())?.live_pages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::thread::testing::ScriptedScheduler;

    fn scripted() -> (Runtime, std::sync::Arc<ScriptedScheduler>) {
        let sched = ScriptedScheduler::new(1);
        let config = RuntimeConfig::builder()
            .fault_reporting(Some(false))
            .build()
            .unwrap();
        let rt = Runtime::with_scheduler(sched.clone(), config).unwrap();
        rt.tps_init(false).unwrap();
        (rt, sched)
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, TPS_SIZE, TPS_SIZE).is_ok());
        assert!(check_range(TPS_SIZE, 0, 0).is_ok());
        assert!(check_range(1, TPS_SIZE, TPS_SIZE).is_err());
        assert!(check_range(usize::MAX, 2, 2).is_err());
        assert!(check_range(0, 8, 4).is_err());
    }

    #[test]
    fn test_operations_require_init() {
        let rt = Runtime::with_scheduler(ScriptedScheduler::new(1), RuntimeConfig::default())
            .unwrap();
        assert_eq!(rt.tps_create(), Err(Error::NotInitialized));
        assert_eq!(rt.tps_destroy(), Err(Error::NotInitialized));
        assert_eq!(rt.tps_clone(ThreadId::new(2)), Err(Error::NotInitialized));
        let mut buf = [0u8; 1];
        assert_eq!(rt.tps_read(0, 1, &mut buf), Err(Error::NotInitialized));
    }

    #[test]
    fn test_init_twice() {
        let (rt, _) = scripted();
        assert_eq!(rt.tps_init(false), Err(Error::AlreadyInitialized));
    }

    #[test]
    fn test_argument_errors_take_precedence_over_lookup() {
        let (rt, _) = scripted();
        let mut buf = vec![0u8; TPS_SIZE + 1];
        assert!(matches!(
            rt.tps_read(0, TPS_SIZE + 1, &mut buf),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(rt.tps_read(0, 1, &mut buf), Err(Error::NotFound));
    }

    #[test]
    fn test_scripted_clone_isolation() {
        let (rt, sched) = scripted();
        rt.tps_create().unwrap();
        rt.tps_write(0, 5, b"first").unwrap();

        sched.switch_to(2);
        rt.tps_clone(ThreadId::new(1)).unwrap();
        assert_eq!(rt.tps_page_refcount(), Ok(2));
        assert_eq!(rt.tps_shares_page_with(ThreadId::new(1)), Ok(true));
        rt.tps_write(0, 5, b"other").unwrap();
        assert_eq!(rt.tps_page_refcount(), Ok(1));
        assert_eq!(rt.tps_live_pages(), Ok(2));

        sched.switch_to(1);
        let mut buf = [0u8; 5];
        rt.tps_read(0, 5, &mut buf).unwrap();
        assert_eq!(&buf, b"first");
        assert_eq!(rt.tps_page_refcount(), Ok(1));
    }

    #[test]
    fn test_clone_when_already_owning() {
        let (rt, sched) = scripted();
        rt.tps_create().unwrap();
        sched.switch_to(2);
        rt.tps_create().unwrap();
        assert_eq!(rt.tps_clone(ThreadId::new(1)), Err(Error::AlreadyExists));
        assert_eq!(rt.tps_len(), Ok(2));
    }
}
