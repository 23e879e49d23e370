//! Thread identity → page bindings.
//!
//! Each thread has at most one entry. Entries created by `clone` share the
//! target's page until one side writes.

use std::collections::HashMap;

use super::page::{Access, PageArena, PageHandle};
use crate::error::{Error, Result};
use crate::log::{LogBuilder, LogLevel};
use crate::thread::ThreadId;

/// All TPS entries of a runtime plus the pages they reference.
pub(crate) struct TpsRegistry {
    entries: HashMap<ThreadId, PageHandle>,
    arena: PageArena,
}

impl TpsRegistry {
    pub(crate) fn new(max_pages: usize) -> Self {
        Self {
            entries: HashMap::new(),
            arena: PageArena::new(max_pages),
        }
    }

    fn lookup(&self, thread: ThreadId) -> Result<PageHandle> {
        self.entries.get(&thread).copied().ok_or(Error::NotFound)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn live_pages(&self) -> usize {
        self.arena.live()
    }

    pub(crate) fn create(&mut self, thread: ThreadId) -> Result<()> {
        if self.entries.contains_key(&thread) {
            return Err(Error::AlreadyExists);
        }
        let page = self.arena.reserve()?;
        self.entries.insert(thread, page);
        log_event(thread, "created");
        Ok(())
    }

    pub(crate) fn destroy(&mut self, thread: ThreadId) -> Result<()> {
        let page = self.entries.remove(&thread).ok_or(Error::NotFound)?;
        let freed = self.arena.release(page);
        LogBuilder::new(LogLevel::Debug)
            .target("tps")
            .message("destroyed")
            .field_uint("thread", thread.as_u64())
            .field_bool("page_freed", freed)
            .emit();
        Ok(())
    }

    pub(crate) fn read(&mut self, thread: ThreadId, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let page = self.lookup(thread)?;
        self.arena.read(page, offset, buffer)?;
        debug_assert_eq!(self.arena.access(page), Access::None);
        Ok(())
    }

    pub(crate) fn write(&mut self, thread: ThreadId, offset: usize, data: &[u8]) -> Result<()> {
        let page = self.lookup(thread)?;
        let target = self.arena.write(page, offset, data)?;
        if target != page {
            self.entries.insert(thread, target);
            debug_assert_eq!(self.arena.access(page), Access::None);
        }
        debug_assert_eq!(self.arena.access(target), Access::None);
        Ok(())
    }

    /// Bind `thread` to the page of `target` without copying anything.
    pub(crate) fn clone_from(&mut self, thread: ThreadId, target: ThreadId) -> Result<()> {
        let page = self.lookup(target)?;
        if self.entries.contains_key(&thread) {
            return Err(Error::AlreadyExists);
        }
        self.arena.retain(page);
        self.entries.insert(thread, page);
        LogBuilder::new(LogLevel::Debug)
            .target("tps")
            .message("cloned")
            .field_uint("thread", thread.as_u64())
            .field_uint("from", target.as_u64())
            .field_uint("refcount", self.arena.refcount(page) as u64)
            .emit();
        Ok(())
    }

    pub(crate) fn refcount(&self, thread: ThreadId) -> Result<usize> {
        Ok(self.arena.refcount(self.lookup(thread)?))
    }

    pub(crate) fn shares_page(&self, thread: ThreadId, other: ThreadId) -> Result<bool> {
        Ok(self.lookup(thread)? == self.lookup(other)?)
    }

    pub(crate) fn page_base(&self, thread: ThreadId) -> Result<usize> {
        Ok(self.arena.base(self.lookup(thread)?))
    }
}

fn log_event(thread: ThreadId, message: &str) {
    LogBuilder::new(LogLevel::Debug)
        .target("tps")
        .message(message)
        .field_uint("thread", thread.as_u64())
        .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u64) -> ThreadId {
        ThreadId::new(n)
    }

    #[test]
    fn test_one_entry_per_thread() {
        let mut reg = TpsRegistry::new(8);
        reg.create(tid(1)).unwrap();
        assert_eq!(reg.create(tid(1)), Err(Error::AlreadyExists));
        assert_eq!(reg.clone_from(tid(1), tid(1)), Err(Error::AlreadyExists));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.live_pages(), 1);
    }

    #[test]
    fn test_clone_missing_target() {
        let mut reg = TpsRegistry::new(8);
        assert_eq!(reg.clone_from(tid(2), tid(1)), Err(Error::NotFound));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_clone_shares_until_write() {
        let mut reg = TpsRegistry::new(8);
        reg.create(tid(1)).unwrap();
        reg.write(tid(1), 0, b"parent").unwrap();
        reg.clone_from(tid(2), tid(1)).unwrap();

        assert!(reg.shares_page(tid(1), tid(2)).unwrap());
        assert_eq!(reg.refcount(tid(1)), Ok(2));
        assert_eq!(reg.live_pages(), 1);

        reg.write(tid(2), 0, b"child!").unwrap();
        assert!(!reg.shares_page(tid(1), tid(2)).unwrap());
        assert_eq!(reg.refcount(tid(1)), Ok(1));
        assert_eq!(reg.refcount(tid(2)), Ok(1));
        assert_eq!(reg.live_pages(), 2);

        let mut buf = [0u8; 6];
        reg.read(tid(1), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        reg.read(tid(2), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn test_destroy_releases_last_reference_only() {
        let mut reg = TpsRegistry::new(8);
        reg.create(tid(1)).unwrap();
        reg.clone_from(tid(2), tid(1)).unwrap();

        reg.destroy(tid(1)).unwrap();
        assert_eq!(reg.live_pages(), 1);
        assert_eq!(reg.refcount(tid(2)), Ok(1));

        reg.destroy(tid(2)).unwrap();
        assert_eq!(reg.live_pages(), 0);
        assert_eq!(reg.destroy(tid(2)), Err(Error::NotFound));
    }
}
