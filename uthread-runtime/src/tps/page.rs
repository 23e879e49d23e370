//! Protected pages and the arena that reference-counts them.
//!
//! A [`Region`] is one anonymous `TPS_SIZE` mapping. Its protection is
//! `PROT_NONE` except inside [`Region::with_read`] / [`Region::with_write`],
//! which open the page, run a copy, and close it again before returning.
//!
//! The [`PageArena`] stores pages in slots addressed by [`PageHandle`]s and
//! keeps each page's refcount equal to the number of registry entries that
//! hold its handle. A page is unmapped as soon as the count reaches zero.

use std::ptr::{self, NonNull};
use std::slice;

use nix::errno::Errno;

use super::fault;
use super::TPS_SIZE;
use crate::error::{Error, Result};
use crate::log::{self, LogBuilder, LogLevel};

/// Access currently granted on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `PROT_NONE`: any touch faults.
    None,
    /// `PROT_READ`.
    Read,
    /// `PROT_READ | PROT_WRITE`.
    Write,
}

impl Access {
    fn prot(self) -> libc::c_int {
        match self {
            Access::None => libc::PROT_NONE,
            Access::Read => libc::PROT_READ,
            Access::Write => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// One mapped, normally inaccessible, TPS page.
pub(crate) struct Region {
    base: NonNull<u8>,
    access: Access,
    tracking_slot: usize,
}

// Safety: the mapping is owned exclusively by this value and is only touched
// through `&mut self`, which the runtime hands out under its critical section.
unsafe impl Send for Region {}

impl Region {
    /// Map a fresh zero-filled page with no access.
    pub(crate) fn map() -> Result<Self> {
        // Safety: anonymous private mapping with no address hint.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                TPS_SIZE,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let errno = Errno::last();
            log::error("tps", format!("mmap of a {} byte page failed: {}", TPS_SIZE, errno));
            return Err(Error::Os(errno));
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or(Error::Os(Errno::ENOMEM))?;

        let Some(tracking_slot) = fault::track(base.as_ptr() as usize) else {
            // Safety: `addr` was returned by the mmap above and is not shared.
            unsafe { libc::munmap(addr, TPS_SIZE) };
            log::error("tps", "fault tracking table is full");
            return Err(Error::Os(Errno::ENOMEM));
        };

        Ok(Self {
            base,
            access: Access::None,
            tracking_slot,
        })
    }

    /// Base address of the mapping.
    pub(crate) fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Current protection.
    pub(crate) fn access(&self) -> Access {
        self.access
    }

    fn protect(&mut self, access: Access) -> Result<()> {
        // Safety: `base` is the start of our own TPS_SIZE mapping.
        let rc = unsafe {
            libc::mprotect(self.base.as_ptr().cast(), TPS_SIZE, access.prot())
        };
        if rc != 0 {
            return Err(Error::Os(Errno::last()));
        }
        self.access = access;
        Ok(())
    }

    /// Run `f` over the page contents with read access.
    pub(crate) fn with_read<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.protect(Access::Read)?;
        // Safety: the page is mapped readable for the duration of `f`, and
        // `&mut self` rules out any other view of it.
        let result = f(unsafe { slice::from_raw_parts(self.base.as_ptr(), TPS_SIZE) });
        self.protect(Access::None)?;
        Ok(result)
    }

    /// Run `f` over the page contents with write access.
    pub(crate) fn with_write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.protect(Access::Write)?;
        // Safety: as for `with_read`, with the page mapped read-write.
        let result = f(unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), TPS_SIZE) });
        self.protect(Access::None)?;
        Ok(result)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        fault::untrack(self.tracking_slot);
        // Safety: we own the mapping and nothing references it past this point.
        unsafe { libc::munmap(self.base.as_ptr().cast(), TPS_SIZE) };
    }
}

/// Stable handle to a page in a [`PageArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PageHandle(usize);

struct Page {
    region: Region,
    refcount: usize,
}

/// Slot arena of reference-counted pages.
pub(crate) struct PageArena {
    slots: Vec<Option<Page>>,
    free: Vec<usize>,
    live: usize,
    max_pages: usize,
}

impl PageArena {
    pub(crate) fn new(max_pages: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_pages,
        }
    }

    /// Number of pages currently mapped.
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    fn map_region(&self) -> Result<Region> {
        if self.live >= self.max_pages {
            log::warn("tps", format!("page limit of {} reached", self.max_pages));
            return Err(Error::Os(Errno::ENOMEM));
        }
        Region::map()
    }

    fn insert(&mut self, region: Region) -> PageHandle {
        let page = Some(Page {
            region,
            refcount: 1,
        });
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = page;
                PageHandle(index)
            }
            None => {
                self.slots.push(page);
                PageHandle(self.slots.len() - 1)
            }
        }
    }

    // Handles are only held by registry entries, and an entry's page stays
    // mapped until its last entry releases it.
    fn page(&self, handle: PageHandle) -> &Page {
        match self.slots.get(handle.0) {
            Some(Some(page)) => page,
            _ => unreachable!("page handle {:?} outlived its page", handle),
        }
    }

    fn page_mut(&mut self, handle: PageHandle) -> &mut Page {
        match self.slots.get_mut(handle.0) {
            Some(Some(page)) => page,
            _ => unreachable!("page handle {:?} outlived its page", handle),
        }
    }

    /// Map a new page with refcount 1.
    pub(crate) fn reserve(&mut self) -> Result<PageHandle> {
        let region = self.map_region()?;
        Ok(self.insert(region))
    }

    /// Add a reference to an existing page.
    pub(crate) fn retain(&mut self, handle: PageHandle) {
        self.page_mut(handle).refcount += 1;
    }

    /// Drop a reference, unmapping the page when it was the last one.
    /// Returns `true` if the page was freed.
    pub(crate) fn release(&mut self, handle: PageHandle) -> bool {
        let page = self.page_mut(handle);
        page.refcount -= 1;
        if page.refcount > 0 {
            return false;
        }
        self.slots[handle.0] = None;
        self.free.push(handle.0);
        self.live -= 1;
        true
    }

    pub(crate) fn refcount(&self, handle: PageHandle) -> usize {
        self.page(handle).refcount
    }

    pub(crate) fn base(&self, handle: PageHandle) -> usize {
        self.page(handle).region.base()
    }

    pub(crate) fn access(&self, handle: PageHandle) -> Access {
        self.page(handle).region.access()
    }

    /// Copy `buffer.len()` bytes starting at `offset` out of the page.
    pub(crate) fn read(&mut self, handle: PageHandle, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let end = offset + buffer.len();
        self.page_mut(handle)
            .region
            .with_read(|page| buffer.copy_from_slice(&page[offset..end]))
    }

    /// Copy `data` into the page at `offset`.
    ///
    /// A page shared with other entries is never modified: it is forked into
    /// a private copy that receives the whole old content plus the write, and
    /// the handle of that copy is returned. Otherwise `handle` is returned.
    pub(crate) fn write(&mut self, handle: PageHandle, offset: usize, data: &[u8]) -> Result<PageHandle> {
        let end = offset + data.len();
        if self.refcount(handle) == 1 {
            self.page_mut(handle)
                .region
                .with_write(|page| page[offset..end].copy_from_slice(data))?;
            return Ok(handle);
        }

        let mut fresh = self.map_region()?;
        let shared = &mut self.page_mut(handle).region;
        shared.with_read(|old| {
            fresh.with_write(|new| {
                new.copy_from_slice(old);
                new[offset..end].copy_from_slice(data);
            })
        })??;

        let page = self.page_mut(handle);
        page.refcount -= 1;
        LogBuilder::new(LogLevel::Debug)
            .target("tps")
            .message("copy-on-write")
            .field_uint("remaining_sharers", page.refcount as u64)
            .emit();
        Ok(self.insert(fresh))
    }
}
