//! # Counting Semaphores
//!
//! Semaphores with strict FIFO wakeup. When `up` finds a blocked waiter it
//! hands the resource straight to the oldest one and leaves `count`
//! untouched; the woken thread returns from `down` without decrementing.
//! `count` therefore only ever holds resources nobody is waiting for, and a
//! later `down` can never take a resource already promised to a waiter.
//!
//! Semaphores live in the runtime's semaphore table and are addressed by
//! [`SemId`] handles.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::log::{LogBuilder, LogLevel};
use crate::queue::WaitQueue;
use crate::runtime::Runtime;
use crate::thread::ThreadId;

/// Handle to a semaphore owned by a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(u64);

impl SemId {
    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sem({})", self.0)
    }
}

/// One semaphore: free resources and the threads waiting for one.
#[derive(Debug, Default)]
pub(crate) struct SemState {
    count: usize,
    waiters: WaitQueue<ThreadId>,
}

impl SemState {
    fn value(&self) -> isize {
        if self.count > 0 {
            self.count as isize
        } else {
            -(self.waiters.len() as isize)
        }
    }
}

/// All semaphores of a runtime.
#[derive(Debug, Default)]
pub(crate) struct SemTable {
    sems: HashMap<SemId, SemState>,
    next_id: u64,
}

impl SemTable {
    fn insert(&mut self, count: usize) -> SemId {
        self.next_id += 1;
        let id = SemId(self.next_id);
        self.sems.insert(
            id,
            SemState {
                count,
                waiters: WaitQueue::new(),
            },
        );
        id
    }

    fn get_mut(&mut self, id: SemId) -> Result<&mut SemState> {
        self.sems.get_mut(&id).ok_or(Error::NotFound)
    }

    fn get(&self, id: SemId) -> Result<&SemState> {
        self.sems.get(&id).ok_or(Error::NotFound)
    }
}

impl Runtime {
    /// Create a semaphore holding `count` resources.
    pub fn sem_create(&self, count: usize) -> SemId {
        let id = self.enter().sems.insert(count);
        let record = LogBuilder::new(LogLevel::Trace);
        if record.enabled() {
            record
                .target("sem")
                .message("created")
                .field_uint("sem", id.0)
                .field_uint("count", count as u64)
                .emit();
        }
        id
    }

    /// Destroy a semaphore.
    ///
    /// Fails with [`Error::Busy`] while any thread is blocked on it.
    pub fn sem_destroy(&self, sem: SemId) -> Result<()> {
        let mut shared = self.enter();
        if !shared.sems.get(sem)?.waiters.is_empty() {
            return Err(Error::Busy);
        }
        shared.sems.sems.remove(&sem);
        Ok(())
    }

    /// Take a resource, blocking the caller until one is handed to it.
    pub fn sem_down(&self, sem: SemId) -> Result<()> {
        let me = self.current_thread();
        {
            let mut shared = self.enter();
            let state = shared.sems.get_mut(sem)?;
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            state.waiters.enqueue(me);
        }

        let record = LogBuilder::new(LogLevel::Debug);
        if record.enabled() {
            record
                .target("sem")
                .message("blocked")
                .field_uint("sem", sem.0)
                .field_uint("thread", me.as_u64())
                .emit();
        }

        // The resource is ours once this returns; `up` did the accounting.
        self.scheduler().block(me);
        Ok(())
    }

    /// Take a resource if one is free, without blocking.
    pub fn sem_try_down(&self, sem: SemId) -> Result<bool> {
        let mut shared = self.enter();
        let state = shared.sems.get_mut(sem)?;
        if state.count > 0 {
            state.count -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release a resource, handing it to the oldest waiter if there is one.
    pub fn sem_up(&self, sem: SemId) -> Result<()> {
        let mut shared = self.enter();
        let state = shared.sems.get_mut(sem)?;
        match state.waiters.dequeue() {
            Some(waiter) => {
                self.scheduler().unblock(waiter);
                let record = LogBuilder::new(LogLevel::Debug);
                if record.enabled() {
                    record
                        .target("sem")
                        .message("woke waiter")
                        .field_uint("sem", sem.0)
                        .field_uint("thread", waiter.as_u64())
                        .emit();
                }
            }
            None => state.count += 1,
        }
        Ok(())
    }

    /// Free resources if positive, otherwise minus the number of waiters.
    pub fn sem_getvalue(&self, sem: SemId) -> Result<isize> {
        Ok(self.enter().sems.get(sem)?.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_down_up_without_contention() {
        let rt = Runtime::new();
        let sem = rt.sem_create(2);
        assert_eq!(rt.sem_getvalue(sem), Ok(2));

        rt.sem_down(sem).unwrap();
        rt.sem_down(sem).unwrap();
        assert_eq!(rt.sem_getvalue(sem), Ok(0));

        rt.sem_up(sem).unwrap();
        assert_eq!(rt.sem_getvalue(sem), Ok(1));
        rt.sem_up(sem).unwrap();
        rt.sem_up(sem).unwrap();
        assert_eq!(rt.sem_getvalue(sem), Ok(3));
    }

    #[test]
    fn test_try_down() {
        let rt = Runtime::new();
        let sem = rt.sem_create(1);
        assert_eq!(rt.sem_try_down(sem), Ok(true));
        assert_eq!(rt.sem_try_down(sem), Ok(false));
        assert_eq!(rt.sem_getvalue(sem), Ok(0));
    }

    #[test]
    fn test_value_reports_queue_depth() {
        let mut state = SemState::default();
        assert_eq!(state.value(), 0);
        state.waiters.enqueue(ThreadId::new(1));
        state.waiters.enqueue(ThreadId::new(2));
        assert_eq!(state.value(), -2);
    }

    #[test]
    fn test_destroy() {
        let rt = Runtime::new();
        let sem = rt.sem_create(0);
        assert_eq!(rt.sem_destroy(sem), Ok(()));
        assert_eq!(rt.sem_destroy(sem), Err(Error::NotFound));
        assert_eq!(rt.sem_up(sem), Err(Error::NotFound));
        assert_eq!(rt.sem_down(sem), Err(Error::NotFound));
        assert_eq!(rt.sem_getvalue(sem), Err(Error::NotFound));
    }

    #[test]
    fn test_destroy_with_waiter_is_busy() {
        let rt = Runtime::new();
        let sem = rt.sem_create(0);
        rt.enter()
            .sems
            .get_mut(sem)
            .unwrap()
            .waiters
            .enqueue(ThreadId::new(99));
        assert_eq!(rt.sem_destroy(sem), Err(Error::Busy));
        assert_eq!(rt.sem_getvalue(sem), Ok(-1));
    }

    #[test]
    fn test_handles_are_per_runtime() {
        let a = Runtime::new();
        let b = Runtime::new();
        let sem = a.sem_create(1);
        let other = b.sem_create(5);
        assert_eq!(sem, other);
        assert_eq!(a.sem_getvalue(sem), Ok(1));
        assert_eq!(b.sem_getvalue(sem), Ok(5));
    }
}
