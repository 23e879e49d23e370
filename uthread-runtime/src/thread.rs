//! # Thread Identity and Scheduling Seam
//!
//! The semaphore and TPS subsystems never talk to a concrete scheduler. They
//! consume the [`Scheduler`] trait: who is running, suspend me, resume them.
//!
//! [`ThreadScheduler`] is the default implementation. Every OS thread acts as
//! one user-level thread: it is assigned an opaque [`ThreadId`] on first use
//! and owns a token-based parker. A token posted by `unblock` before the
//! target reaches `block` is kept, so a wakeup can never be lost between a
//! waiter releasing the critical section and actually parking.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};

use crate::log;

/// Opaque identity of a user-level thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a thread ID from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// The scheduler operations this crate depends on.
///
/// `block` is always called with the runtime's critical section released;
/// `unblock` may be called while it is held.
pub trait Scheduler: Send + Sync {
    /// Identity of the calling thread.
    fn current(&self) -> ThreadId;

    /// Suspend the calling thread, `id`, until some thread calls `unblock(id)`.
    fn block(&self, id: ThreadId);

    /// Make `id` runnable again.
    fn unblock(&self, id: ThreadId);
}

/// Wake token plus the condvar a blocked thread sleeps on.
#[derive(Default)]
struct Parker {
    token: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn park(&self) {
        let mut token = self.token.lock();
        while !*token {
            self.condvar.wait(&mut token);
        }
        *token = false;
    }

    fn unpark(&self) {
        *self.token.lock() = true;
        self.condvar.notify_one();
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

fn parkers() -> &'static Mutex<HashMap<ThreadId, Arc<Parker>>> {
    static PARKERS: OnceLock<Mutex<HashMap<ThreadId, Arc<Parker>>>> = OnceLock::new();
    PARKERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Per-OS-thread registration; removed from the parker table on thread exit.
struct Registration {
    id: ThreadId,
    parker: Arc<Parker>,
}

impl Registration {
    fn new() -> Self {
        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        let parker = Arc::new(Parker::default());
        parkers().lock().insert(id, Arc::clone(&parker));
        Self { id, parker }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        parkers().lock().remove(&self.id);
    }
}

thread_local! {
    static CURRENT: Registration = Registration::new();
}

/// Scheduler backed by OS threads, one user-level thread per OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn current(&self) -> ThreadId {
        CURRENT.with(|reg| reg.id)
    }

    fn block(&self, id: ThreadId) {
        CURRENT.with(|reg| {
            debug_assert_eq!(reg.id, id, "a thread can only block itself");
            reg.parker.park();
        });
    }

    fn unblock(&self, id: ThreadId) {
        let parker = parkers().lock().get(&id).cloned();
        match parker {
            Some(parker) => parker.unpark(),
            None => log::warn("sched", format!("unblock of exited {}", id)),
        }
    }
}

/// Identity of the calling OS thread under [`ThreadScheduler`].
pub fn current_thread() -> ThreadId {
    ThreadScheduler.current()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Single-threaded scheduler whose notion of "current thread" is set by
    /// the test. Blocking is not supported.
    #[derive(Debug)]
    pub(crate) struct ScriptedScheduler {
        current: AtomicU64,
    }

    impl ScriptedScheduler {
        pub(crate) fn new(first: u64) -> Arc<Self> {
            Arc::new(Self {
                current: AtomicU64::new(first),
            })
        }

        pub(crate) fn switch_to(&self, id: u64) {
            self.current.store(id, Ordering::SeqCst);
        }
    }

    impl Scheduler for ScriptedScheduler {
        fn current(&self) -> ThreadId {
            ThreadId(self.current.load(Ordering::SeqCst))
        }

        fn block(&self, id: ThreadId) {
            panic!("{} would block forever under a scripted scheduler", id);
        }

        fn unblock(&self, _id: ThreadId) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_thread_id_display() {
        assert_eq!(ThreadId::new(7).to_string(), "Thread(7)");
        assert_eq!(ThreadId::new(7).as_u64(), 7);
    }

    #[test]
    fn test_current_is_stable_and_distinct() {
        let me = current_thread();
        assert_eq!(me, current_thread());

        let other = thread::spawn(current_thread).join().unwrap();
        assert_ne!(me, other);
    }

    #[test]
    fn test_unblock_before_block_is_not_lost() {
        let sched = ThreadScheduler;
        let me = sched.current();
        sched.unblock(me);
        // Returns immediately because the token is already posted.
        sched.block(me);
    }

    #[test]
    fn test_block_until_unblocked() {
        let sched = ThreadScheduler;
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = thread::spawn(move || {
            let me = sched.current();
            tx.send(me).unwrap();
            sched.block(me);
            true
        });

        let waiter = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        sched.unblock(waiter);
        assert!(handle.join().unwrap());
    }
}
