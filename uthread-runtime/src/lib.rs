//! # uthread Runtime Library
//!
//! Synchronization and isolation services for a user-level thread runtime:
//!
//! - **Semaphores**: Counting semaphores with FIFO, resource-transferring wakeups
//! - **Thread-Private Storage**: One protected page per thread, shared
//!   copy-on-write by `tps_clone`
//! - **Fault Interceptor**: Attributes stray accesses to TPS pages before the
//!   process dies
//! - **C ABI**: The same operations exported for linking C programs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Runtime                            │
//! │           critical section: Mutex<Shared>                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐     │
//! │  │  Semaphores  │   │ TPS registry │──▶│  Page arena  │     │
//! │  │   (sem.rs)   │   │ (tps/*.rs)   │   │ mmap/mprotect│     │
//! │  └──────┬───────┘   └──────────────┘   └──────┬───────┘     │
//! │         │                                     │ track       │
//! │  ┌──────▼───────┐                      ┌──────▼───────┐     │
//! │  │  Scheduler   │                      │ Fault table  │     │
//! │  │ (thread.rs)  │                      │  SIGSEGV/BUS │     │
//! │  └──────────────┘                      └──────────────┘     │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use uthread_runtime::Runtime;
//!
//! let rt = Runtime::new();
//! let sem = rt.sem_create(1);
//! rt.sem_down(sem).unwrap();
//! rt.sem_up(sem).unwrap();
//!
//! rt.tps_init(true).unwrap();
//! rt.tps_create().unwrap();
//! rt.tps_write(0, 2, b"hi").unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod ffi_exports;
pub mod log;
pub mod queue;
pub mod runtime;
pub mod sem;
pub mod thread;
pub mod tps;

// Re-exports
pub use config::{ConfigError, LogConfig, RuntimeConfig, RuntimeConfigBuilder, TpsConfig};
pub use error::{Error, Result};
pub use log::{LogFormat, LogLevel};
pub use queue::WaitQueue;
pub use runtime::Runtime;
pub use sem::SemId;
pub use thread::{current_thread, Scheduler, ThreadId, ThreadScheduler};
pub use tps::TPS_SIZE;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
