//! The process-wide container for semaphore and TPS state.
//!
//! A [`Runtime`] owns the critical section guard. The guard is a
//! `parking_lot::Mutex` that also owns the state it protects, the semaphore
//! table and the TPS registry, so no shared state can be touched without
//! entering it. Operations are implemented in [`crate::sem`] and
//! [`crate::tps`].

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};

use crate::config::{ConfigError, RuntimeConfig};
use crate::sem::SemTable;
use crate::thread::{Scheduler, ThreadId, ThreadScheduler};
use crate::tps::registry::TpsRegistry;

/// State reachable only through the critical section.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) sems: SemTable,
    pub(crate) tps: Option<TpsRegistry>,
}

/// Semaphores and thread-private storage bound to one scheduler.
pub struct Runtime {
    scheduler: Arc<dyn Scheduler>,
    config: RuntimeConfig,
    section: Mutex<Shared>,
}

impl Runtime {
    /// Runtime with the OS-thread scheduler and default configuration.
    pub fn new() -> Self {
        Self::build(Arc::new(ThreadScheduler), RuntimeConfig::default())
    }

    /// Runtime with the OS-thread scheduler and configuration read from
    /// `UTHREAD_*` environment variables.
    ///
    /// Out-of-range variables are ignored by [`RuntimeConfig::from_env`], so
    /// the result is always valid.
    pub fn from_env() -> Self {
        Self::build(Arc::new(ThreadScheduler), RuntimeConfig::from_env())
    }

    /// Runtime with the OS-thread scheduler.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        Self::with_scheduler(Arc::new(ThreadScheduler), config)
    }

    /// Runtime driven by an arbitrary scheduler.
    ///
    /// The logging settings of `config` are not applied; call
    /// [`LogConfig::apply`](crate::config::LogConfig::apply) for that.
    pub fn with_scheduler(
        scheduler: Arc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(scheduler, config))
    }

    fn build(scheduler: Arc<dyn Scheduler>, config: RuntimeConfig) -> Self {
        debug_assert!(config.validate().is_ok());
        Self {
            scheduler,
            config,
            section: Mutex::new(Shared::default()),
        }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The scheduler this runtime blocks and wakes threads through.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Identity of the calling thread.
    pub fn current_thread(&self) -> ThreadId {
        self.scheduler.current()
    }

    /// Enter the critical section. Leaving it is dropping the guard.
    pub(crate) fn enter(&self) -> MutexGuard<'_, Shared> {
        self.section.lock()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// The runtime behind the C ABI, created from the environment on first use.
///
/// Its logging settings are applied process-wide when it is created.
pub fn global() -> &'static Runtime {
    GLOBAL.get_or_init(|| {
        let rt = Runtime::from_env();
        rt.config().log.apply();
        rt
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogConfig, TpsConfig};
    use crate::log::{self, LogFormat, LogLevel};
    use crate::tps::fault::TRACKED_PAGES;

    #[test]
    fn test_construction_leaves_logging_alone() {
        // The C ABI runtime applies its settings once; get that out of the way.
        let _ = global();
        let original = log::level();
        let format = log::format();
        log::set_level(LogLevel::Error);

        let verbose = RuntimeConfig::builder()
            .log_level(LogLevel::Trace)
            .log_format(LogFormat::Json)
            .build()
            .unwrap();
        let first = Runtime::with_config(verbose).unwrap();
        let _second = Runtime::new();
        let _third = Runtime::from_env();
        assert_eq!(log::level(), LogLevel::Error);
        assert_eq!(log::format(), format);

        first.config().log.apply();
        assert_eq!(log::level(), LogLevel::Trace);
        assert_eq!(log::format(), LogFormat::Json);

        log::set_level(original);
        log::set_format(format);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        for max_pages in [0, TRACKED_PAGES + 1] {
            let config = RuntimeConfig {
                log: LogConfig::default(),
                tps: TpsConfig {
                    fault_reporting: None,
                    max_pages,
                },
            };
            assert!(Runtime::with_config(config).is_err());
        }

        let config = RuntimeConfig::builder().max_pages(1).build().unwrap();
        let rt = Runtime::with_config(config).unwrap();
        assert_eq!(rt.config().tps.max_pages, 1);
    }
}
