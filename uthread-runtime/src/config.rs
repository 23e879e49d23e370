//! Runtime Configuration
//!
//! Configuration can be set programmatically or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `UTHREAD_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `UTHREAD_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | warn |
//! | `UTHREAD_LOG_FORMAT` | Log line format (plain/json) | plain |
//! | `UTHREAD_TPS_FAULT_REPORTING` | Force the TPS fault interceptor on or off | unset |
//! | `UTHREAD_TPS_MAX_PAGES` | Maximum number of live TPS pages | 4096 |
//!
//! # Example
//!
//! ```rust,ignore
//! use uthread_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .log_level(LogLevel::Debug)
//!     .fault_reporting(Some(true))
//!     .build()?;
//! ```

use std::env;

use thiserror::Error;

use crate::log::{self, LogFormat, LogLevel};
use crate::tps::fault::TRACKED_PAGES;

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum level written to stderr.
    /// Default: Warn.
    pub level: LogLevel,

    /// Line format.
    /// Default: Plain.
    pub format: LogFormat,
}

impl LogConfig {
    /// Make these settings the process-wide logging settings.
    pub fn apply(&self) {
        log::set_level(self.level);
        log::set_format(self.format);
    }
}

/// Thread-private storage configuration.
#[derive(Debug, Clone)]
pub struct TpsConfig {
    /// Overrides the `enable_fault_reporting` flag passed to `tps_init`.
    /// Default: None (the caller decides).
    pub fault_reporting: Option<bool>,

    /// Maximum number of TPS pages alive at once.
    /// Default: 4096, which is also the upper bound.
    pub max_pages: usize,
}

impl Default for TpsConfig {
    fn default() -> Self {
        Self {
            fault_reporting: None,
            max_pages: TRACKED_PAGES,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Logging configuration.
    pub log: LogConfig,

    /// Thread-private storage configuration.
    pub tps: TpsConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(level) = env::var("UTHREAD_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            config.log.level = level;
        }

        if let Some(format) = env::var("UTHREAD_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
        {
            config.log.format = format;
        }

        if let Some(val) = parse_env_bool("UTHREAD_TPS_FAULT_REPORTING") {
            config.tps.fault_reporting = Some(val);
        }

        if let Some(val) = parse_env_usize("UTHREAD_TPS_MAX_PAGES") {
            if val > 0 && val <= TRACKED_PAGES {
                config.tps.max_pages = val;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tps.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tps.max_pages",
                message: "must be at least 1".into(),
            });
        }

        if self.tps.max_pages > TRACKED_PAGES {
            return Err(ConfigError::InvalidValue {
                field: "tps.max_pages",
                message: format!("must not exceed {}", TRACKED_PAGES),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Error message.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Force the fault interceptor on or off regardless of `tps_init`'s flag.
    pub fn fault_reporting(mut self, forced: Option<bool>) -> Self {
        self.config.tps.fault_reporting = forced;
        self
    }

    /// Set the maximum number of live TPS pages.
    pub fn max_pages(mut self, max: usize) -> Self {
        self.config.tps.max_pages = max;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|s| match s.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
}
