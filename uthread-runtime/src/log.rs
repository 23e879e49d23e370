//! Logging Infrastructure
//!
//! Structured, line-oriented logging for the runtime. Each record carries a
//! level, a target (`sem`, `tps`, `fault`, ...), a message and typed
//! key-value fields, and is written to stderr as plain text or JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use uthread_runtime::log::{LogBuilder, LogLevel};
//!
//! LogBuilder::new(LogLevel::Debug)
//!     .target("tps")
//!     .message("copy-on-write")
//!     .field_int("old_refcount", 2)
//!     .emit();
//! ```
//!
//! Nothing in this module is async-signal-safe; the fault interceptor never
//! logs through it.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level.
    Info = 2,
    /// Warning level.
    #[default]
    Warn = 3,
    /// Error level.
    Error = 4,
    /// Off (no logging).
    Off = 5,
}

impl LogLevel {
    /// Get the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a log level from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" | "5" => Some(LogLevel::Trace),
            "debug" | "4" => Some(LogLevel::Debug),
            "info" | "3" => Some(LogLevel::Info),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "off" | "none" | "0" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// A value in a structured log record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    /// String value.
    String(String),
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value (sizes, addresses).
    Uint(u64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::String(s) => f.write_str(s),
            LogValue::Int(i) => write!(f, "{}", i),
            LogValue::Uint(u) => write!(f, "{}", u),
            LogValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl LogValue {
    fn to_json(&self) -> String {
        match self {
            LogValue::String(s) => format!("\"{}\"", escape_json(s)),
            other => other.to_string(),
        }
    }
}

/// A single log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Subsystem that produced the record.
    pub target: Option<&'static str>,
    /// Message text.
    pub message: String,
    /// Structured fields, in insertion order.
    pub fields: Vec<(&'static str, LogValue)>,
    /// Unix time in milliseconds.
    pub timestamp: u64,
}

impl LogEntry {
    /// Create a new record stamped with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            level,
            target: None,
            message: message.into(),
            fields: Vec::new(),
            timestamp,
        }
    }

    /// Format as plain text.
    pub fn format_plain(&self) -> String {
        let mut output = format!(
            "[{}.{:03}] {:<5} ",
            self.timestamp / 1000,
            self.timestamp % 1000,
            self.level.as_str()
        );
        if let Some(target) = self.target {
            output.push_str(&format!("[{}] ", target));
        }
        output.push_str(&self.message);
        if !self.fields.is_empty() {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            output.push_str(&format!(" {{{}}}", fields.join(", ")));
        }
        output
    }

    /// Format as a JSON object.
    pub fn format_json(&self) -> String {
        let mut output = format!(
            "{{\"timestamp\":{},\"level\":\"{}\"",
            self.timestamp,
            self.level.as_str()
        );
        if let Some(target) = self.target {
            output.push_str(&format!(",\"target\":\"{}\"", escape_json(target)));
        }
        output.push_str(&format!(",\"message\":\"{}\"", escape_json(&self.message)));
        if !self.fields.is_empty() {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|(key, value)| format!("\"{}\":{}", escape_json(key), value.to_json()))
                .collect();
            output.push_str(&format!(",\"fields\":{{{}}}", fields.join(",")));
        }
        output.push('}');
        output
    }

    /// Format according to the given format.
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }
}

fn escape_json(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if c.is_control() => output.push_str(&format!("\\u{:04x}", c as u32)),
            c => output.push(c),
        }
    }
    output
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static JSON: AtomicBool = AtomicBool::new(false);

// Serializes whole lines so records from different threads never interleave.
static WRITER: Mutex<()> = parking_lot::const_mutex(());

/// Set the minimum level that will be written.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Current minimum level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or_default()
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    JSON.store(format == LogFormat::Json, Ordering::SeqCst);
}

/// Current output format.
pub fn format() -> LogFormat {
    if JSON.load(Ordering::SeqCst) {
        LogFormat::Json
    } else {
        LogFormat::Plain
    }
}

/// Check if a record at `level` would be written.
pub fn would_log(level: LogLevel) -> bool {
    passes(level, self::level())
}

fn passes(level: LogLevel, min: LogLevel) -> bool {
    level != LogLevel::Off && level >= min
}

/// Write a record to stderr if its level is enabled.
pub fn emit(entry: &LogEntry) {
    if !would_log(entry.level) {
        return;
    }
    let line = entry.format(format());
    let _lock = WRITER.lock();
    let _ = writeln!(std::io::stderr(), "{}", line);
}

/// Builder for log records.
#[derive(Debug)]
pub struct LogBuilder {
    entry: LogEntry,
}

impl LogBuilder {
    /// Create a new builder.
    pub fn new(level: LogLevel) -> Self {
        Self {
            entry: LogEntry::new(level, ""),
        }
    }

    /// Set the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.entry.message = msg.into();
        self
    }

    /// Set the target subsystem.
    pub fn target(mut self, target: &'static str) -> Self {
        self.entry.target = Some(target);
        self
    }

    /// Add a string field.
    pub fn field_str(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.entry.fields.push((key, LogValue::String(value.into())));
        self
    }

    /// Add a signed integer field.
    pub fn field_int(mut self, key: &'static str, value: i64) -> Self {
        self.entry.fields.push((key, LogValue::Int(value)));
        self
    }

    /// Add an unsigned integer field.
    pub fn field_uint(mut self, key: &'static str, value: u64) -> Self {
        self.entry.fields.push((key, LogValue::Uint(value)));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: &'static str, value: bool) -> Self {
        self.entry.fields.push((key, LogValue::Bool(value)));
        self
    }

    /// Whether the record would be written; lets callers skip building fields.
    pub fn enabled(&self) -> bool {
        would_log(self.entry.level)
    }

    /// Emit the record.
    pub fn emit(self) {
        emit(&self.entry);
    }
}

/// Log a debug message for `target`.
pub fn debug(target: &'static str, message: impl Into<String>) {
    LogBuilder::new(LogLevel::Debug).target(target).message(message).emit();
}

/// Log an info message for `target`.
pub fn info(target: &'static str, message: impl Into<String>) {
    LogBuilder::new(LogLevel::Info).target(target).message(message).emit();
}

/// Log a warning for `target`.
pub fn warn(target: &'static str, message: impl Into<String>) {
    LogBuilder::new(LogLevel::Warn).target(target).message(message).emit();
}

/// Log an error for `target`.
pub fn error(target: &'static str, message: impl Into<String>) {
    LogBuilder::new(LogLevel::Error).target(target).message(message).emit();
}
