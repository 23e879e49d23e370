//! Error types shared by the semaphore and TPS subsystems.
//!
//! Every recoverable condition is surfaced as an [`Error`] value. A TPS
//! protection violation has no variant here: it never returns, the fault
//! interceptor terminates the process (see [`crate::tps::fault`]).

use nix::errno::Errno;
use thiserror::Error;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by semaphore and TPS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A null handle or buffer, or an out-of-range offset/length pair.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No semaphore or TPS entry exists for the given key.
    #[error("no such semaphore or thread-private storage")]
    NotFound,

    /// The calling thread already owns a TPS.
    #[error("thread-private storage already exists for this thread")]
    AlreadyExists,

    /// The semaphore still has blocked waiters.
    #[error("semaphore has blocked waiters")]
    Busy,

    /// `tps_init` was called more than once.
    #[error("thread-private storage is already initialized")]
    AlreadyInitialized,

    /// A TPS operation was attempted before `tps_init`.
    #[error("thread-private storage is not initialized")]
    NotInitialized,

    /// The operating system refused a mapping, protection or signal request.
    #[error("operating system error: {0}")]
    Os(#[from] Errno),
}

impl Error {
    /// Negated errno-style code for this error, for C callers that want more
    /// than the `-1` the exported functions return.
    pub fn code(&self) -> i32 {
        let errno = match self {
            Error::InvalidArgument(_) => Errno::EINVAL,
            Error::NotFound => Errno::ENOENT,
            Error::AlreadyExists => Errno::EEXIST,
            Error::Busy => Errno::EBUSY,
            Error::AlreadyInitialized => Errno::EALREADY,
            Error::NotInitialized => Errno::ENXIO,
            Error::Os(errno) => *errno,
        };
        -(errno as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument("offset + length exceeds TPS_SIZE");
        assert!(err.to_string().contains("TPS_SIZE"));
        assert!(Error::Busy.to_string().contains("waiters"));
    }

    #[test]
    fn test_error_codes_are_negative_errno() {
        assert_eq!(Error::InvalidArgument("x").code(), -libc::EINVAL);
        assert_eq!(Error::NotFound.code(), -libc::ENOENT);
        assert_eq!(Error::AlreadyExists.code(), -libc::EEXIST);
        assert_eq!(Error::Busy.code(), -libc::EBUSY);
        assert_eq!(Error::AlreadyInitialized.code(), -libc::EALREADY);
        assert_eq!(Error::Os(Errno::ENOMEM).code(), -libc::ENOMEM);
    }

    #[test]
    fn test_from_errno() {
        let err: Error = Errno::EACCES.into();
        assert_eq!(err, Error::Os(Errno::EACCES));
    }
}
