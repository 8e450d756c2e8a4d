//! Error types for handle, i/o, and locking operations
//!
//! Every fallible operation in this crate returns [`Result`]. OS failures are
//! carried verbatim as [`Error::Platform`] so callers can inspect the raw
//! errno; the remaining variants cover the deadline contract
//! ([`Error::TimedOut`], [`Error::Cancelled`]) and handle configurations that
//! cannot honour it ([`Error::NotSupported`]).
//!
//! Cleanup paths (handle close in `Drop`, guard unlock) never propagate
//! errors; they log and swallow them so that releasing a resource cannot fail
//! the primary operation.

use std::io;

/// Result type for all fallible operations in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for handle, i/o, and locking operations
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Verbatim OS error from open/read/write/lock/unlock/close
    #[error(transparent)]
    Platform(#[from] io::Error),

    /// The deadline elapsed before the operation completed
    #[error("operation timed out before completion")]
    TimedOut,

    /// Deadline-bounded or cancellable i/o was requested on a handle
    /// configuration that cannot support it
    #[error("deadline i/o is not supported by this handle configuration")]
    NotSupported,

    /// In-flight i/o was aborted because its deadline expired
    #[error("i/o was cancelled after its deadline expired")]
    Cancelled,
}

impl Error {
    /// Construct a [`Error::Platform`] from the calling thread's last OS error
    pub(crate) fn last_os_error() -> Self {
        Error::Platform(io::Error::last_os_error())
    }

    /// The raw OS error code, if this is a platform error
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Platform(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// True if this error reports a byte-range lock held by a competitor
    /// rather than a hard failure.
    ///
    /// POSIX reports a contended non-blocking `fcntl` lock as either `EAGAIN`
    /// or `EACCES` depending on the system.
    #[cfg(unix)]
    pub(crate) fn is_lock_contention(&self) -> bool {
        matches!(
            self.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::EACCES)
        )
    }
}
