//! Platform syscall bindings
//!
//! The only platform seam in the crate: everything above this module speaks
//! [`crate::NativeHandle`] and crate error types, never raw syscalls. A new
//! platform backend is a new submodule re-exported here.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use unix::*;
