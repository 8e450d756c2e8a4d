//! # fs-handles
//!
//! A portable abstraction over native operating-system i/o resources with:
//! - Owned kernel handles with caching-mode and flag state ([`Handle`])
//! - Deadline-bounded scatter/gather positional i/o ([`IoHandle`])
//! - Shared/exclusive byte-range locks with RAII release ([`ExtentGuard`])
//! - A many-entity mutual exclusion primitive usable across unrelated
//!   processes and machines sharing a filesystem ([`LockFiles`])
//!
//! Byte-range locks and the shared filesystem mutex pass through the
//! semantics of the underlying OS; this crate reconciles the platforms'
//! caching modes, timeout semantics, and lock-ownership quirks without
//! papering over them (see [`HandleFlags::BYTE_LOCK_INSANITY`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use fs_handles::{open, Caching, Creation, Deadline, HandleFlags, Mode};
//!
//! # fn example() -> fs_handles::Result<()> {
//! let file = open(
//!     "data.bin",
//!     Mode::Write,
//!     Creation::IfNeeded,
//!     Caching::All,
//!     HandleFlags::empty(),
//! )?;
//!
//! // Gather-write two buffers at offset 0, then lock the range we wrote.
//! file.write_at(0, b"AB", Deadline::Infinite)?;
//! let guard = file.lock(0, 2, true, Deadline::Infinite)?;
//! drop(guard); // unlocks
//! # Ok(())
//! # }
//! ```
//!
//! Only POSIX platforms are currently supported; the platform seam is the
//! `sys` module.

#[cfg(not(unix))]
compile_error!("fs-handles currently supports POSIX platforms only");

pub mod deadline;
pub mod error;
pub mod file;
pub mod handle;
pub mod io_handle;
pub mod lock_files;
pub mod native_handle;
pub mod path_discovery;

mod sys;

// Re-export main types
pub use deadline::{ArmedDeadline, Deadline};
pub use error::{Error, Result};
pub use file::{open, Creation, Mode};
pub use handle::{Caching, Handle, HandleFlags};
pub use io_handle::{ExtentGuard, IoHandle, IoRequest, IoResult};
pub use lock_files::{EntitiesGuard, Entity, LockFiles, LOCK_STALENESS};
pub use native_handle::{Behavior, NativeHandle};
pub use path_discovery::storage_backed_temporary_files_directory;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
