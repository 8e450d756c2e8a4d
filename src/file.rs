//! Opening files as i/o handles
//!
//! The concrete, platform-selected opener: maps the portable
//! mode/creation/caching/flags configuration onto the platform's open call
//! and wraps the resulting resource in an [`IoHandle`]. Everything above
//! this module consumes only the handle and its configuration.

use crate::error::Result;
use crate::handle::{Caching, Handle, HandleFlags};
use crate::io_handle::IoHandle;
use crate::sys;
use std::path::Path;

/// The access the handle is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// No ability to read or write anything, but can synchronise
    None,
    /// Ability to read attributes only
    AttrRead,
    /// Ability to read and write attributes only
    AttrWrite,
    /// Ability to read
    #[default]
    Read,
    /// Ability to read and write
    Write,
    /// Atomic append; all mainstream OSs guarantee appends are atomic with
    /// respect to all other appenders
    Append,
}

/// On opening, do we also create a new file or truncate an existing one?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Creation {
    /// Open an existing file only
    #[default]
    OpenExisting,
    /// Create the file; fail if it already exists
    OnlyIfNotExist,
    /// Open the file, creating it if it does not exist
    IfNeeded,
    /// Atomically truncate on open, leaving the creation date unmodified
    Truncate,
}

/// Open a file, returning an i/o-capable handle to it.
///
/// # Errors
///
/// Whatever the platform open call reports, and
/// [`crate::Error::NotSupported`] when the requested caching mode does not
/// exist on this platform.
pub fn open(
    path: impl AsRef<Path>,
    mode: Mode,
    creation: Creation,
    caching: Caching,
    flags: HandleFlags,
) -> Result<IoHandle> {
    let path = path.as_ref();
    let native = sys::open_file(path, mode, creation, caching)?;
    tracing::debug!(
        "opened {} as fd {} (mode {:?}, creation {:?}, caching {})",
        path.display(),
        native.fd,
        mode,
        creation,
        caching
    );
    Ok(IoHandle::from(Handle::from_native(
        native,
        caching,
        flags,
        Some(path.to_path_buf()),
    )))
}
