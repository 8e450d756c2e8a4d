//! Owned kernel handles with caching and flag state
//!
//! [`Handle`] owns exactly one [`NativeHandle`] and closes it on drop. It
//! carries the kernel caching mode and the flag set the resource was opened
//! with, and derives every capability query purely from those plus the
//! resource's descriptor bits, so queries never fail and never syscall.
//!
//! Handles are move-only. Duplicating the underlying kernel resource is
//! expensive, so copying is a separately named, explicit operation
//! ([`Handle::duplicate`]) rather than `Clone`.

use crate::error::Result;
use crate::native_handle::NativeHandle;
use crate::sys;
use bitflags::bitflags;
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};

/// What i/o on a handle completes immediately due to kernel caching
///
/// The discriminant encoding is load-bearing: bit 0 set means the mode needs
/// extra safety fsyncs because the OS does not otherwise guarantee its
/// durability (see [`Handle::are_safety_fsyncs_issued`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Caching {
    /// No caching whatsoever; all reads and writes come from storage
    /// (`O_DIRECT|O_SYNC`). Align all i/o to device block boundaries.
    #[default]
    None = 1,
    /// Cache metadata but not data (`O_DIRECT`). Align all i/o to device
    /// block boundaries.
    OnlyMetadata = 2,
    /// Cache reads only; writes of data and metadata do not complete until
    /// they reach storage (`O_SYNC`)
    Reads = 3,
    /// Cache reads and writes of data and metadata; the kernel writes back
    /// whenever it chooses. The ordinary filesystem default.
    All = 4,
    /// Cache reads and metadata writes, but data writes do not complete
    /// until they reach storage (`O_DSYNC`)
    ReadsAndMetadata = 5,
    /// Fully cached and expected to be short-lived; the OS may avoid sending
    /// any update to storage at all
    Temporary = 6,
    /// Fully cached, but extra safety fsyncs are issued at key points
    SafetyFsyncs = 7,
}

impl Caching {
    /// True if this mode relies on extra safety fsyncs for durability
    pub fn needs_safety_fsyncs(self) -> bool {
        (self as u8) & 1 == 1
    }
}

impl fmt::Display for Caching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Caching::None => "none",
            Caching::OnlyMetadata => "only_metadata",
            Caching::Reads => "reads",
            Caching::All => "all",
            Caching::ReadsAndMetadata => "reads_and_metadata",
            Caching::Temporary => "temporary",
            Caching::SafetyFsyncs => "safety_fsyncs",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Flags a handle can be opened with or acquire over its lifetime
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleFlags: u32 {
        /// Delete the file when the last handle in the system closes
        const DELETE_ON_LAST_CLOSE = 1 << 0;
        /// Unlink the file when this handle first closes
        const UNLINK_ON_FIRST_CLOSE = 1 << 1;
        /// Suppress the extra safety fsyncs some caching modes otherwise get
        const DISABLE_SAFETY_FSYNCS = 1 << 2;
        /// Create new handles with overlapped (kernel-completion) semantics
        const OVERLAPPED = 1 << 28;
        /// Byte-range locking on this handle fell back to process-wide POSIX
        /// locks, where closing any handle to the file releases every lock
        /// the process holds on it. Sticky once set.
        const BYTE_LOCK_INSANITY = 1 << 29;
    }
}

/// A [`NativeHandle`] managed by the lifetime of this object
///
/// The caching mode and flags are only meaningful while the resource is open;
/// [`close`] resets both to their defaults along with the resource itself.
///
/// [`close`]: Handle::close
#[derive(Debug)]
pub struct Handle {
    native: NativeHandle,
    caching: Caching,
    // Cell because acquiring a byte-range lock through a shared reference can
    // discover and record lock insanity.
    flags: Cell<HandleFlags>,
    path: Option<PathBuf>,
}

impl Handle {
    /// Wrap an already-open native resource
    pub fn from_native(
        native: NativeHandle,
        caching: Caching,
        flags: HandleFlags,
        path: Option<PathBuf>,
    ) -> Self {
        Handle {
            native,
            caching,
            flags: Cell::new(flags),
            path,
        }
    }

    /// The path this handle was opened from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The native resource managed by this handle
    pub fn native_handle(&self) -> NativeHandle {
        self.native
    }

    /// Immediately close the native resource managed by this handle.
    ///
    /// Idempotent: closing an already-closed handle is a no-op. On success
    /// the caching mode and flags reset to their defaults, since they
    /// describe an open resource only.
    ///
    /// # Errors
    ///
    /// Whatever the OS reports for the close syscall.
    pub fn close(&mut self) -> Result<()> {
        if !self.native.is_valid() {
            return Ok(());
        }
        if self.flags.get().contains(HandleFlags::UNLINK_ON_FIRST_CLOSE) {
            if let Some(path) = &self.path {
                if let Err(e) = sys::unlink(path) {
                    tracing::warn!("failed to unlink {} on close: {}", path.display(), e);
                }
            }
        }
        let native = self.native.take();
        self.caching = Caching::default();
        self.flags.set(HandleFlags::default());
        sys::close(native.fd)?;
        Ok(())
    }

    /// Release the native resource without closing it.
    ///
    /// The caller now owns the returned resource; this handle becomes empty.
    pub fn release(&mut self) -> NativeHandle {
        self.native.take()
    }

    /// Duplicate the underlying kernel resource into a new handle.
    ///
    /// This is the explicit, expensive copy operation; the new handle shares
    /// the open file description but has its own descriptor.
    ///
    /// # Errors
    ///
    /// Whatever the OS reports for descriptor duplication.
    pub fn duplicate(&self) -> Result<Handle> {
        let fd = sys::duplicate(self.native.fd)?;
        Ok(Handle {
            native: NativeHandle::new(fd, self.native.behavior),
            caching: self.caching,
            flags: Cell::new(self.flags.get()),
            path: self.path.clone(),
        })
    }

    /// Changes whether this handle is append only.
    ///
    /// Toggles only the append disposition; every other disposition bit is
    /// left alone. Performs no memory allocation.
    ///
    /// # Errors
    ///
    /// Whatever the OS reports for the flag change.
    pub fn set_append_only(&mut self, enable: bool) -> Result<()> {
        sys::set_append_only(self.native.fd, enable)?;
        self.native.behavior.set(
            crate::native_handle::Behavior::APPEND_ONLY,
            enable,
        );
        Ok(())
    }

    /// Changes the kernel cache strategy used by this handle.
    ///
    /// Most platforms impose severe restrictions on which transitions are
    /// possible after open and refuse the rest; on some platforms an allowed
    /// transition requires reopening the resource and is comparatively
    /// expensive. It is often easier to open a new handle.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotSupported`] if the platform refuses the transition,
    /// otherwise whatever the OS reports.
    pub fn set_kernel_caching(&mut self, caching: Caching) -> Result<()> {
        sys::set_kernel_caching(self.native.fd, caching)?;
        tracing::debug!("caching changed from {} to {}", self.caching, caching);
        self.caching = caching;
        self.native.behavior.set(
            crate::native_handle::Behavior::ALIGNED_IO,
            matches!(caching, Caching::None | Caching::OnlyMetadata),
        );
        Ok(())
    }

    /// True if the handle is readable
    pub fn is_readable(&self) -> bool {
        self.native.is_readable()
    }

    /// True if the handle is writable
    pub fn is_writable(&self) -> bool {
        self.native.is_writable()
    }

    /// True if the handle is append only
    pub fn is_append_only(&self) -> bool {
        self.native.is_append_only()
    }

    /// True if overlapped
    pub fn is_overlapped(&self) -> bool {
        self.native.is_overlapped()
    }

    /// True if seekable
    pub fn is_seekable(&self) -> bool {
        self.native.is_seekable()
    }

    /// True if i/o must be aligned to device block boundaries
    pub fn requires_aligned_io(&self) -> bool {
        self.native.requires_aligned_io()
    }

    /// True if a regular file or device
    pub fn is_regular(&self) -> bool {
        self.native.is_regular()
    }

    /// True if a directory
    pub fn is_directory(&self) -> bool {
        self.native.is_directory()
    }

    /// True if a symlink
    pub fn is_symlink(&self) -> bool {
        self.native.is_symlink()
    }

    /// True if an i/o multiplexer
    pub fn is_multiplexer(&self) -> bool {
        self.native.is_multiplexer()
    }

    /// True if a process
    pub fn is_process(&self) -> bool {
        self.native.is_process()
    }

    /// Kernel cache strategy used by this handle
    pub fn kernel_caching(&self) -> Caching {
        self.caching
    }

    /// True if reads are served from the kernel page cache
    pub fn are_reads_from_cache(&self) -> bool {
        self.caching != Caching::None && self.caching != Caching::OnlyMetadata
    }

    /// True if data writes are safely on storage when they complete
    pub fn are_writes_durable(&self) -> bool {
        matches!(
            self.caching,
            Caching::None | Caching::Reads | Caching::ReadsAndMetadata
        )
    }

    /// True if extra safety fsyncs are being issued for this handle
    pub fn are_safety_fsyncs_issued(&self) -> bool {
        !self.flags.get().contains(HandleFlags::DISABLE_SAFETY_FSYNCS)
            && self.caching.needs_safety_fsyncs()
    }

    /// The flags this handle currently carries
    pub fn flags(&self) -> HandleFlags {
        self.flags.get()
    }

    /// Record that byte-range locking fell back to insane POSIX semantics
    pub(crate) fn note_byte_lock_insanity(&self) {
        self.flags
            .set(self.flags.get() | HandleFlags::BYTE_LOCK_INSANITY);
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // Errors on the cleanup path are swallowed; a destructor must not
        // fail the primary operation.
        if self.native.is_valid() {
            if let Err(e) = self.close() {
                tracing::warn!("close failed in handle drop: {}", e);
            }
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "handle({}, {})", self.native.fd, path.display()),
            None => write!(f, "handle({})", self.native.fd),
        }
    }
}
