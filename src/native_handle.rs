//! The thinnest layer over a kernel resource
//!
//! [`NativeHandle`] pairs a raw platform resource identifier with a small
//! descriptor bitmask recording what the resource can do and what kind of
//! object it is. It performs no syscalls itself; ownership and lifetime
//! discipline live one layer up in [`crate::Handle`].

use bitflags::bitflags;
use std::os::fd::RawFd;

bitflags! {
    /// Descriptor bits for a native resource
    ///
    /// Capability bits (readable, writable, ...) come from how the resource
    /// was opened; kind bits (regular, directory, ...) come from the
    /// platform's metadata query at open time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Behavior: u32 {
        /// Reads are permitted
        const READABLE = 1 << 0;
        /// Writes are permitted
        const WRITABLE = 1 << 1;
        /// All writes append to the end of the resource
        const APPEND_ONLY = 1 << 2;
        /// Opened for overlapped (kernel-completion) i/o
        const OVERLAPPED = 1 << 3;
        /// The resource has a seekable data extent
        const SEEKABLE = 1 << 4;
        /// I/o must be aligned to device block boundaries
        const ALIGNED_IO = 1 << 5;
        /// A regular file or device
        const REGULAR = 1 << 6;
        /// A directory
        const DIRECTORY = 1 << 7;
        /// A symbolic link
        const SYMLINK = 1 << 8;
        /// An i/o multiplexer (epoll, kqueue, completion port)
        const MULTIPLEXER = 1 << 9;
        /// A process
        const PROCESS = 1 << 10;
    }
}

/// An opaque platform resource identifier plus its descriptor bits
///
/// A default-constructed value means "no resource". `NativeHandle` is a plain
/// value; exactly one [`crate::Handle`] owns any open one, and [`take`]
/// transfers that ownership by leaving the source empty.
///
/// [`take`]: NativeHandle::take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle {
    /// The raw file descriptor, -1 if none
    pub fd: RawFd,
    /// What the resource can do and what it is
    pub behavior: Behavior,
}

impl Default for NativeHandle {
    fn default() -> Self {
        NativeHandle {
            fd: -1,
            behavior: Behavior::empty(),
        }
    }
}

impl NativeHandle {
    /// Construct from a raw descriptor and its behavior bits
    pub fn new(fd: RawFd, behavior: Behavior) -> Self {
        NativeHandle { fd, behavior }
    }

    /// True if this refers to an open resource
    pub fn is_valid(&self) -> bool {
        self.fd >= 0
    }

    /// Transfer the resource out, leaving this handle empty
    pub fn take(&mut self) -> NativeHandle {
        std::mem::take(self)
    }

    /// True if the resource is readable
    pub fn is_readable(&self) -> bool {
        self.behavior.contains(Behavior::READABLE)
    }

    /// True if the resource is writable
    pub fn is_writable(&self) -> bool {
        self.behavior.contains(Behavior::WRITABLE)
    }

    /// True if the resource is append only
    pub fn is_append_only(&self) -> bool {
        self.behavior.contains(Behavior::APPEND_ONLY)
    }

    /// True if opened for overlapped i/o
    pub fn is_overlapped(&self) -> bool {
        self.behavior.contains(Behavior::OVERLAPPED)
    }

    /// True if the resource is seekable
    pub fn is_seekable(&self) -> bool {
        self.behavior.contains(Behavior::SEEKABLE)
    }

    /// True if i/o must be aligned to device block boundaries
    pub fn requires_aligned_io(&self) -> bool {
        self.behavior.contains(Behavior::ALIGNED_IO)
    }

    /// True if a regular file or device
    pub fn is_regular(&self) -> bool {
        self.behavior.contains(Behavior::REGULAR)
    }

    /// True if a directory
    pub fn is_directory(&self) -> bool {
        self.behavior.contains(Behavior::DIRECTORY)
    }

    /// True if a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.behavior.contains(Behavior::SYMLINK)
    }

    /// True if an i/o multiplexer
    pub fn is_multiplexer(&self) -> bool {
        self.behavior.contains(Behavior::MULTIPLEXER)
    }

    /// True if a process
    pub fn is_process(&self) -> bool {
        self.behavior.contains(Behavior::PROCESS)
    }
}
