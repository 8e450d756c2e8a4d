//! Scatter/gather i/o and byte-range locking on a handle
//!
//! [`IoHandle`] extends [`Handle`] with deadline-bounded positional
//! scatter/gather reads and writes and with shared/exclusive byte-range
//! locks released through the RAII [`ExtentGuard`].
//!
//! ## Deadlines
//!
//! The default (infinite) deadline blocks until completion. This backend
//! performs synchronous i/o on the caller's thread, so a finite deadline on
//! `read`/`write` is refused with [`Error::NotSupported`] rather than
//! silently ignored. Byte-range locks do honour finite deadlines: a
//! zero-duration deadline is a single try, anything else spins on the
//! non-blocking lock with a voluntary yield until success or expiry.
//!
//! ## Lock semantics
//!
//! Locks pass through the semantics of the underlying OS call, including any
//! POSIX insanity present on the platform. When locking falls back to
//! process-wide POSIX locks (where closing ANY handle to a file releases all
//! of the process's locks on it), the sticky
//! [`HandleFlags::BYTE_LOCK_INSANITY`](crate::HandleFlags::BYTE_LOCK_INSANITY)
//! flag is set on the handle so callers can adapt.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleFlags};
use crate::sys;
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::thread;

/// A scatter-gather i/o request: an ordered buffer list plus a file offset
#[derive(Debug)]
pub struct IoRequest<B> {
    /// The buffers to fill (read) or drain (write), in order
    pub buffers: Vec<B>,
    /// The file offset the first buffer starts at
    pub offset: u64,
}

impl<B> IoRequest<B> {
    /// Construct a request from a buffer list and an offset
    pub fn new(buffers: Vec<B>, offset: u64) -> Self {
        IoRequest { buffers, offset }
    }
}

/// The result of a scatter-gather i/o: the buffers actually transferred
///
/// Each returned buffer is the corresponding input buffer truncated to the
/// bytes transferred for that entry. The total is computed lazily on first
/// request and cached.
#[derive(Debug)]
pub struct IoResult<B> {
    buffers: Vec<B>,
    bytes: Cell<Option<u64>>,
}

impl<B: AsRef<[u8]>> IoResult<B> {
    fn new(buffers: Vec<B>) -> Self {
        IoResult {
            buffers,
            bytes: Cell::new(None),
        }
    }

    /// The transferred buffers, parallel to the request's buffer list
    pub fn buffers(&self) -> &[B] {
        &self.buffers
    }

    /// Consume the result, yielding the transferred buffers
    pub fn into_buffers(self) -> Vec<B> {
        self.buffers
    }

    /// Total bytes transferred across every buffer.
    ///
    /// Computed once on first call and cached.
    pub fn bytes_transferred(&self) -> u64 {
        if let Some(n) = self.bytes.get() {
            return n;
        }
        let n = self
            .buffers
            .iter()
            .map(|b| b.as_ref().len() as u64)
            .sum();
        self.bytes.set(Some(n));
        n
    }
}

fn truncate_mut<'a>(buf: &'a mut [u8], len: usize) -> &'a mut [u8] {
    &mut buf[..len]
}

/// A handle to something capable of scatter-gather i/o
///
/// Everything from [`Handle`] is available through deref.
#[derive(Debug)]
pub struct IoHandle {
    handle: Handle,
}

impl From<Handle> for IoHandle {
    fn from(handle: Handle) -> Self {
        IoHandle { handle }
    }
}

impl Deref for IoHandle {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl DerefMut for IoHandle {
    fn deref_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }
}

impl IoHandle {
    /// Give back the plain handle
    pub fn into_handle(self) -> Handle {
        self.handle
    }

    /// Read data from the open handle.
    ///
    /// Returns the buffers read, which may not be the buffers input: each
    /// entry is resized to the bytes of that entry actually transferred, and
    /// an implementation is free to point entries at different storage (for
    /// example into a memory map) instead of copying.
    ///
    /// # Errors
    ///
    /// Any of the values POSIX `read` can return, [`Error::TimedOut`],
    /// [`Error::Cancelled`]. [`Error::NotSupported`] if a finite deadline is
    /// given, since synchronous positional i/o cannot be cancelled.
    pub fn read<'a>(
        &self,
        req: IoRequest<&'a mut [u8]>,
        d: Deadline,
    ) -> Result<IoResult<&'a mut [u8]>> {
        if !d.is_infinite() {
            return Err(Error::NotSupported);
        }
        let IoRequest {
            mut buffers,
            offset,
        } = req;
        let n = sys::preadv(self.native_handle().fd, &mut buffers, offset)?;
        let mut remaining = n;
        let mut out = Vec::with_capacity(buffers.len());
        for buf in buffers {
            let take = remaining.min(buf.len());
            remaining -= take;
            out.push(truncate_mut(buf, take));
        }
        Ok(IoResult::new(out))
    }

    /// Write data to the open handle.
    ///
    /// Returns the buffers written, each resized to the bytes of that entry
    /// actually transferred.
    ///
    /// # Errors
    ///
    /// Any of the values POSIX `write` can return, [`Error::TimedOut`],
    /// [`Error::Cancelled`]. [`Error::NotSupported`] if a finite deadline is
    /// given, since synchronous positional i/o cannot be cancelled.
    pub fn write<'a>(
        &self,
        req: IoRequest<&'a [u8]>,
        d: Deadline,
    ) -> Result<IoResult<&'a [u8]>> {
        if !d.is_infinite() {
            return Err(Error::NotSupported);
        }
        let IoRequest { buffers, offset } = req;
        let n = sys::pwritev(self.native_handle().fd, &buffers, offset)?;
        let mut remaining = n;
        let mut out = Vec::with_capacity(buffers.len());
        for buf in buffers {
            let take = remaining.min(buf.len());
            remaining -= take;
            out.push(&buf[..take]);
        }
        Ok(IoResult::new(out))
    }

    /// Single-buffer read convenience; returns the bytes transferred
    ///
    /// # Errors
    ///
    /// As [`IoHandle::read`].
    pub fn read_at(&self, offset: u64, buf: &mut [u8], d: Deadline) -> Result<usize> {
        let res = self.read(IoRequest::new(vec![buf], offset), d)?;
        Ok(res.bytes_transferred() as usize)
    }

    /// Single-buffer write convenience; returns the bytes transferred
    ///
    /// # Errors
    ///
    /// As [`IoHandle::write`].
    pub fn write_at(&self, offset: u64, buf: &[u8], d: Deadline) -> Result<usize> {
        let res = self.write(IoRequest::new(vec![buf], offset), d)?;
        Ok(res.bytes_transferred() as usize)
    }

    /// Lock the range of bytes specified for shared or exclusive access.
    ///
    /// A `length` of zero locks the entire file, using a more efficient
    /// whole-file primitive where the platform has one. The top bit of
    /// `offset` is cleared before use because POSIX transports offsets as
    /// signed integers.
    ///
    /// With an infinite deadline this blocks in the kernel; otherwise the
    /// non-blocking lock is retried with a voluntary yield until the deadline
    /// elapses.
    ///
    /// # Errors
    ///
    /// Any of the values POSIX `fcntl` can return, and [`Error::TimedOut`]
    /// when the deadline elapses while a competitor holds the range.
    pub fn lock(
        &self,
        offset: u64,
        length: u64,
        exclusive: bool,
        d: Deadline,
    ) -> Result<ExtentGuard<'_>> {
        let fd = self.native_handle().fd;
        if d.is_infinite() {
            let insane = sys::lock_range(fd, offset, length, exclusive, true)?;
            if insane {
                self.note_byte_lock_insanity();
            }
            return Ok(ExtentGuard::new(self, offset, length, exclusive));
        }
        let armed = d.arm();
        loop {
            match sys::lock_range(fd, offset, length, exclusive, false) {
                Ok(insane) => {
                    if insane {
                        self.note_byte_lock_insanity();
                    }
                    return Ok(ExtentGuard::new(self, offset, length, exclusive));
                }
                Err(e) if e.is_lock_contention() => {
                    if armed.expired() {
                        return Err(Error::TimedOut);
                    }
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`lock`](IoHandle::lock) with a zero-duration deadline
    ///
    /// # Errors
    ///
    /// As [`IoHandle::lock`]; a held range reports [`Error::TimedOut`]
    /// immediately.
    pub fn try_lock(&self, offset: u64, length: u64, exclusive: bool) -> Result<ExtentGuard<'_>> {
        self.lock(offset, length, exclusive, Deadline::zero())
    }

    /// Unlock a byte range previously locked.
    ///
    /// The range must exactly match a previously granted one; a mismatched
    /// unlock is undefined at the OS level and is not validated here.
    /// Failures on this release path are logged and swallowed.
    pub fn unlock(&self, offset: u64, length: u64) {
        let insane = self.flags().contains(HandleFlags::BYTE_LOCK_INSANITY);
        if let Err(e) = sys::unlock_range(self.native_handle().fd, offset, length, insane) {
            tracing::warn!(
                "unlock of [{}, +{}) on {} failed: {}",
                offset,
                length,
                self.handle,
                e
            );
        }
    }
}

/// RAII holder of one locked extent of bytes in a file
///
/// Destruction unlocks. Exactly one live guard represents a given held lock:
/// moving transfers that representation, and [`release`] or [`unlock`] leave
/// the guard invalid (`handle()` is `None`) so a later drop does nothing.
///
/// [`release`]: ExtentGuard::release
/// [`unlock`]: ExtentGuard::unlock
#[derive(Debug)]
pub struct ExtentGuard<'h> {
    handle: Option<&'h IoHandle>,
    offset: u64,
    length: u64,
    exclusive: bool,
}

impl<'h> ExtentGuard<'h> {
    fn new(handle: &'h IoHandle, offset: u64, length: u64, exclusive: bool) -> Self {
        ExtentGuard {
            handle: Some(handle),
            offset,
            length,
            exclusive,
        }
    }

    /// The handle holding the locked extent, `None` if this guard is invalid
    pub fn handle(&self) -> Option<&'h IoHandle> {
        self.handle
    }

    /// The extent held: `(offset, length, exclusive)`
    pub fn extent(&self) -> (u64, u64, bool) {
        (self.offset, self.length, self.exclusive)
    }

    /// Unlock the locked extent immediately
    pub fn unlock(&mut self) {
        if let Some(h) = self.handle.take() {
            h.unlock(self.offset, self.length);
            self.offset = 0;
            self.length = 0;
            self.exclusive = false;
        }
    }

    /// Detach this guard from the locked state without unlocking.
    ///
    /// The caller becomes responsible for releasing the range.
    pub fn release(&mut self) {
        self.handle = None;
        self.offset = 0;
        self.length = 0;
        self.exclusive = false;
    }
}

impl Drop for ExtentGuard<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}
