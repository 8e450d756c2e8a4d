//! POSIX implementation of the platform seam
//!
//! Uses `nix` for the straightforward calls (open, close, fstat, descriptor
//! flag changes) and raw `libc` where nix's typed surface does not cover what
//! we need at the pinned version: `struct flock` byte-range locks and
//! iovec-based positional i/o.
//!
//! ## Byte-range locks
//!
//! Linux 3.15+ open-file-description locks (`F_OFD_SETLK`) are used first:
//! they are owned by the open file description, so unrelated handles in one
//! process conflict properly and closing an unrelated handle does not drop
//! them. If the kernel rejects the command, or on non-Linux POSIX, we fall
//! back to classic process-wide `F_SETLK` locks and report the fallback so
//! the handle can set its sticky insanity flag. For whole-file locks on
//! non-Linux systems `flock(2)` is preferred, which also has sane ownership.

use crate::error::{Error, Result};
use crate::file::{Creation, Mode};
use crate::handle::Caching;
use crate::native_handle::{Behavior, NativeHandle};
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::sys::stat::fstat;
use nix::unistd;
use std::io;
use std::os::fd::RawFd;
use std::path::Path;

// POSIX transports lock offsets as signed off_t.
const OFFSET_MASK: u64 = i64::MAX as u64;

/// Open a file per the portable mode/creation/caching configuration.
pub(crate) fn open_file(
    path: &Path,
    mode: Mode,
    creation: Creation,
    caching: Caching,
) -> Result<NativeHandle> {
    let mut oflag = OFlag::O_CLOEXEC;
    let mut behavior = Behavior::empty();

    match mode {
        // POSIX has no attribute-only open; fall back to read-only access.
        Mode::None | Mode::AttrRead | Mode::AttrWrite => {
            oflag |= OFlag::O_RDONLY;
        }
        Mode::Read => {
            oflag |= OFlag::O_RDONLY;
            behavior |= Behavior::READABLE;
        }
        Mode::Write => {
            oflag |= OFlag::O_RDWR;
            behavior |= Behavior::READABLE | Behavior::WRITABLE;
        }
        Mode::Append => {
            oflag |= OFlag::O_WRONLY | OFlag::O_APPEND;
            behavior |= Behavior::WRITABLE | Behavior::APPEND_ONLY;
        }
    }

    match creation {
        Creation::OpenExisting => {}
        Creation::OnlyIfNotExist => oflag |= OFlag::O_CREAT | OFlag::O_EXCL,
        Creation::IfNeeded => oflag |= OFlag::O_CREAT,
        Creation::Truncate => oflag |= OFlag::O_TRUNC,
    }

    oflag |= caching_oflags(caching)?;
    if matches!(caching, Caching::None | Caching::OnlyMetadata) {
        behavior |= Behavior::ALIGNED_IO;
    }

    let fd = open(
        path,
        oflag,
        nix::sys::stat::Mode::from_bits_truncate(0o600),
    )
    .map_err(io::Error::from)?;

    let st = match fstat(fd) {
        Ok(st) => st,
        Err(e) => {
            let _ = unistd::close(fd);
            return Err(Error::Platform(io::Error::from(e)));
        }
    };
    behavior |= kind_bits(st.st_mode);

    Ok(NativeHandle::new(fd, behavior))
}

fn caching_oflags(caching: Caching) -> Result<OFlag> {
    #[cfg(target_os = "linux")]
    {
        Ok(match caching {
            Caching::None => OFlag::O_DIRECT | OFlag::O_SYNC,
            Caching::OnlyMetadata => OFlag::O_DIRECT,
            Caching::Reads => OFlag::O_SYNC,
            Caching::ReadsAndMetadata => OFlag::O_DSYNC,
            Caching::All | Caching::Temporary | Caching::SafetyFsyncs => OFlag::empty(),
        })
    }
    #[cfg(not(target_os = "linux"))]
    {
        match caching {
            // No O_DIRECT outside Linux.
            Caching::None | Caching::OnlyMetadata => Err(Error::NotSupported),
            Caching::Reads => Ok(OFlag::O_SYNC),
            Caching::ReadsAndMetadata => Ok(OFlag::O_SYNC),
            Caching::All | Caching::Temporary | Caching::SafetyFsyncs => Ok(OFlag::empty()),
        }
    }
}

fn kind_bits(st_mode: libc::mode_t) -> Behavior {
    match st_mode & libc::S_IFMT {
        libc::S_IFREG | libc::S_IFBLK => Behavior::REGULAR | Behavior::SEEKABLE,
        libc::S_IFCHR => Behavior::REGULAR,
        libc::S_IFDIR => Behavior::DIRECTORY,
        libc::S_IFLNK => Behavior::SYMLINK,
        _ => Behavior::empty(),
    }
}

pub(crate) fn close(fd: RawFd) -> Result<()> {
    unistd::close(fd).map_err(io::Error::from)?;
    Ok(())
}

pub(crate) fn unlink(path: &Path) -> Result<()> {
    unistd::unlink(path).map_err(io::Error::from)?;
    Ok(())
}

pub(crate) fn duplicate(fd: RawFd) -> Result<RawFd> {
    let new = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(0)).map_err(io::Error::from)?;
    Ok(new)
}

pub(crate) fn set_append_only(fd: RawFd, enable: bool) -> Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let mut flags = OFlag::from_bits_retain(bits);
    flags.set(OFlag::O_APPEND, enable);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// Change the kernel caching mode of an open descriptor.
///
/// POSIX only lets `F_SETFL` change a handful of status flags after open;
/// the sync level (`O_SYNC`/`O_DSYNC`) is fixed at open time, so any
/// transition that would change it is refused with `NotSupported`.
pub(crate) fn set_kernel_caching(fd: RawFd, caching: Caching) -> Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let current = OFlag::from_bits_retain(bits);

    let wanted_sync = match caching {
        Caching::None | Caching::Reads => OFlag::O_SYNC,
        #[cfg(target_os = "linux")]
        Caching::ReadsAndMetadata => OFlag::O_DSYNC,
        #[cfg(not(target_os = "linux"))]
        Caching::ReadsAndMetadata => OFlag::O_SYNC,
        _ => OFlag::empty(),
    };
    #[cfg(target_os = "linux")]
    let sync_mask = OFlag::O_SYNC | OFlag::O_DSYNC;
    #[cfg(not(target_os = "linux"))]
    let sync_mask = OFlag::O_SYNC;
    if current & sync_mask != wanted_sync {
        return Err(Error::NotSupported);
    }

    #[cfg(target_os = "linux")]
    {
        let mut flags = current;
        flags.set(
            OFlag::O_DIRECT,
            matches!(caching, Caching::None | Caching::OnlyMetadata),
        );
        if flags != current {
            fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        }
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        if matches!(caching, Caching::None | Caching::OnlyMetadata) {
            return Err(Error::NotSupported);
        }
        Ok(())
    }
}

/// Positional scatter read. Blocks until the kernel returns.
pub(crate) fn preadv(fd: RawFd, bufs: &mut [&mut [u8]], offset: u64) -> Result<usize> {
    let iov: Vec<libc::iovec> = bufs
        .iter_mut()
        .map(|b| libc::iovec {
            iov_base: b.as_mut_ptr().cast(),
            iov_len: b.len(),
        })
        .collect();
    // SAFETY: every iovec points into a live caller-provided buffer.
    let n = unsafe {
        libc::preadv(
            fd,
            iov.as_ptr(),
            iov.len() as libc::c_int,
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(Error::last_os_error());
    }
    Ok(n as usize)
}

/// Positional gather write. Blocks until the kernel returns.
pub(crate) fn pwritev(fd: RawFd, bufs: &[&[u8]], offset: u64) -> Result<usize> {
    let iov: Vec<libc::iovec> = bufs
        .iter()
        .map(|b| libc::iovec {
            iov_base: b.as_ptr() as *mut libc::c_void,
            iov_len: b.len(),
        })
        .collect();
    // SAFETY: every iovec points into a live caller-provided buffer; the
    // kernel only reads through them for a write.
    let n = unsafe {
        libc::pwritev(
            fd,
            iov.as_ptr(),
            iov.len() as libc::c_int,
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(Error::last_os_error());
    }
    Ok(n as usize)
}

fn flock_for(offset: u64, length: u64, lock_type: libc::c_short) -> libc::flock {
    // SAFETY: flock is plain old data; zeroing then assigning the fields we
    // use keeps this portable across libc layouts with extra fields.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = lock_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = (offset & OFFSET_MASK) as libc::off_t;
    // Zero length means "to end of file", i.e. lock the whole file.
    fl.l_len = (length & OFFSET_MASK) as libc::off_t;
    fl
}

/// Acquire a byte-range lock on `fd`.
///
/// Returns `Ok(true)` if the lock was taken with process-wide POSIX
/// semantics (the caller should record byte-lock insanity), `Ok(false)` if
/// taken with per-description semantics. Contention on a non-blocking
/// attempt surfaces as the OS's `EAGAIN`/`EACCES` platform error.
pub(crate) fn lock_range(
    fd: RawFd,
    offset: u64,
    length: u64,
    exclusive: bool,
    block: bool,
) -> Result<bool> {
    // Whole-file locks outside Linux: flock() has sane per-description
    // ownership where fcntl() does not.
    #[cfg(not(target_os = "linux"))]
    if length == 0 {
        let mut op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        if !block {
            op |= libc::LOCK_NB;
        }
        // SAFETY: plain syscall on a caller-owned descriptor.
        if unsafe { libc::flock(fd, op) } != 0 {
            let err = io::Error::last_os_error();
            // flock reports contention as EWOULDBLOCK; normalise to EAGAIN.
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::Platform(io::Error::from_raw_os_error(libc::EAGAIN)));
            }
            return Err(Error::Platform(err));
        }
        return Ok(false);
    }

    let lock_type = if exclusive { libc::F_WRLCK } else { libc::F_RDLCK };
    let fl = flock_for(offset, length, lock_type as libc::c_short);

    #[cfg(target_os = "linux")]
    {
        let cmd = if block {
            libc::F_OFD_SETLKW
        } else {
            libc::F_OFD_SETLK
        };
        // SAFETY: fl is a valid flock for the duration of the call.
        if unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) } == 0 {
            return Ok(false);
        }
        let err = io::Error::last_os_error();
        // Pre-3.15 kernels do not know the OFD commands; anything else is a
        // real failure (including contention) and is reported as-is.
        if !matches!(
            err.raw_os_error(),
            Some(libc::EINVAL) | Some(libc::ENOTSUP)
        ) {
            return Err(Error::Platform(err));
        }
    }

    let cmd = if block { libc::F_SETLKW } else { libc::F_SETLK };
    // SAFETY: fl is a valid flock for the duration of the call.
    if unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) } == 0 {
        Ok(true)
    } else {
        Err(Error::last_os_error())
    }
}

/// Release a previously granted byte-range lock.
///
/// `insane` selects the process-wide command family when the matching lock
/// was taken that way.
pub(crate) fn unlock_range(fd: RawFd, offset: u64, length: u64, insane: bool) -> Result<()> {
    #[cfg(not(target_os = "linux"))]
    if length == 0 {
        // SAFETY: plain syscall on a caller-owned descriptor.
        if unsafe { libc::flock(fd, libc::LOCK_UN) } != 0 {
            return Err(Error::last_os_error());
        }
        return Ok(());
    }

    let fl = flock_for(offset, length, libc::F_UNLCK as libc::c_short);

    #[cfg(target_os = "linux")]
    let cmd = if insane { libc::F_SETLK } else { libc::F_OFD_SETLK };
    #[cfg(not(target_os = "linux"))]
    let cmd = {
        let _ = insane;
        libc::F_SETLK
    };

    // SAFETY: fl is a valid flock for the duration of the call.
    if unsafe { libc::fcntl(fd, cmd, &fl as *const libc::flock) } == 0 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}
