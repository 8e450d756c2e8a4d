//! Integration tests for handle lifecycle and deadline-bounded i/o
//!
//! These exercise real files in a scratch directory: scatter/gather round
//! trips, the deadline contract on synchronous file i/o, and the handle
//! mutation operations (append toggle, caching transitions, duplication).

use fs_handles::{
    open, Caching, Creation, Deadline, Error, HandleFlags, IoRequest, Mode,
};
use std::time::Duration;
use tempfile::TempDir;

fn scratch() -> TempDir {
    TempDir::new().expect("failed to create scratch directory")
}

/// Bytes written with a gather list come back through a scatter list
#[test]
fn test_scatter_gather_round_trip() {
    let dir = scratch();
    let file = open(
        dir.path().join("round_trip"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    let written = file
        .write(IoRequest::new(vec![&b"AB"[..]], 0), Deadline::Infinite)
        .expect("write failed");
    assert_eq!(written.bytes_transferred(), 2);

    let mut buf = [0u8; 2];
    let read = file
        .read(IoRequest::new(vec![&mut buf[..]], 0), Deadline::Infinite)
        .expect("read failed");
    assert_eq!(read.bytes_transferred(), 2);
    assert_eq!(&buf, b"AB");
}

/// Multiple gather buffers land contiguously and scatter back per entry
#[test]
fn test_multi_buffer_gather_and_scatter() {
    let dir = scratch();
    let file = open(
        dir.path().join("vectors"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    let written = file
        .write(
            IoRequest::new(vec![&b"hello "[..], &b"world"[..]], 0),
            Deadline::Infinite,
        )
        .expect("write failed");
    assert_eq!(written.bytes_transferred(), 11);

    let mut first = [0u8; 6];
    let mut second = [0u8; 5];
    let read = file
        .read(
            IoRequest::new(vec![&mut first[..], &mut second[..]], 0),
            Deadline::Infinite,
        )
        .expect("read failed");
    assert_eq!(read.bytes_transferred(), 11);
    assert_eq!(&first, b"hello ");
    assert_eq!(&second, b"world");
}

/// A short read truncates the returned buffers to the bytes transferred
#[test]
fn test_short_read_truncates_result_buffers() {
    let dir = scratch();
    let file = open(
        dir.path().join("short"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");
    file.write_at(0, b"xy", Deadline::Infinite).expect("write failed");

    let mut a = [0u8; 3];
    let mut b = [0u8; 3];
    let read = file
        .read(
            IoRequest::new(vec![&mut a[..], &mut b[..]], 0),
            Deadline::Infinite,
        )
        .expect("read failed");
    assert_eq!(read.bytes_transferred(), 2);
    let buffers = read.buffers();
    assert_eq!(buffers[0], b"xy");
    assert!(buffers[1].is_empty());
}

/// Synchronous regular-file i/o cannot honour a finite deadline
#[test]
fn test_finite_deadline_on_regular_file_is_not_supported() {
    let dir = scratch();
    let file = open(
        dir.path().join("deadline"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    let mut buf = [0u8; 2];
    let err = file
        .read_at(0, &mut buf, Deadline::from(Duration::from_millis(5)))
        .expect_err("finite deadline must be refused");
    assert!(matches!(err, Error::NotSupported));

    let err = file
        .write_at(0, b"no", Deadline::zero())
        .expect_err("zero deadline must be refused");
    assert!(matches!(err, Error::NotSupported));
}

/// Opened handles report the capabilities they were opened with
#[test]
fn test_capability_queries_reflect_open_configuration() {
    let dir = scratch();
    let file = open(
        dir.path().join("caps"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    assert!(file.is_readable());
    assert!(file.is_writable());
    assert!(file.is_regular());
    assert!(file.is_seekable());
    assert!(!file.is_directory());
    assert!(!file.is_append_only());
    assert!(!file.requires_aligned_io());
    assert_eq!(file.path(), Some(dir.path().join("caps").as_path()));
}

/// Durability queries follow the caching mode of the open, not the platform
#[test]
fn test_durability_queries_per_caching_mode() {
    let dir = scratch();
    let synced = open(
        dir.path().join("synced"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::Reads,
        HandleFlags::empty(),
    )
    .expect("open with O_SYNC failed");
    assert!(synced.are_writes_durable());
    assert!(synced.are_safety_fsyncs_issued());
    assert!(synced.are_reads_from_cache());

    let cached = open(
        dir.path().join("cached"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::DISABLE_SAFETY_FSYNCS,
    )
    .expect("open failed");
    assert!(!cached.are_writes_durable());
    assert!(!cached.are_safety_fsyncs_issued());
}

/// Append-only is toggled without disturbing the other dispositions
///
/// Linux-only: only there does positional write respect `O_APPEND`, which is
/// what makes the append observable through `write_at`.
#[cfg(target_os = "linux")]
#[test]
fn test_set_append_only_round_trip() {
    let dir = scratch();
    let mut file = open(
        dir.path().join("append"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    file.set_append_only(true).expect("enabling append failed");
    assert!(file.is_append_only());
    assert!(file.is_writable());

    file.write_at(0, b"start", Deadline::Infinite).expect("write failed");
    file.write_at(0, b"-tail", Deadline::Infinite).expect("write failed");

    file.set_append_only(false).expect("disabling append failed");
    assert!(!file.is_append_only());

    // Both writes appended despite the zero offsets.
    let mut buf = [0u8; 10];
    let n = file
        .read_at(0, &mut buf, Deadline::Infinite)
        .expect("read failed");
    assert_eq!(&buf[..n], b"start-tail");
}

/// Caching transitions the platform cannot perform are refused
#[test]
fn test_set_kernel_caching_transitions() {
    let dir = scratch();
    let mut file = open(
        dir.path().join("caching"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    // Same sync level: allowed.
    file.set_kernel_caching(Caching::Temporary)
        .expect("All -> Temporary should be possible");
    assert_eq!(file.kernel_caching(), Caching::Temporary);

    // POSIX cannot add O_SYNC after open.
    let err = file
        .set_kernel_caching(Caching::Reads)
        .expect_err("sync level change must be refused");
    assert!(matches!(err, Error::NotSupported));
    assert_eq!(file.kernel_caching(), Caching::Temporary);
}

/// Duplicated handles share the open file description
#[test]
fn test_duplicate_is_an_explicit_deep_copy() {
    let dir = scratch();
    let file = open(
        dir.path().join("dup"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");
    let copy = file.duplicate().expect("duplicate failed");
    assert_ne!(copy.native_handle().fd, file.native_handle().fd);
    assert_eq!(copy.kernel_caching(), file.kernel_caching());

    // Writes through the copy are visible through the original.
    let copy = fs_handles::IoHandle::from(copy);
    copy.write_at(0, b"via copy", Deadline::Infinite)
        .expect("write through copy failed");
    let mut buf = [0u8; 8];
    file.read_at(0, &mut buf, Deadline::Infinite).expect("read failed");
    assert_eq!(&buf, b"via copy");
}

/// Close is idempotent and resets caching and flags to their defaults
#[test]
fn test_close_is_idempotent_and_resets_state() {
    let dir = scratch();
    let mut file = open(
        dir.path().join("close"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::DISABLE_SAFETY_FSYNCS,
    )
    .expect("open failed");

    file.close().expect("first close failed");
    assert!(!file.native_handle().is_valid());
    assert_eq!(file.kernel_caching(), Caching::default());
    assert_eq!(file.flags(), HandleFlags::default());
    file.close().expect("second close must be a no-op");
}

/// Release detaches ownership; the caller closes the raw descriptor
#[test]
fn test_release_detaches_without_closing() {
    let dir = scratch();
    let mut file = open(
        dir.path().join("release"),
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::All,
        HandleFlags::empty(),
    )
    .expect("open failed");

    let native = file.release();
    assert!(native.is_valid());
    assert!(!file.native_handle().is_valid());
    drop(file);

    // The descriptor survived the handle's drop; it is ours to close now.
    let rc = unsafe { libc::close(native.fd) };
    assert_eq!(rc, 0, "descriptor was already closed");
}

/// Unlink-on-first-close removes the file when the handle closes
#[test]
fn test_unlink_on_first_close() {
    let dir = scratch();
    let path = dir.path().join("ephemeral");
    let mut file = open(
        &path,
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::Temporary,
        HandleFlags::UNLINK_ON_FIRST_CLOSE,
    )
    .expect("open failed");
    assert!(path.exists());
    file.close().expect("close failed");
    assert!(!path.exists());
}
