//! Integration tests for the shared filesystem mutex
//!
//! Competing acquirers are modelled as separate `LockFiles` instances over
//! one directory; each instance has its own descriptors, so conflict
//! detection needs open-file-description lock ownership and the contention
//! cases are Linux-only.

#![cfg(target_os = "linux")]

use fs_handles::{Deadline, Entity, Error, LockFiles};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// An uncontended group acquires immediately, even with a zero deadline
#[test]
fn test_uncontended_group_acquires() {
    let dir = TempDir::new().expect("scratch dir");
    let mut mutex = LockFiles::new(dir.path());

    let guard = mutex
        .try_lock(vec![Entity::exclusive(1), Entity::exclusive(2)])
        .expect("uncontended group");
    assert_eq!(guard.entities().len(), 2);
    drop(guard);

    // Lock files were created inside the directory, named after the ids.
    assert!(dir.path().join("0000000000000001").exists());
    assert!(dir.path().join("0000000000000002").exists());
}

/// Shared holders of one entity coexist; an exclusive request does not
#[test]
fn test_shared_and_exclusive_modes() {
    let dir = TempDir::new().expect("scratch dir");
    let mut first = LockFiles::new(dir.path());
    let mut second = LockFiles::new(dir.path());
    let mut third = LockFiles::new(dir.path());

    let _a = first
        .try_lock(vec![Entity::shared(7)])
        .expect("first shared holder");
    let _b = second
        .try_lock(vec![Entity::shared(7)])
        .expect("second shared holder");

    let refused = third.try_lock(vec![Entity::exclusive(7)]);
    assert!(matches!(refused, Err(Error::TimedOut)));
}

/// A zero deadline fails fast and leaves zero residual locks behind
#[test]
fn test_zero_deadline_rolls_back_partial_acquisition() {
    let dir = TempDir::new().expect("scratch dir");
    let mut holder = LockFiles::new(dir.path());
    let mut waiter = LockFiles::new(dir.path());
    let mut prober = LockFiles::new(dir.path());

    let held = holder
        .try_lock(vec![Entity::exclusive(2)])
        .expect("holder");

    // The waiter can take entity 1 but must give it back when 2 refuses.
    let refused = waiter.try_lock(vec![Entity::exclusive(1), Entity::exclusive(2)]);
    assert!(matches!(refused, Err(Error::TimedOut)));
    drop(refused);

    prober
        .try_lock(vec![Entity::exclusive(1)])
        .expect("entity 1 must carry no residual lock")
        .unlock();

    // Once the holder lets go, the full group is acquirable.
    drop(held);
    waiter
        .try_lock(vec![Entity::exclusive(1), Entity::exclusive(2)])
        .expect("group after holder released");
}

/// Explicit guard unlock releases the group for the next acquirer
#[test]
fn test_guard_unlock_releases_group() {
    let dir = TempDir::new().expect("scratch dir");
    let mut first = LockFiles::new(dir.path());
    let mut second = LockFiles::new(dir.path());

    let mut guard = first
        .try_lock(vec![Entity::exclusive(3), Entity::shared(4)])
        .expect("group");
    guard.unlock();
    assert!(guard.entities().is_empty());
    drop(guard);

    second
        .try_lock(vec![Entity::exclusive(3), Entity::exclusive(4)])
        .expect("group must be free after unlock");
}

/// Reversed acquisition orders never deadlock and exclude each other
///
/// The classic circular-wait shape: one side asks for {A, B}, the other for
/// {B, A}. Randomised rollback-and-reshuffle must let exactly one win each
/// round within a bounded number of retries.
#[test]
fn test_reversed_orders_terminate_with_mutual_exclusion() {
    const ROUNDS: usize = 50;
    let dir = TempDir::new().expect("scratch dir");
    let in_critical = Arc::new(AtomicU32::new(0));

    let mut workers = Vec::new();
    for order in [[1u64, 2u64], [2u64, 1u64]] {
        let dir = dir.path().to_path_buf();
        let in_critical = Arc::clone(&in_critical);
        workers.push(thread::spawn(move || {
            let mut mutex = LockFiles::new(dir);
            for _ in 0..ROUNDS {
                let entities = order.iter().map(|&v| Entity::exclusive(v)).collect();
                // Bounded so a livelock fails the test instead of hanging it.
                let guard = mutex
                    .lock(entities, Deadline::from(Duration::from_secs(60)))
                    .expect("acquisition must terminate");
                let active = in_critical.fetch_add(1, Ordering::SeqCst);
                assert_eq!(active, 0, "two winners inside the critical section");
                thread::yield_now();
                in_critical.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

/// A lock file untouched past the staleness window is reclaimed by waiters
#[test]
fn test_stale_lock_file_is_reclaimed() {
    let dir = TempDir::new().expect("scratch dir");
    let mut dead_holder = LockFiles::new(dir.path());
    let mut waiter = LockFiles::new(dir.path());

    let _held = dead_holder
        .try_lock(vec![Entity::exclusive(9)])
        .expect("holder");

    // Age the lock file past the staleness window, as if its owner died a
    // while ago without releasing.
    let path = dir.path().join("0000000000000009");
    let stale = filetime::FileTime::from_unix_time(
        filetime::FileTime::now().unix_seconds() - 120,
        0,
    );
    filetime::set_file_mtime(&path, stale).expect("aging the lock file");

    // The first attempt hits the stale holder, force-deletes its file, and
    // still reports the timeout for this try.
    let refused = waiter.try_lock(vec![Entity::exclusive(9)]);
    assert!(matches!(refused, Err(Error::TimedOut)));
    drop(refused);

    // The replacement file is fresh and lockable.
    waiter
        .try_lock(vec![Entity::exclusive(9)])
        .expect("entity must be acquirable after reclamation");
}
