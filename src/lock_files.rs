//! Many-entity mutual exclusion over a shared directory
//!
//! [`LockFiles`] acquires a set of named entities as an atomic group across
//! unrelated, uncoordinated processes (and machines, over a network
//! filesystem) with nothing but the filesystem as the coordination medium:
//! no shared memory, no central lock server. Each entity is backed by one
//! file in the configured directory, and holding an entity means holding a
//! single-byte range lock at offset = entity id on that file.
//!
//! The excellent compatibility is the only reason to use this algorithm; it
//! works almost anywhere, including networked filesystems where OS-level
//! blocking lock queues are unreliable or unsupported.
//!
//! # Deadlock avoidance
//!
//! A global lock order would need a sequencing authority the participants do
//! not share, so deadlock is avoided by randomisation instead: each pass
//! try-locks the entities in the current order, and on any failure rolls the
//! pass back, randomly permutes the order, yields, and retries. Randomised
//! reordering statistically breaks the symmetric retry cycles that cause
//! circular-wait livelock, at the cost of any fairness guarantee.
//!
//! # Caveats
//!
//! - No ability to sleep until a lock becomes free, so contending threads
//!   spin at up to 100% CPU.
//! - Sudden process exit with locks held can block other users for up to
//!   [`LOCK_STALENESS`]; after that the lock file is force-deleted by a
//!   waiter. A holder therefore must not retain a lock for longer than that
//!   window.
//! - Complexity grows steeply with the number of entities locked together
//!   under contention.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::file::{self, Creation, Mode};
use crate::handle::{Caching, HandleFlags};
use crate::io_handle::IoHandle;
use filetime::FileTime;
use rand::seq::SliceRandom;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// How long a lock file may go untouched before waiters treat its holder as
/// dead and force-delete it. A heuristic, not a consensus protocol.
pub const LOCK_STALENESS: Duration = Duration::from_secs(60);

/// A named lockable unit: a 64-bit id plus shared/exclusive mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    /// The entity's id; also the byte offset locked in its file
    pub value: u64,
    /// Whether the entity is wanted exclusively
    pub exclusive: bool,
}

impl Entity {
    /// An exclusively held entity
    pub fn exclusive(value: u64) -> Self {
        Entity {
            value,
            exclusive: true,
        }
    }

    /// A shared entity
    pub fn shared(value: u64) -> Self {
        Entity {
            value,
            exclusive: false,
        }
    }
}

/// Outcome of one acquisition pass over the entity list
enum PassOutcome {
    Acquired,
    /// A competitor held this entity; the pass was rolled back
    Contended(u64),
}

/// Rolls back the locks of a partially completed pass in reverse order on
/// every exit path, including deadline expiry and hard OS errors.
struct PassUndo<'a> {
    locked: Vec<(&'a IoHandle, u64)>,
    armed: bool,
}

impl Drop for PassUndo<'_> {
    fn drop(&mut self) {
        if self.armed {
            for (file, offset) in self.locked.iter().rev() {
                file.unlock(*offset, 1);
            }
        }
    }
}

/// Many-entity shared filesystem mutex backed by one lock file per entity
///
/// The directory is taken as given: it is not validated, created, or managed
/// here. Per-entity lock files (named as the 16-digit hex of the id) are
/// opened lazily during acquisition with create-if-needed disposition and
/// temporary caching, and stay open for reuse across acquisitions.
#[derive(Debug)]
pub struct LockFiles {
    path: PathBuf,
    files: Vec<(u64, IoHandle)>,
}

impl LockFiles {
    /// A mutex using the directory at `lockdir`
    pub fn new(lockdir: impl Into<PathBuf>) -> Self {
        LockFiles {
            path: lockdir.into(),
            files: Vec::new(),
        }
    }

    /// The directory being used for this mutex
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire every listed entity as a group.
    ///
    /// Entities may mix shared and exclusive modes. On success all of them
    /// are held simultaneously and stay held until the returned guard is
    /// dropped or explicitly unlocked. On any failure nothing is held.
    ///
    /// Contending acquirers spin (try-lock, roll back, reshuffle, yield)
    /// until they win a full pass or the deadline elapses; there is no
    /// fairness between them beyond eventual termination.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] when the deadline elapses first; any
    /// non-contention OS error (disk full, permission denied) aborts
    /// immediately without retry.
    pub fn lock(&mut self, entities: Vec<Entity>, d: Deadline) -> Result<EntitiesGuard<'_>> {
        let armed = d.arm();
        let mut entities = entities;
        for entity in &entities {
            self.ensure_file(entity.value)?;
        }
        let mut passes = 0u64;
        loop {
            match self.acquire_pass(&entities)? {
                PassOutcome::Acquired => break,
                PassOutcome::Contended(blocker) => {
                    passes += 1;
                    self.reclaim_if_stale(blocker)?;
                    if armed.expired() {
                        return Err(Error::TimedOut);
                    }
                    entities.shuffle(&mut rand::rng());
                    thread::yield_now();
                }
            }
        }
        if passes > 0 {
            tracing::debug!(
                "acquired {} entities in {} after {} contended passes",
                entities.len(),
                self.path.display(),
                passes
            );
        }
        self.touch(&entities);
        Ok(EntitiesGuard {
            mutex: Some(self),
            entities,
        })
    }

    /// [`lock`](LockFiles::lock) with a zero-duration deadline
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] immediately if any entity is held elsewhere, with
    /// zero residual locks held afterwards.
    pub fn try_lock(&mut self, entities: Vec<Entity>) -> Result<EntitiesGuard<'_>> {
        self.lock(entities, Deadline::zero())
    }

    /// Release the byte lock backing each listed entity.
    ///
    /// Normally invoked through [`EntitiesGuard`]. The per-entity files stay
    /// open for the next acquisition.
    pub fn unlock(&mut self, entities: &[Entity]) {
        for entity in entities {
            if let Some((_, file)) = self.files.iter().find(|(v, _)| *v == entity.value) {
                file.unlock(entity.value, 1);
            }
        }
    }

    fn entity_path(&self, value: u64) -> PathBuf {
        self.path.join(format!("{value:016x}"))
    }

    fn ensure_file(&mut self, value: u64) -> Result<()> {
        if self.files.iter().any(|(v, _)| *v == value) {
            return Ok(());
        }
        let file = file::open(
            self.entity_path(value),
            Mode::Write,
            Creation::IfNeeded,
            Caching::Temporary,
            HandleFlags::empty(),
        )?;
        self.files.push((value, file));
        Ok(())
    }

    /// One try-lock pass over the entities in their current order.
    ///
    /// All-or-nothing: either every entity's byte lock is taken, or whatever
    /// was taken is rolled back in reverse before returning. Passes perform
    /// only non-blocking lock attempts, so the overall deadline is enforced
    /// between passes by the caller.
    fn acquire_pass(&self, entities: &[Entity]) -> Result<PassOutcome> {
        let mut undo = PassUndo {
            locked: Vec::with_capacity(entities.len()),
            armed: true,
        };
        for entity in entities {
            let file = match self.files.iter().find(|(v, _)| *v == entity.value) {
                Some((_, file)) => file,
                // Every entity's file was opened before the pass started; a
                // missing entry means the lock file vanished underneath us.
                None => {
                    return Err(Error::Platform(io::Error::from_raw_os_error(libc::ENOENT)))
                }
            };
            match file.try_lock(entity.value, 1, entity.exclusive) {
                Ok(mut guard) => {
                    // Held manually for the pass; the undo list releases it
                    // if the pass fails.
                    guard.release();
                    undo.locked.push((file, entity.value));
                }
                Err(Error::TimedOut) => return Ok(PassOutcome::Contended(entity.value)),
                Err(e) => return Err(e),
            }
        }
        undo.armed = false;
        Ok(PassOutcome::Acquired)
    }

    /// Force-delete the entity's lock file if its holder looks dead.
    ///
    /// Staleness is judged by mtime: winners touch their files on every
    /// acquisition, so a file untouched for [`LOCK_STALENESS`] belongs to a
    /// holder that crashed or violated the hold-time contract.
    fn reclaim_if_stale(&mut self, value: u64) -> Result<()> {
        let path = self.entity_path(value);
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return Ok(()),
        };
        let stale = modified
            .elapsed()
            .map(|age| age >= LOCK_STALENESS)
            .unwrap_or(false);
        if !stale {
            return Ok(());
        }
        tracing::warn!(
            "reclaiming stale lock file {} (holder presumed dead)",
            path.display()
        );
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!("stale lock file removal failed: {}", e);
        }
        // Reopen so the next pass locks the replacement inode, not the
        // deleted one.
        self.files.retain(|(v, _)| *v != value);
        self.ensure_file(value)
    }

    /// Refresh the mtime heartbeat on every held entity's file.
    fn touch(&self, entities: &[Entity]) {
        let now = FileTime::now();
        for entity in entities {
            let path = self.entity_path(entity.value);
            if let Err(e) = filetime::set_file_mtime(&path, now) {
                tracing::debug!("mtime touch of {} failed: {}", path.display(), e);
            }
        }
    }
}

/// RAII holder of an acquired entity group
///
/// Destruction releases every entity; [`unlock`] releases early and
/// [`release`] detaches without releasing.
///
/// [`unlock`]: EntitiesGuard::unlock
/// [`release`]: EntitiesGuard::release
#[derive(Debug)]
pub struct EntitiesGuard<'a> {
    mutex: Option<&'a mut LockFiles>,
    entities: Vec<Entity>,
}

impl EntitiesGuard<'_> {
    /// The entities held by this guard
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Release every held entity immediately
    pub fn unlock(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.unlock(&self.entities);
            self.entities.clear();
        }
    }

    /// Detach from the held state without releasing anything.
    ///
    /// The caller becomes responsible for calling [`LockFiles::unlock`].
    pub fn release(&mut self) {
        self.mutex = None;
        self.entities.clear();
    }
}

impl Drop for EntitiesGuard<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_constructors() {
        let e = Entity::exclusive(42);
        assert_eq!(e.value, 42);
        assert!(e.exclusive);
        let s = Entity::shared(42);
        assert!(!s.exclusive);
        assert_eq!(e.value, s.value);
    }

    #[test]
    fn entity_paths_are_hex_named() {
        let mutex = LockFiles::new("/tmp/locks");
        assert_eq!(
            mutex.entity_path(0xdead_beef),
            Path::new("/tmp/locks/00000000deadbeef")
        );
    }

    #[test]
    fn directory_is_taken_as_given() {
        // No validation, no creation.
        let mutex = LockFiles::new("/nonexistent/definitely/not/there");
        assert_eq!(
            mutex.path(),
            Path::new("/nonexistent/definitely/not/there")
        );
    }
}
