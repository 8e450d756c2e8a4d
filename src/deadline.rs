//! Deadlines for blocking operations
//!
//! Every blocking operation in this crate takes a [`Deadline`]: wait forever,
//! return immediately (a zero relative duration), wait a relative duration,
//! or wait until an absolute point in time.
//!
//! Relative deadlines are measured against the steady (monotonic) clock from
//! the moment the operation starts; absolute deadlines are compared against
//! the system (wall) clock. The distinction matters because the wall clock
//! can jump under clock correction while the monotonic clock cannot, so a
//! relative deadline must never be converted into a wall-clock point.

use std::time::{Duration, Instant, SystemTime};

/// A bound on how long a blocking operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    /// Wait until the operation completes, however long that takes
    #[default]
    Infinite,
    /// Wait at most this long, measured on the steady clock from the moment
    /// the operation starts. A zero duration means poll: try once and fail
    /// with a timeout if not immediately successful.
    Relative(Duration),
    /// Wait until this wall-clock point in time
    Absolute(SystemTime),
}

impl Deadline {
    /// A zero-duration deadline: try once, never wait
    pub const fn zero() -> Self {
        Deadline::Relative(Duration::ZERO)
    }

    /// True if this deadline never expires
    pub fn is_infinite(&self) -> bool {
        matches!(self, Deadline::Infinite)
    }

    /// True if this deadline allows no waiting at all
    pub fn is_zero(&self) -> bool {
        matches!(self, Deadline::Relative(d) if d.is_zero())
    }

    /// Start the clock on this deadline.
    ///
    /// Captures the steady-clock start point for relative deadlines; must be
    /// called exactly when the bounded operation begins.
    pub fn arm(&self) -> ArmedDeadline {
        ArmedDeadline {
            deadline: *self,
            began: Instant::now(),
        }
    }
}

impl From<Duration> for Deadline {
    fn from(d: Duration) -> Self {
        Deadline::Relative(d)
    }
}

impl From<SystemTime> for Deadline {
    fn from(t: SystemTime) -> Self {
        Deadline::Absolute(t)
    }
}

/// A [`Deadline`] bound to the start of a specific operation
#[derive(Debug, Clone, Copy)]
pub struct ArmedDeadline {
    deadline: Deadline,
    began: Instant,
}

impl ArmedDeadline {
    /// True if the deadline has elapsed
    pub fn expired(&self) -> bool {
        match self.deadline {
            Deadline::Infinite => false,
            Deadline::Relative(d) => self.began.elapsed() >= d,
            Deadline::Absolute(t) => SystemTime::now() >= t,
        }
    }

    /// The deadline this was armed from
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}
