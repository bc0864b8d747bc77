//! Clock and timing utilities for recordings.
//!
//! - [`FramePacer`] keeps a fixed capture cadence on a monotonic clock
//!   without accumulating drift from slow iterations or pauses.
//! - [`SessionId`] names every file that belongs to one recording.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Deadline accumulator for a fixed-rate loop.
///
/// Each tick advances the deadline by one period instead of sleeping a
/// fixed amount, so time spent doing work is absorbed into the wait.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next_deadline: Instant,
}

impl FramePacer {
    /// Create a pacer targeting `fps` ticks per second, anchored at `start`.
    pub fn new(fps: u32, start: Instant) -> Self {
        Self {
            period: Duration::from_nanos(1_000_000_000 / fps.max(1) as u64),
            next_deadline: start,
        }
    }

    /// Interval between ticks.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Advance to the next deadline and return how long to wait from `now`.
    ///
    /// Returns zero when the loop is behind. A loop that fell behind by a
    /// full period or more (a long pause, a stalled capture) is re-anchored
    /// at `now` rather than bursting to catch up.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        self.next_deadline += self.period;
        if self.next_deadline > now {
            return self.next_deadline - now;
        }
        if now - self.next_deadline >= self.period {
            self.next_deadline = now;
        }
        Duration::ZERO
    }
}

static LAST_SESSION_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Timestamp-derived prefix shared by every file of one recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new id from the current wall clock.
    ///
    /// Ids are strictly increasing within a process, even when two
    /// sessions start within the same millisecond.
    pub fn generate() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut assigned = now;
        let _ = LAST_SESSION_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            assigned = if now > last { now } else { last + 1 };
            Some(assigned)
        });
        Self::from_millis(assigned)
    }

    /// Build the id for a specific Unix timestamp in milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        match chrono::DateTime::from_timestamp_millis(millis) {
            Some(utc) => {
                let local = utc.with_timezone(&chrono::Local);
                Self(format!("rec_{}", local.format("%Y%m%d_%H%M%S_%3f")))
            }
            None => Self(format!("rec_{millis}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for an artifact of this session, e.g. `rec_..._seg001.mp4`.
    pub fn file_name(&self, suffix: &str, extension: &str) -> String {
        format!("{}{suffix}.{extension}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
