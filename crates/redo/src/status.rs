//! Per-attempt status snapshots.

use crate::error::SharedError;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of a retry run at one attempt.
///
/// The operation sees the snapshot for its own attempt through
/// [`Context::status`](crate::Context::status), with `last_error` holding the
/// previous attempt's error. The observer set with
/// [`PolicyBuilder::each`](crate::PolicyBuilder::each) receives the same
/// snapshot after the attempt failed, with `last_error` holding that failure.
///
/// `Status::default()` is the zero value returned outside a retry run.
///
/// # Formatting
///
/// ```rust
/// use redo::Status;
/// use std::time::Duration;
///
/// let status = Status {
///     try_number: 2,
///     max_tries: 5,
///     last_error: None,
///     next_delay: Duration::from_millis(1500),
/// };
///
/// assert_eq!(status.to_string(), "attempt 2/5");
/// assert_eq!(format!("{status:#}"), "attempt 2/5 - next in 2s");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Status {
    /// 1-based attempt number; 0 outside a retry run.
    pub try_number: u32,
    /// Attempt bound; 0 when unbounded.
    pub max_tries: u32,
    /// Most recent attempt error, if any.
    pub last_error: Option<SharedError>,
    /// Delay that follows this attempt if it fails.
    pub next_delay: Duration,
}

impl Status {
    /// Whether this is the last attempt the run will make.
    pub fn is_last(&self) -> bool {
        self.max_tries > 0 && self.try_number >= self.max_tries
    }

    /// Approximate time of the next attempt, assuming this one just failed.
    pub fn next_at(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.next_delay).unwrap_or(now)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_tries == 0 {
            write!(f, "attempt {}", self.try_number)?;
        } else {
            write!(f, "attempt {}/{}", self.try_number, self.max_tries)?;
        }
        if f.alternate() {
            write!(f, " - next in {}", ShortDelay(self.next_delay))?;
        }
        Ok(())
    }
}

/// Delay rounded for humans: milliseconds under a second, whole seconds
/// otherwise, written as `1h1m1s`.
pub(crate) struct ShortDelay(pub(crate) Duration);

impl fmt::Display for ShortDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let delay = self.0;
        if delay < Duration::from_secs(1) {
            let millis = (delay.as_nanos() + 500_000) / 1_000_000;
            return if millis == 0 {
                write!(f, "0s")
            } else if millis >= 1000 {
                write!(f, "1s")
            } else {
                write!(f, "{}ms", millis)
            };
        }

        let mut secs = delay.as_secs();
        if delay.subsec_nanos() >= 500_000_000 {
            secs = secs.saturating_add(1);
        }
        let (hours, mins, secs) = (secs / 3600, secs / 60 % 60, secs % 60);
        if hours > 0 {
            write!(f, "{}h{}m{}s", hours, mins, secs)
        } else if mins > 0 {
            write!(f, "{}m{}s", mins, secs)
        } else {
            write!(f, "{}s", secs)
        }
    }
}
