//! Decorrelated soft-exponential backoff.

use std::time::Duration;

/// Smoothing applied to the growth envelope. Larger values flatten the
/// curvature of the first few delays.
const SMOOTHING: f64 = 4.0;

/// Generator for the delay schedule of a single retry run.
///
/// Each call to [`Backoff::next_delay`] draws `t = i + U(0, 1)` for the
/// current iteration `i` and evaluates the growth envelope
///
/// ```text
/// raw    = 2^t * tanh(sqrt(4 * t))
/// sample = (raw - previous_raw) * initial_median
/// ```
///
/// Differencing against the previous unclamped envelope value decorrelates
/// successive delays while keeping their median close to a doubling
/// schedule. Samples above `max_delay` are clamped without advancing the
/// envelope, so the schedule continues from where it would have been.
///
/// A generator belongs to exactly one run and is never shared.
///
/// # Examples
///
/// ```rust
/// use redo::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), true);
///
/// assert_eq!(backoff.next_delay(), Duration::ZERO);
/// assert!(backoff.next_delay() <= Duration::from_secs(5));
/// ```
///
/// # Performance Characteristics
///
/// - **Memory**: O(1), no allocations
/// - **CPU**: O(1) per delay, one random draw plus a handful of float ops
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_median: Duration,
    max_delay: Duration,
    first_fast: bool,
    iteration: u64,
    previous: f64,
}

impl Backoff {
    /// Create a generator.
    ///
    /// `initial_median` scales the whole schedule. A zero `max_delay` leaves
    /// the schedule unbounded. With `first_fast` set, the first delay is zero
    /// and the rest of the schedule is unaffected.
    pub fn new(initial_median: Duration, max_delay: Duration, first_fast: bool) -> Self {
        Self {
            initial_median,
            max_delay,
            first_fast,
            iteration: 0,
            previous: 0.0,
        }
    }

    /// Number of delays produced so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Produce the next delay in the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.next_with_jitter(rand::random::<f64>())
    }

    /// Produce the next delay using `jitter` in `[0, 1)` as the uniform draw.
    pub(crate) fn next_with_jitter(&mut self, jitter: f64) -> Duration {
        if self.iteration == 0 && self.first_fast {
            self.iteration += 1;
            return Duration::ZERO;
        }

        let t = self.iteration as f64 + jitter;
        self.iteration += 1;

        // The envelope overflows to infinity eventually, and inf * 0 is NaN.
        if self.initial_median.is_zero() {
            return Duration::ZERO;
        }

        let raw = envelope(t);
        let sample = (raw - self.previous) * self.initial_median.as_secs_f64();

        if !self.max_delay.is_zero() && sample > self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        match Duration::try_from_secs_f64(sample) {
            Ok(delay) => {
                self.previous = raw;
                delay
            }
            // Beyond what a Duration can hold.
            Err(_) => Duration::MAX,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Unscaled growth envelope, increasing in `t`.
pub(crate) fn envelope(t: f64) -> f64 {
    2f64.powf(t) * (SMOOTHING * t).sqrt().tanh()
}
