//! Retry policy: schedule, attempt bound, halting rules and observer.

use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default initial median delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default cap on a single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20 * 60);

/// Default number of attempts.
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Predicate deciding whether an attempt error should stop the run.
pub type HaltFn = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Observer called after every failed attempt.
pub type EachFn = Arc<dyn Fn(&Status) + Send + Sync>;

/// Resolved retry settings.
///
/// A `Policy` is immutable once built and cheap to clone, so one policy can
/// be shared by many runs.
///
/// # Examples
///
/// ```rust
/// use redo::Policy;
/// use std::time::Duration;
///
/// // Defaults: 1s initial delay, 20m cap, 10 tries
/// let policy = Policy::default();
/// assert_eq!(policy.max_tries(), 10);
///
/// let policy = Policy::builder()
///     .initial_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(30))
///     .max_tries(5)
///     .first_fast(true)
///     .halt_on::<std::num::ParseIntError>()
///     .build();
/// assert_eq!(policy.max_delay(), Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct Policy {
    initial_delay: Duration,
    max_delay: Duration,
    max_tries: u32,
    first_fast: bool,
    halt: Option<HaltFn>,
    each: Option<EachFn>,
    cancellation_cause: bool,
}

impl Policy {
    /// Create a new builder for configuring a policy.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Initial median delay, scaling the schedule.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap on any single delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Attempt bound; 0 when unbounded.
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Whether the first retry happens without delay.
    pub fn first_fast(&self) -> bool {
        self.first_fast
    }

    /// Whether a cancelled run returns the context's cause rather than its
    /// plain cancellation.
    pub fn cancellation_cause(&self) -> bool {
        self.cancellation_cause
    }

    /// Whether the configured halt predicate matches `err`.
    pub fn halts(&self, err: &(dyn StdError + 'static)) -> bool {
        self.halt.as_ref().is_some_and(|halt| halt(err))
    }

    /// Notify the observer, if any.
    pub(crate) fn observe(&self, status: &Status) {
        if let Some(each) = &self.each {
            each(status);
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        PolicyBuilder::default().build()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("max_tries", &self.max_tries)
            .field("first_fast", &self.first_fast)
            .field("halt", &self.halt.as_ref().map(|_| "<fn>"))
            .field("each", &self.each.as_ref().map(|_| "<fn>"))
            .field("cancellation_cause", &self.cancellation_cause)
            .finish()
    }
}

/// Builder for [`Policy`].
///
/// Every setter overrides what came before it, including values applied
/// wholesale through [`policy`](PolicyBuilder::policy).
#[derive(Clone, Default)]
pub struct PolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    max_tries: Option<u32>,
    first_fast: bool,
    halt: Option<HaltFn>,
    each: Option<EachFn>,
    cancellation_cause: Option<bool>,
}

impl PolicyBuilder {
    /// Set the initial median delay, which scales the rest of the schedule.
    ///
    /// Default: 1s. A zero value also resolves to the default.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Cap every generated delay.
    ///
    /// Default: 20 minutes or the initial delay, whichever is greater. A zero
    /// value also resolves to the default.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Bound the number of attempts. Zero retries until halted or cancelled.
    ///
    /// Default: 10
    pub fn max_tries(mut self, tries: u32) -> Self {
        self.max_tries = Some(tries);
        self
    }

    /// Retry until halted or cancelled.
    pub fn unbounded(self) -> Self {
        self.max_tries(0)
    }

    /// Make the first retry immediately, without delay.
    ///
    /// Default: false
    pub fn first_fast(mut self, first_fast: bool) -> Self {
        self.first_fast = first_fast;
        self
    }

    /// Halt the run when `predicate` returns true for an attempt error.
    ///
    /// Cancellation of the run's context always stops the run, whatever the
    /// predicate says.
    pub fn halt_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.halt = Some(Arc::new(predicate));
        self
    }

    /// Halt the run when the attempt error, or any error in its source chain,
    /// is a `T`.
    pub fn halt_on<T>(self) -> Self
    where
        T: StdError + 'static,
    {
        self.halt_if(|err| find_in_chain::<T>(err).is_some())
    }

    /// Halt the run when the attempt error, or any error in its source chain,
    /// is a `T` matching `predicate`.
    pub fn halt_if_matches<T, F>(self, predicate: F) -> Self
    where
        T: StdError + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.halt_if(move |err| find_in_chain::<T>(err).is_some_and(&predicate))
    }

    /// Call `observer` after every failed attempt, with the attempt's status.
    ///
    /// The observer runs synchronously on the retry path and cannot change
    /// the outcome. Panics inside it are not caught.
    pub fn each<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        self.each = Some(Arc::new(observer));
        self
    }

    /// Return the context's cancellation cause from cancelled runs.
    ///
    /// Default: true. When disabled, cancelled runs return the plain
    /// cancellation (`Canceled` or `DeadlineExceeded`).
    pub fn cancellation_cause(mut self, enabled: bool) -> Self {
        self.cancellation_cause = Some(enabled);
        self
    }

    /// Apply every setting of a pre-built policy.
    pub fn policy(mut self, policy: &Policy) -> Self {
        self.initial_delay = Some(policy.initial_delay);
        self.max_delay = Some(policy.max_delay);
        self.max_tries = Some(policy.max_tries);
        self.first_fast = policy.first_fast;
        self.halt = policy.halt.clone();
        self.each = policy.each.clone();
        self.cancellation_cause = Some(policy.cancellation_cause);
        self
    }

    /// Build the policy, resolving unset values to defaults.
    pub fn build(self) -> Policy {
        let initial_delay = self
            .initial_delay
            .filter(|delay| !delay.is_zero())
            .unwrap_or(DEFAULT_INITIAL_DELAY);
        let max_delay = self
            .max_delay
            .filter(|delay| !delay.is_zero())
            .unwrap_or_else(|| initial_delay.max(DEFAULT_MAX_DELAY));

        Policy {
            initial_delay,
            max_delay,
            max_tries: self.max_tries.unwrap_or(DEFAULT_MAX_TRIES),
            first_fast: self.first_fast,
            halt: self.halt,
            each: self.each,
            cancellation_cause: self.cancellation_cause.unwrap_or(true),
        }
    }
}

impl fmt::Debug for PolicyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyBuilder")
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("max_tries", &self.max_tries)
            .field("first_fast", &self.first_fast)
            .field("halt", &self.halt.as_ref().map(|_| "<fn>"))
            .field("each", &self.each.as_ref().map(|_| "<fn>"))
            .field("cancellation_cause", &self.cancellation_cause)
            .finish()
    }
}

fn find_in_chain<'a, T>(err: &'a (dyn StdError + 'static)) -> Option<&'a T>
where
    T: StdError + 'static,
{
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        current = err.source();
    }
    None
}

/// Serializable form of a policy, for configuration files.
///
/// Callbacks cannot be expressed here; add them to the builder produced by
/// `PolicyBuilder::from(config)`.
///
/// # Examples
///
/// ```rust
/// use redo::{Policy, PolicyBuilder, PolicyConfig};
///
/// let config: PolicyConfig = serde_json::from_str(
///     r#"{ "initial_delay_ms": 250, "max_tries": 4, "first_fast": true }"#,
/// ).unwrap();
///
/// let policy: Policy = PolicyBuilder::from(config).build();
/// assert_eq!(policy.max_tries(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Initial median delay in milliseconds; unset or zero uses the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    /// Delay cap in milliseconds; unset or zero uses the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Attempt bound; unset uses the default, zero is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<u32>,
    /// Make the first retry immediately.
    pub first_fast: bool,
    /// Return the context's cancellation cause from cancelled runs.
    pub cancellation_cause: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: None,
            max_delay_ms: None,
            max_tries: None,
            first_fast: false,
            cancellation_cause: true,
        }
    }
}

impl From<PolicyConfig> for PolicyBuilder {
    fn from(config: PolicyConfig) -> Self {
        let mut builder = PolicyBuilder::default()
            .first_fast(config.first_fast)
            .cancellation_cause(config.cancellation_cause);
        if let Some(ms) = config.initial_delay_ms {
            builder = builder.initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = config.max_delay_ms {
            builder = builder.max_delay(Duration::from_millis(ms));
        }
        if let Some(tries) = config.max_tries {
            builder = builder.max_tries(tries);
        }
        builder
    }
}

/// Delays are rounded up to whole milliseconds, so a sub-millisecond delay
/// becomes 1ms rather than zero, which would resolve back to the default.
impl From<&Policy> for PolicyConfig {
    fn from(policy: &Policy) -> Self {
        Self {
            initial_delay_ms: Some(ceil_millis(policy.initial_delay)),
            max_delay_ms: Some(ceil_millis(policy.max_delay)),
            max_tries: Some(policy.max_tries),
            first_fast: policy.first_fast,
            cancellation_cause: policy.cancellation_cause,
        }
    }
}

fn ceil_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct RequestError(#[source] io::Error);

    #[test]
    fn test_builder_defaults() {
        let policy = Policy::builder().build();

        assert_eq!(policy.initial_delay(), DEFAULT_INITIAL_DELAY);
        assert_eq!(policy.max_delay(), DEFAULT_MAX_DELAY);
        assert_eq!(policy.max_tries(), DEFAULT_MAX_TRIES);
        assert!(!policy.first_fast());
        assert!(policy.cancellation_cause());
        assert!(!policy.halts(&io::Error::other("any")));
    }

    #[test]
    fn test_zero_values_resolve_to_defaults() {
        let policy = Policy::builder()
            .initial_delay(Duration::ZERO)
            .max_delay(Duration::ZERO)
            .build();

        assert_eq!(policy.initial_delay(), DEFAULT_INITIAL_DELAY);
        assert_eq!(policy.max_delay(), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_max_delay_follows_large_initial_delay() {
        let policy = Policy::builder()
            .initial_delay(Duration::from_secs(3600))
            .build();

        assert_eq!(policy.max_delay(), Duration::from_secs(3600));
    }

    #[test]
    fn test_unbounded() {
        assert_eq!(Policy::builder().unbounded().build().max_tries(), 0);
        assert_eq!(Policy::builder().max_tries(0).build().max_tries(), 0);
    }

    #[test]
    fn test_later_values_override() {
        let base = Policy::builder()
            .max_tries(3)
            .first_fast(true)
            .cancellation_cause(false)
            .build();

        let policy = Policy::builder()
            .max_tries(7)
            .policy(&base)
            .initial_delay(Duration::from_millis(5))
            .build();

        assert_eq!(policy.max_tries(), 3);
        assert!(policy.first_fast());
        assert!(!policy.cancellation_cause());
        assert_eq!(policy.initial_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_halt_on_walks_source_chain() {
        let policy = Policy::builder().halt_on::<io::Error>().build();

        assert!(policy.halts(&io::Error::other("direct")));
        assert!(policy.halts(&RequestError(io::Error::other("nested"))));
        assert!(!policy.halts(&std::fmt::Error));
    }

    #[test]
    fn test_halt_if_matches() {
        let policy = Policy::builder()
            .halt_if_matches(|err: &io::Error| err.kind() == io::ErrorKind::PermissionDenied)
            .build();

        assert!(policy.halts(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!policy.halts(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_observer_is_called() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = Policy::builder()
            .each(move |status| {
                counter.fetch_add(status.try_number, Ordering::SeqCst);
            })
            .build();

        policy.observe(&Status {
            try_number: 2,
            ..Status::default()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_config_from_toml() {
        let config: PolicyConfig = toml::from_str(
            r#"
            initial_delay_ms = 50
            max_delay_ms = 2000
            max_tries = 0
            cancellation_cause = false
            "#,
        )
        .expect("valid config");

        let policy = PolicyBuilder::from(config).build();
        assert_eq!(policy.initial_delay(), Duration::from_millis(50));
        assert_eq!(policy.max_delay(), Duration::from_secs(2));
        assert_eq!(policy.max_tries(), 0);
        assert!(!policy.first_fast());
        assert!(!policy.cancellation_cause());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: PolicyConfig = serde_json::from_str("{}").expect("valid config");
        assert_eq!(config, PolicyConfig::default());

        let policy = PolicyBuilder::from(config).build();
        assert_eq!(policy.max_tries(), DEFAULT_MAX_TRIES);
        assert!(policy.cancellation_cause());
    }

    #[test]
    fn test_config_round_trips_resolved_policy() {
        let policy = Policy::builder().max_tries(4).first_fast(true).build();
        let config = PolicyConfig::from(&policy);

        let json = serde_json::to_string(&config).expect("serializable");
        let back: PolicyConfig = serde_json::from_str(&json).expect("valid config");
        let rebuilt = PolicyBuilder::from(back).build();

        assert_eq!(rebuilt.max_tries(), 4);
        assert!(rebuilt.first_fast());
        assert_eq!(rebuilt.max_delay(), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_config_keeps_sub_millisecond_delays_non_zero() {
        let policy = Policy::builder()
            .initial_delay(Duration::from_micros(10))
            .max_delay(Duration::from_millis(10))
            .build();

        let config = PolicyConfig::from(&policy);
        assert_eq!(config.initial_delay_ms, Some(1));
        assert_eq!(config.max_delay_ms, Some(10));

        let rebuilt = PolicyBuilder::from(config).build();
        assert_eq!(rebuilt.initial_delay(), Duration::from_millis(1));
        assert_eq!(rebuilt.max_delay(), Duration::from_millis(10));
    }
}
