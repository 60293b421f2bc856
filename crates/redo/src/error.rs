//! Error taxonomy for retry runs.
//!
//! An attempt reports a [`Failure`]; a run that gives up reports an
//! [`Error`]. The two are kept apart so that an operation can only ask to be
//! retried, halted, or declare its context cancelled, while the run alone
//! decides exhaustion.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased error, as exposed through [`Status`](crate::Status).
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Outcome of a single failed attempt.
///
/// Any `E` converts into [`Failure::Retry`], so `?` inside an operation
/// produces an ordinary retryable failure.
///
/// # Examples
///
/// ```rust
/// use redo::{halt, Failure};
///
/// fn check(code: u16) -> Result<(), Failure<std::io::Error>> {
///     if code == 404 {
///         return Err(halt(std::io::Error::other("not found")));
///     }
///     Err(std::io::Error::other("try again").into())
/// }
///
/// assert!(check(404).unwrap_err().is_halt());
/// assert!(!check(500).unwrap_err().is_halt());
/// ```
#[derive(Debug)]
pub enum Failure<E> {
    /// Retry after the next delay, unless the run decides otherwise.
    Retry(E),
    /// Stop the run now and return this error as halted.
    Halt(E),
    /// The operation observed cancellation of its context.
    Cancelled(Cancelled),
}

impl<E> Failure<E> {
    /// Whether the operation asked to stop the run.
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }

    /// Whether the operation reported cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Map the wrapped error, keeping the failure kind.
    pub fn map<F, O>(self, f: O) -> Failure<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::Retry(err) => Failure::Retry(f(err)),
            Self::Halt(err) => Failure::Halt(f(err)),
            Self::Cancelled(cancelled) => Failure::Cancelled(cancelled),
        }
    }
}

impl<E> From<E> for Failure<E> {
    fn from(err: E) -> Self {
        Self::Retry(err)
    }
}

/// Stop the current run immediately, returning `err` as halted.
///
/// ```rust,ignore
/// return Err(redo::halt(err));
/// ```
pub fn halt<E>(err: E) -> Failure<E> {
    Failure::Halt(err)
}

/// Why a context stopped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Cancelled {
    /// The context was cancelled without a cause.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The context was cancelled with a caller-supplied cause.
    #[error(transparent)]
    Cause(SharedError),
}

impl Cancelled {
    /// The caller-supplied cause, if any.
    pub fn supplied_cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Cause(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Terminal error of a retry run.
///
/// Exactly one kind is carried per run. Callers branch on the kind with
/// [`is_halted`](Error::is_halted), [`is_exhausted`](Error::is_exhausted)
/// and [`is_cancelled`](Error::is_cancelled) rather than on message text.
///
/// The display of `Halted` and `Exhausted` is that of the last attempt's
/// error, which is also returned by `source()`.
pub enum Error<E> {
    /// The run was stopped early by the operation or the halt predicate.
    Halted(Arc<E>),
    /// Every permitted attempt failed; holds the final attempt's error.
    Exhausted(Arc<E>),
    /// The controlling context was cancelled or its deadline passed.
    Cancelled(Cancelled),
}

impl<E> Error<E> {
    /// Whether the run was halted.
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted(_))
    }

    /// Whether the run used up its attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The last attempt's error, for halted and exhausted runs.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Halted(err) | Self::Exhausted(err) => Some(err.as_ref()),
            Self::Cancelled(_) => None,
        }
    }

    /// Take the last attempt's error, for halted and exhausted runs.
    pub fn into_last_error(self) -> Option<Arc<E>> {
        match self {
            Self::Halted(err) | Self::Exhausted(err) => Some(err),
            Self::Cancelled(_) => None,
        }
    }

    /// The cancellation, for cancelled runs.
    pub fn cancellation(&self) -> Option<&Cancelled> {
        match self {
            Self::Cancelled(cancelled) => Some(cancelled),
            _ => None,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted(err) => f.debug_tuple("Halted").field(err).finish(),
            Self::Exhausted(err) => f.debug_tuple("Exhausted").field(err).finish(),
            Self::Cancelled(cancelled) => f.debug_tuple("Cancelled").field(cancelled).finish(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted(err) | Self::Exhausted(err) => write!(f, "{}", err),
            Self::Cancelled(cancelled) => write!(f, "{}", cancelled),
        }
    }
}

impl<E> StdError for Error<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Halted(err) | Self::Exhausted(err) => Some(err.as_ref()),
            Self::Cancelled(cancelled) => cancelled.source(),
        }
    }
}

/// The refresh step failed while preparing the next attempt's input.
///
/// Carries both the refresh failure and the attempt error that triggered the
/// refresh.
#[derive(Debug)]
pub struct RefreshError<E, R> {
    refresh: R,
    retry: E,
}

impl<E, R> RefreshError<E, R> {
    pub(crate) fn new(refresh: R, retry: E) -> Self {
        Self { refresh, retry }
    }

    /// The error returned by the refresh step.
    pub fn refresh_error(&self) -> &R {
        &self.refresh
    }

    /// The attempt error that caused the refresh.
    pub fn retry_error(&self) -> &E {
        &self.retry
    }

    /// Split into `(refresh_error, retry_error)`.
    pub fn into_parts(self) -> (R, E) {
        (self.refresh, self.retry)
    }
}

impl<E: fmt::Display, R: fmt::Display> fmt::Display for RefreshError<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.refresh, self.retry)
    }
}

impl<E, R> StdError for RefreshError<E, R>
where
    E: StdError + 'static,
    R: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.refresh)
    }
}

/// Error of an attempt made through a refreshing adapter.
///
/// `source()` is the attempt's own error in both variants, so halt rules
/// that walk the source chain classify an attempt the same way whether or
/// not the refresh after it failed. The refresh failure is reached through
/// [`refresh_error`](AttemptError::refresh_error).
#[derive(Debug)]
pub enum AttemptError<E, R> {
    /// The attempt failed; the input was refreshed for the next one.
    Failed(E),
    /// The attempt failed and so did the refresh step.
    Refresh(RefreshError<E, R>),
}

impl<E, R> AttemptError<E, R> {
    /// The attempt's own error, whether or not the refresh failed.
    pub fn retry_error(&self) -> &E {
        match self {
            Self::Failed(err) => err,
            Self::Refresh(err) => err.retry_error(),
        }
    }

    /// The refresh failure, if the refresh step failed.
    pub fn refresh_error(&self) -> Option<&RefreshError<E, R>> {
        match self {
            Self::Refresh(err) => Some(err),
            Self::Failed(_) => None,
        }
    }
}

impl<E: fmt::Display, R: fmt::Display> fmt::Display for AttemptError<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "{}", err),
            Self::Refresh(err) => write!(f, "{}", err),
        }
    }
}

impl<E, R> StdError for AttemptError<E, R>
where
    E: StdError + 'static,
    R: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.retry_error())
    }
}
