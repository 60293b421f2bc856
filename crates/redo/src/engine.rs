//! The retry loop.

use crate::backoff::Backoff;
use crate::classify::{self, Verdict};
use crate::context::{Context, FAR_FUTURE};
use crate::error::{Error, Failure, SharedError};
use crate::policy::Policy;
use crate::status::Status;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

/// An operation that can be attempted repeatedly.
///
/// Closures are adapted through [`Retrier::run`] and friends; implement this
/// trait directly when an operation keeps state between attempts.
///
/// # Examples
///
/// ```rust
/// use redo::{Context, Failure, Operation, Retrier};
///
/// struct Countdown(u32);
///
/// impl Operation for Countdown {
///     type Output = &'static str;
///     type Error = std::io::Error;
///
///     async fn attempt(&mut self, _ctx: Context) -> Result<Self::Output, Failure<Self::Error>> {
///         if self.0 == 0 {
///             return Ok("liftoff");
///         }
///         self.0 -= 1;
///         Err(std::io::Error::other("not yet").into())
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let out = Retrier::default().execute(&Context::background(), Countdown(2)).await?;
/// assert_eq!(out, "liftoff");
/// # Ok(())
/// # }
/// ```
pub trait Operation: Send {
    /// Value produced by a successful attempt.
    type Output: Send;
    /// Error produced by a failed attempt.
    type Error: StdError + Send + Sync + 'static;

    /// Make one attempt. `ctx` carries the attempt's [`Status`].
    fn attempt(
        &mut self,
        ctx: Context,
    ) -> impl Future<Output = Result<Self::Output, Failure<Self::Error>>> + Send;
}

/// Adapts a closure returning a future into an [`Operation`].
pub(crate) struct FnOperation<F>(pub(crate) F);

impl<F, Fut, T, E> Operation for FnOperation<F>
where
    F: FnMut(Context) -> Fut + Send,
    Fut: Future<Output = Result<T, Failure<E>>> + Send,
    T: Send,
    E: StdError + Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    fn attempt(&mut self, ctx: Context) -> impl Future<Output = Result<T, Failure<E>>> + Send {
        (self.0)(ctx)
    }
}

/// Runs operations under a [`Policy`].
///
/// Each run owns its own backoff schedule and status sequence, so a single
/// `Retrier` can drive any number of concurrent runs.
///
/// # Guarantees
///
/// - one operation invocation per attempt, never two at once
/// - attempts are numbered from 1, and at most `max_tries` are made when the
///   bound is non-zero
/// - no delay is waited after a terminal decision
/// - once cancellation is observed no further attempt is made
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: Policy,
}

impl Retrier {
    /// Create a retrier for `policy`.
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// The policy this retrier applies.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run `op` until it succeeds, is halted, exhausts its attempts, or `ctx`
    /// is cancelled.
    pub async fn execute<O>(&self, ctx: &Context, mut op: O) -> Result<O::Output, Error<O::Error>>
    where
        O: Operation,
    {
        let policy = &self.policy;
        let mut backoff = Backoff::new(
            policy.initial_delay(),
            policy.max_delay(),
            policy.first_fast(),
        );
        let mut timer = DelayTimer::new();
        let mut last_error: Option<SharedError> = None;
        let mut try_number: u32 = 0;

        loop {
            try_number = try_number.saturating_add(1);

            // Drawn before the attempt so the operation can see it.
            let delay = backoff.next_delay();
            let mut status = Status {
                try_number,
                max_tries: policy.max_tries(),
                last_error: last_error.take(),
                next_delay: delay,
            };

            let failure = match op.attempt(ctx.with_status(status.clone())).await {
                Ok(output) => {
                    if try_number > 1 {
                        trace!(attempts = try_number, "retry succeeded");
                    }
                    return Ok(output);
                }
                Err(failure) => failure.map(Arc::new),
            };

            let shared: SharedError = match &failure {
                Failure::Retry(err) | Failure::Halt(err) => Arc::clone(err) as SharedError,
                Failure::Cancelled(cancelled) => Arc::new(cancelled.clone()) as SharedError,
            };
            status.last_error = Some(Arc::clone(&shared));
            policy.observe(&status);

            match classify::classify(failure, ctx, policy, try_number) {
                Verdict::Stop(err) => {
                    debug!(
                        attempt = try_number,
                        max_tries = policy.max_tries(),
                        outcome = outcome(&err),
                        error = %shared,
                        "retry stopped"
                    );
                    return Err(err);
                }
                Verdict::Retry => {
                    debug!(
                        attempt = try_number,
                        max_tries = policy.max_tries(),
                        delay = ?delay,
                        error = %shared,
                        "attempt failed, retrying"
                    );
                }
            }

            if timer.wait(ctx, delay).await == Wake::Cancelled {
                let cancelled = classify::cancellation(ctx, policy, None);
                debug!(
                    attempt = try_number,
                    error = %cancelled,
                    "retry cancelled during delay"
                );
                return Err(Error::Cancelled(cancelled));
            }
            last_error = Some(shared);
        }
    }
}

fn outcome<E>(err: &Error<E>) -> &'static str {
    match err {
        Error::Halted(_) => "halted",
        Error::Exhausted(_) => "exhausted",
        Error::Cancelled(_) => "cancelled",
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Cancelled,
}

/// The single timer a run waits on between attempts.
///
/// The timer is re-armed for every delay. It is released when the guard is
/// dropped, which happens on every exit from the run, so a cancelled wait
/// never leaves a pending timer entry behind.
struct DelayTimer {
    sleep: Pin<Box<Sleep>>,
}

impl DelayTimer {
    fn new() -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(Duration::ZERO)),
        }
    }

    /// Wait out `delay`, giving way to cancellation of `ctx`.
    async fn wait(&mut self, ctx: &Context, delay: Duration) -> Wake {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        self.sleep.as_mut().reset(deadline);

        tokio::select! {
            biased;
            () = ctx.done() => Wake::Cancelled,
            () = self.sleep.as_mut() => Wake::Elapsed,
        }
    }
}
