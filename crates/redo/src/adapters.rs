//! Closure-based entry points.
//!
//! Every adapter builds an [`Operation`] and hands it to
//! [`Retrier::execute`], so all of them share one loop and one set of
//! guarantees. They differ only in what the closure receives:
//!
//! - [`run`](Retrier::run): `FnMut(Context)`
//! - [`call`](Retrier::call): `FnMut()`, every error retryable
//! - [`run_with`](Retrier::run_with): `FnMut(Context, I)`, input cloned per attempt
//! - [`run_with_refresh`](Retrier::run_with_refresh): as `run_with`, plus a
//!   refresh step between attempts

use crate::context::Context;
use crate::engine::{FnOperation, Operation, Retrier};
use crate::error::{AttemptError, Error, Failure, RefreshError};
use std::error::Error as StdError;
use std::future::Future;

impl Retrier {
    /// Retry a closure that receives the attempt's [`Context`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use redo::{Context, Failure, Policy, Retrier};
    /// use std::time::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let retrier = Retrier::new(
    ///     Policy::builder()
    ///         .initial_delay(Duration::from_millis(10))
    ///         .max_tries(5)
    ///         .build(),
    /// );
    ///
    /// let attempts = retrier
    ///     .run(&Context::background(), |ctx| async move {
    ///         let status = ctx.status();
    ///         if status.try_number < 3 {
    ///             return Err(Failure::Retry(std::io::Error::other("not ready")));
    ///         }
    ///         Ok(status.try_number)
    ///     })
    ///     .await?;
    /// assert_eq!(attempts, 3);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run<F, Fut, T, E>(&self, ctx: &Context, op: F) -> Result<T, Error<E>>
    where
        F: FnMut(Context) -> Fut + Send,
        Fut: Future<Output = Result<T, Failure<E>>> + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
    {
        self.execute(ctx, FnOperation(op)).await
    }

    /// Retry a closure that takes no arguments and returns plain errors.
    ///
    /// Every error is retryable; use the policy's halt predicate to stop
    /// early.
    pub async fn call<F, Fut, T, E>(&self, ctx: &Context, mut op: F) -> Result<T, Error<E>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
    {
        self.run(ctx, move |_ctx| {
            let attempt = op();
            async move { attempt.await.map_err(Failure::Retry) }
        })
        .await
    }

    /// Retry a closure that takes an input, cloned for every attempt.
    pub async fn run_with<F, Fut, I, T, E>(
        &self,
        ctx: &Context,
        input: I,
        mut op: F,
    ) -> Result<T, Error<E>>
    where
        F: FnMut(Context, I) -> Fut + Send,
        Fut: Future<Output = Result<T, Failure<E>>> + Send,
        I: Clone + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
    {
        self.run(ctx, move |ctx| op(ctx, input.clone())).await
    }

    /// Retry a closure that takes an input, refreshing the input after every
    /// retryable failure.
    ///
    /// When `refresh` succeeds the next attempt receives its value. When it
    /// fails the attempt's error becomes [`AttemptError::Refresh`], carrying
    /// both errors, and the run carries on with the old input. Halted and
    /// cancelled attempts do not refresh.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use redo::{AttemptError, Context, Failure, Retrier};
    ///
    /// # async fn example() -> Result<(), redo::Error<AttemptError<std::io::Error, std::io::Error>>> {
    /// let mut generation = 0;
    /// let token = Retrier::default()
    ///     .run_with_refresh(
    ///         &Context::background(),
    ///         "stale".to_string(),
    ///         |_ctx, token: String| async move {
    ///             if token == "stale" {
    ///                 return Err(Failure::Retry(std::io::Error::other("expired token")));
    ///             }
    ///             Ok(token)
    ///         },
    ///         move || {
    ///             generation += 1;
    ///             let fresh = format!("fresh-{generation}");
    ///             async move { Ok::<_, std::io::Error>(fresh) }
    ///         },
    ///     )
    ///     .await?;
    /// assert_eq!(token, "fresh-1");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_with_refresh<F, Fut, G, RFut, I, T, E, R>(
        &self,
        ctx: &Context,
        input: I,
        op: F,
        refresh: G,
    ) -> Result<T, Error<AttemptError<E, R>>>
    where
        F: FnMut(Context, I) -> Fut + Send,
        Fut: Future<Output = Result<T, Failure<E>>> + Send,
        G: FnMut() -> RFut + Send,
        RFut: Future<Output = Result<I, R>> + Send,
        I: Clone + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
        R: StdError + Send + Sync + 'static,
    {
        let op = Refreshing { input, op, refresh };
        self.execute(ctx, op).await
    }
}

/// An operation whose input is replaced by a refresh step between attempts.
struct Refreshing<F, G, I> {
    input: I,
    op: F,
    refresh: G,
}

impl<F, Fut, G, RFut, I, T, E, R> Operation for Refreshing<F, G, I>
where
    F: FnMut(Context, I) -> Fut + Send,
    Fut: Future<Output = Result<T, Failure<E>>> + Send,
    G: FnMut() -> RFut + Send,
    RFut: Future<Output = Result<I, R>> + Send,
    I: Clone + Send,
    T: Send,
    E: StdError + Send + Sync + 'static,
    R: StdError + Send + Sync + 'static,
{
    type Output = T;
    type Error = AttemptError<E, R>;

    async fn attempt(&mut self, ctx: Context) -> Result<T, Failure<AttemptError<E, R>>> {
        let failure = match (self.op)(ctx, self.input.clone()).await {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        match failure {
            Failure::Retry(err) => match (self.refresh)().await {
                Ok(input) => {
                    self.input = input;
                    Err(Failure::Retry(AttemptError::Failed(err)))
                }
                Err(refresh) => Err(Failure::Retry(AttemptError::Refresh(RefreshError::new(
                    refresh, err,
                )))),
            },
            other => Err(other.map(AttemptError::Failed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn retrier(max_tries: u32) -> Retrier {
        Retrier::new(
            Policy::builder()
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(10))
                .max_tries(max_tries)
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_retries_plain_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retrier(5)
            .call(&Context::background(), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 4 {
                        Err(io::Error::other("refused"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_exhausts_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retrier(3)
            .call(&Context::background(), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(io::Error::other(format!("refused {n}"))) }
            })
            .await
            .unwrap_err();

        assert!(err.is_exhausted());
        assert_eq!(err.to_string(), "refused 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_clones_input_per_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let err = retrier(3)
            .run_with(
                &Context::background(),
                vec![1, 2, 3],
                move |_ctx, mut input: Vec<i32>| {
                    let log = Arc::clone(&log);
                    async move {
                        // Mutating the copy never leaks into the next attempt.
                        input.push(4);
                        log.lock().unwrap().push(input.len());
                        Err::<(), _>(Failure::Retry(io::Error::other("no")))
                    }
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_exhausted());
        assert_eq!(*seen.lock().unwrap(), vec![4, 4, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_input() {
        let inputs = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&inputs);
        let mut next = 0u32;

        let result = retrier(5)
            .run_with_refresh(
                &Context::background(),
                0u32,
                move |_ctx, input: u32| {
                    log.lock().unwrap().push(input);
                    async move {
                        if input < 2 {
                            return Err(Failure::Retry(io::Error::other("old input")));
                        }
                        Ok(input * 10)
                    }
                },
                move || {
                    next += 1;
                    let value = next;
                    async move { Ok::<_, io::Error>(value) }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 20);
        assert_eq!(*inputs.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_retrying_until_exhaustion() {
        let attempts = Arc::new(AtomicU32::new(0));
        let refreshes = Arc::new(AtomicU32::new(0));
        let attempt_counter = Arc::clone(&attempts);
        let refresh_counter = Arc::clone(&refreshes);

        let err = retrier(4)
            .run_with_refresh(
                &Context::background(),
                0u8,
                move |_ctx, _input: u8| {
                    attempt_counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Failure::Retry(io::Error::other("attempt failed"))) }
                },
                move || {
                    refresh_counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u8, _>(io::Error::other("refresh failed")) }
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_exhausted());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(refreshes.load(Ordering::SeqCst), 4);

        let last = err.last_error().expect("exhausted run has a last error");
        let refresh = last.refresh_error().expect("refresh failed");
        assert_eq!(refresh.refresh_error().to_string(), "refresh failed");
        assert_eq!(refresh.retry_error().to_string(), "attempt failed");
        assert_eq!(err.to_string(), "refresh failed\nattempt failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_skips_refresh() {
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&refreshes);

        let err = retrier(5)
            .run_with_refresh(
                &Context::background(),
                (),
                |_ctx, ()| async { Err::<(), _>(crate::error::halt(io::Error::other("fatal"))) },
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, io::Error>(()) }
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_halted());
        assert!(matches!(err.last_error(), Some(AttemptError::Failed(_))));
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_on_sees_through_attempt_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("forbidden")]
        struct Forbidden;

        let retrier = Retrier::new(
            Policy::builder()
                .initial_delay(Duration::from_millis(1))
                .halt_on::<Forbidden>()
                .build(),
        );

        let err = retrier
            .run_with_refresh(
                &Context::background(),
                (),
                |_ctx, ()| async { Err::<(), _>(Failure::Retry(Forbidden)) },
                || async { Ok::<_, io::Error>(()) },
            )
            .await
            .unwrap_err();

        assert!(err.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_on_sees_attempt_error_when_refresh_fails() {
        #[derive(Debug, thiserror::Error)]
        #[error("forbidden")]
        struct Forbidden;

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let retrier = Retrier::new(
            Policy::builder()
                .initial_delay(Duration::from_millis(1))
                .max_tries(5)
                .halt_on::<Forbidden>()
                .build(),
        );

        let err = retrier
            .run_with_refresh(
                &Context::background(),
                (),
                move |_ctx, ()| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Failure::Retry(Forbidden)) }
                },
                || async { Err::<(), _>(io::Error::other("refresh failed")) },
            )
            .await
            .unwrap_err();

        assert!(err.is_halted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let last = err.last_error().expect("halted run has a last error");
        assert!(last.refresh_error().is_some());
        assert!(last.source().is_some_and(|source| source.is::<Forbidden>()));
    }
}
