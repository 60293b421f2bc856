//! Classification of failed attempts.
//!
//! Rules are evaluated in order, first match wins:
//!
//! 1. the controlling context is done, or the operation reported
//!    cancellation: stop with the cancellation
//! 2. the operation halted itself: stop, halted
//! 3. the policy's halt predicate matches: stop, halted
//! 4. the attempt bound is reached: stop, exhausted
//! 5. otherwise: retry

use crate::context::Context;
use crate::error::{Cancelled, Error, Failure};
use crate::policy::Policy;
use std::error::Error as StdError;
use std::sync::Arc;

/// Decision for a failed attempt.
#[derive(Debug)]
pub(crate) enum Verdict<E> {
    Retry,
    Stop(Error<E>),
}

pub(crate) fn classify<E>(
    failure: Failure<Arc<E>>,
    ctx: &Context,
    policy: &Policy,
    try_number: u32,
) -> Verdict<E>
where
    E: StdError + 'static,
{
    let err = match failure {
        Failure::Cancelled(reported) => {
            return Verdict::Stop(Error::Cancelled(cancellation(ctx, policy, Some(reported))));
        }
        _ if ctx.is_done() => {
            return Verdict::Stop(Error::Cancelled(cancellation(ctx, policy, None)));
        }
        Failure::Halt(err) => return Verdict::Stop(Error::Halted(err)),
        Failure::Retry(err) => err,
    };

    if policy.halts(err.as_ref()) {
        return Verdict::Stop(Error::Halted(err));
    }
    if policy.max_tries() > 0 && try_number >= policy.max_tries() {
        return Verdict::Stop(Error::Exhausted(err));
    }
    Verdict::Retry
}

/// The cancellation a run returns.
///
/// A done controlling context wins over whatever the operation reported: its
/// cause when cause extraction is enabled, its plain error otherwise. An
/// operation reporting cancellation of a scope of its own, while the run's
/// context is live, has its report returned unchanged.
pub(crate) fn cancellation(
    ctx: &Context,
    policy: &Policy,
    reported: Option<Cancelled>,
) -> Cancelled {
    let from_ctx = if policy.cancellation_cause() {
        ctx.cause()
    } else {
        ctx.err()
    };
    from_ctx.or(reported).unwrap_or(Cancelled::Canceled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn retry(msg: &str) -> Failure<Arc<io::Error>> {
        Failure::Retry(Arc::new(io::Error::other(msg.to_string())))
    }

    fn stopped(verdict: Verdict<io::Error>) -> Error<io::Error> {
        match verdict {
            Verdict::Stop(err) => err,
            Verdict::Retry => panic!("expected a terminal verdict, got retry"),
        }
    }

    #[test]
    fn test_ordinary_failure_retries() {
        let policy = Policy::builder().max_tries(3).build();
        let verdict = classify(retry("flaky"), &Context::background(), &policy, 1);
        assert!(matches!(verdict, Verdict::Retry));
    }

    #[test]
    fn test_last_attempt_exhausts() {
        let policy = Policy::builder().max_tries(3).build();
        let err = stopped(classify(retry("flaky"), &Context::background(), &policy, 3));
        assert!(err.is_exhausted());
        assert_eq!(err.to_string(), "flaky");
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let policy = Policy::builder().unbounded().build();
        let verdict = classify(retry("flaky"), &Context::background(), &policy, u32::MAX);
        assert!(matches!(verdict, Verdict::Retry));
    }

    #[test]
    fn test_halt_predicate_beats_exhaustion() {
        let policy = Policy::builder()
            .max_tries(1)
            .halt_if(|err| err.to_string() == "fatal")
            .build();

        let err = stopped(classify(retry("fatal"), &Context::background(), &policy, 1));
        assert!(err.is_halted());
    }

    #[test]
    fn test_operation_halt_is_returned_unchanged() {
        let policy = Policy::default();
        let failure = Failure::Halt(Arc::new(io::Error::other("stop")));

        let err = stopped(classify(failure, &Context::background(), &policy, 1));
        assert!(err.is_halted());
        assert_eq!(err.to_string(), "stop");
    }

    #[test]
    fn test_cancelled_context_beats_everything() {
        let (ctx, canceller) = Context::background().with_cancel();
        canceller.cancel_with_cause(io::Error::other("shutdown"));
        let policy = Policy::builder()
            .max_tries(1)
            .halt_if(|_| true)
            .build();

        let err = stopped(classify(
            Failure::Halt(Arc::new(io::Error::other("stop"))),
            &ctx,
            &policy,
            1,
        ));
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "shutdown");
    }

    #[test]
    fn test_cause_extraction_can_be_disabled() {
        let (ctx, canceller) = Context::background().with_cancel();
        canceller.cancel_with_cause(io::Error::other("shutdown"));
        let policy = Policy::builder().cancellation_cause(false).build();

        let err = stopped(classify(retry("flaky"), &ctx, &policy, 1));
        assert!(matches!(err.cancellation(), Some(Cancelled::Canceled)));
    }

    #[test]
    fn test_reported_cancellation_of_inner_scope() {
        let policy = Policy::default();
        let failure = Failure::Cancelled(Cancelled::DeadlineExceeded);

        let err = stopped(classify::<io::Error>(failure, &Context::background(), &policy, 1));
        assert!(matches!(err.cancellation(), Some(Cancelled::DeadlineExceeded)));
    }
}
