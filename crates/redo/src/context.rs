//! Cancellable execution context passed to every attempt.
//!
//! A [`Context`] carries three things: a cancellation signal shared with every
//! context derived from it, an optional deadline, and the [`Status`] of the
//! attempt it was handed to. It is cheap to clone.
//!
//! # Examples
//!
//! ```rust
//! use redo::Context;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let (ctx, canceller) = Context::background().with_cancel();
//! let (child, _) = ctx.with_timeout(Duration::from_secs(30));
//!
//! canceller.cancel();
//! assert!(child.is_done());
//! # }
//! ```

use crate::error::{Cancelled, SharedError};
use crate::status::Status;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Execution context for a retry run and the attempts inside it.
#[derive(Clone)]
pub struct Context {
    scope: Arc<Scope>,
    status: Option<Status>,
}

struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
    cancelled: OnceLock<Cancelled>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn root() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            cancelled: OnceLock::new(),
            parent: None,
        }
    }

    fn child(parent: &Arc<Scope>, deadline: Option<Instant>) -> Self {
        let deadline = match (parent.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            token: parent.token.child_token(),
            deadline,
            cancelled: OnceLock::new(),
            parent: Some(Arc::clone(parent)),
        }
    }

    fn cancel(&self, reason: Cancelled) {
        // First cancellation wins.
        let _ = self.cancelled.set(reason);
        self.token.cancel();
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Why this scope is done, preferring its own cancellation, then the
    /// parent's, then its deadline.
    fn reason(&self) -> Option<Cancelled> {
        if let Some(reason) = self.cancelled.get() {
            return Some(reason.clone());
        }
        if let Some(reason) = self.parent.as_ref().and_then(|parent| parent.reason()) {
            return Some(reason);
        }
        if self.deadline_passed() {
            return Some(Cancelled::DeadlineExceeded);
        }
        self.token.is_cancelled().then_some(Cancelled::Canceled)
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            scope: Arc::new(Scope::root()),
            status: None,
        }
    }

    /// Derive a context that can be cancelled with the returned [`Canceller`].
    pub fn with_cancel(&self) -> (Context, Canceller) {
        self.derive(None)
    }

    /// Derive a context that is done after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, Canceller) {
        let now = Instant::now();
        self.derive(Some(now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)))
    }

    /// Derive a context that is done at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, Canceller) {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, Canceller) {
        let scope = Arc::new(Scope::child(&self.scope, deadline));
        let ctx = Context {
            scope: Arc::clone(&scope),
            status: self.status.clone(),
        };
        (ctx, Canceller { scope })
    }

    /// Whether the context was cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        self.scope.token.is_cancelled() || self.scope.deadline_passed()
    }

    /// Wait until the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.scope.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.scope.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.scope.token.cancelled().await,
        }
    }

    /// The plain reason the context is done, without any supplied cause.
    ///
    /// Returns `None` while the context is live.
    pub fn err(&self) -> Option<Cancelled> {
        if !self.is_done() {
            return None;
        }
        match self.scope.reason() {
            Some(Cancelled::Cause(_)) | None => Some(Cancelled::Canceled),
            Some(reason) => Some(reason),
        }
    }

    /// The cause the context was cancelled with, falling back to
    /// [`err`](Context::err) when none was supplied.
    pub fn cause(&self) -> Option<Cancelled> {
        if !self.is_done() {
            return None;
        }
        Some(self.scope.reason().unwrap_or(Cancelled::Canceled))
    }

    /// The status of the current attempt.
    ///
    /// Outside a retry run this is `Status::default()`, whose `try_number` is
    /// zero. Use [`is_retrying`](Context::is_retrying) to tell the two apart.
    pub fn status(&self) -> Status {
        self.status.clone().unwrap_or_default()
    }

    /// Whether this context belongs to an attempt of a retry run.
    pub fn is_retrying(&self) -> bool {
        self.status.is_some()
    }

    /// The same context, carrying `status`.
    pub(crate) fn with_status(&self, status: Status) -> Context {
        Context {
            scope: Arc::clone(&self.scope),
            status: Some(status),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("done", &self.is_done())
            .field("deadline", &self.scope.deadline)
            .field("status", &self.status)
            .finish()
    }
}

/// Cancels the context it was created with, and every context derived from it.
#[derive(Clone)]
pub struct Canceller {
    scope: Arc<Scope>,
}

impl Canceller {
    /// Cancel without a cause.
    pub fn cancel(&self) {
        self.scope.cancel(Cancelled::Canceled);
    }

    /// Cancel, recording `cause` as the reason.
    ///
    /// Retry runs return the cause unchanged unless cause extraction is
    /// disabled on the policy.
    pub fn cancel_with_cause<E>(&self, cause: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        let cause: SharedError = Arc::new(cause);
        self.scope.cancel(Cancelled::Cause(cause));
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.scope.token.is_cancelled()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Stand-in for deadlines too far away to represent.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);
