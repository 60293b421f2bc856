#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Retry async operations with decorrelated jitter backoff.
//!
//! `redo` runs an operation until it succeeds, halts, exhausts its attempts,
//! or its [`Context`] is cancelled, waiting a randomized and growing delay
//! between attempts:
//!
//! - **Backoff** that grows roughly twofold per attempt, jittered and
//!   decorrelated from the previous delay, capped at a maximum ([`Backoff`])
//! - **Policies** built once and shared, with a halt predicate and a
//!   per-failure observer ([`Policy`], [`PolicyConfig`] for config files)
//! - **Status** snapshots visible to the operation and the observer
//!   ([`Status`])
//! - **Cancellation** with optional causes, deadlines, and derived scopes
//!   ([`Context`], [`Canceller`])
//! - **Input refresh** between attempts ([`Retrier::run_with_refresh`])
//!
//! # Failure handling
//!
//! An attempt returns a [`Failure`]: `?` on any error yields a retryable
//! failure, [`halt`] stops the run at once. The run reports an [`Error`]
//! that is halted, exhausted, or cancelled, and that displays and unwraps to
//! the last attempt's error.
//!
//! # Examples
//!
//! ```rust
//! use redo::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let retrier = Retrier::new(
//!     Policy::builder()
//!         .initial_delay(Duration::from_millis(100))
//!         .max_tries(5)
//!         .first_fast(true)
//!         .each(|status| eprintln!("{status:#}"))
//!         .build(),
//! );
//!
//! let (ctx, _cancel) = Context::background().with_timeout(Duration::from_secs(10));
//! let body = retrier
//!     .call(&ctx, || async { Ok::<_, std::io::Error>("hello") })
//!     .await?;
//! assert_eq!(body, "hello");
//! # Ok(())
//! # }
//! ```

mod adapters;
pub mod backoff;
mod classify;
pub mod context;
pub mod engine;
pub mod error;
pub mod policy;
pub mod status;

pub use backoff::Backoff;
pub use context::{Canceller, Context};
pub use engine::{Operation, Retrier};
pub use error::{AttemptError, Cancelled, Error, Failure, RefreshError, SharedError, halt};
pub use policy::{
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_TRIES, EachFn, HaltFn, Policy,
    PolicyBuilder, PolicyConfig,
};
pub use status::Status;

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use redo::prelude::*;
/// ```
pub mod prelude {
    pub use crate::context::{Canceller, Context};
    pub use crate::engine::{Operation, Retrier};
    pub use crate::error::{Error, Failure, halt};
    pub use crate::policy::{Policy, PolicyBuilder};
    pub use crate::status::Status;
}
