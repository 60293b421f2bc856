//! Example: Retrying flaky operations with redo
//!
//! This example demonstrates:
//! 1. Simple retry with an observer printing each failure
//! 2. Halting on errors that will never succeed
//! 3. Refreshing an expired credential between attempts
//! 4. Cancelling a run from another task
//! 5. The shape of the backoff schedule
//!
//! Run with:
//! ```bash
//! RUST_LOG=redo=debug cargo run -p redo --example retry_example
//! ```

use redo::prelude::*;
use redo::{Backoff, Cancelled};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// A simulated API that fails the first few times
struct UnreliableApi {
    attempts: AtomicU32,
    fail_count: u32,
}

impl UnreliableApi {
    fn new(fail_count: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_count,
        }
    }

    async fn call(&self) -> Result<String, std::io::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if attempt < self.fail_count {
            Err(std::io::Error::other(format!(
                "transient error on attempt {}",
                attempt + 1
            )))
        } else {
            Ok("API response data".to_string())
        }
    }

    fn total_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Example 1: Simple retry
async fn example_simple_retry() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 1: Simple Retry ===\n");

    let retrier = Retrier::new(
        Policy::builder()
            .initial_delay(Duration::from_millis(50))
            .max_tries(5)
            .first_fast(true)
            .each(|status| {
                if let Some(err) = &status.last_error {
                    println!("  {status:#}: {err}");
                }
            })
            .build(),
    );

    let api = Arc::new(UnreliableApi::new(3));
    let start = Instant::now();

    let result = retrier
        .call(&Context::background(), || {
            let api = Arc::clone(&api);
            async move { api.call().await }
        })
        .await?;

    println!("\nResult: {}", result);
    println!("Total attempts: {}", api.total_attempts());
    println!("Total time: {:?}", start.elapsed());

    Ok(())
}

/// Example 2: Halting on permanent errors
async fn example_halt() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 2: Halting on Permanent Errors ===\n");

    let retrier = Retrier::new(
        Policy::builder()
            .initial_delay(Duration::from_millis(10))
            .halt_if_matches::<std::io::Error, _>(|err| {
                err.kind() == std::io::ErrorKind::PermissionDenied
            })
            .build(),
    );

    let attempts = AtomicU32::new(0);
    let err = retrier
        .call(&Context::background(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "auth failed",
                ))
            }
        })
        .await
        .unwrap_err();

    println!("Halted: {} ({})", err.is_halted(), err);
    println!("Total attempts: {}", attempts.load(Ordering::SeqCst));

    Ok(())
}

/// Example 3: Refreshing an expired token between attempts
async fn example_refresh() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 3: Refreshing Input Between Attempts ===\n");

    let retrier = Retrier::new(
        Policy::builder()
            .initial_delay(Duration::from_millis(10))
            .max_tries(3)
            .build(),
    );

    let mut issued = 0;
    let body = retrier
        .run_with_refresh(
            &Context::background(),
            "token-expired".to_string(),
            |ctx, token: String| async move {
                println!("  {}: using {}", ctx.status(), token);
                if token.ends_with("expired") {
                    return Err(Failure::Retry(std::io::Error::other("401 unauthorized")));
                }
                Ok(format!("fetched with {token}"))
            },
            move || {
                issued += 1;
                let token = format!("token-{issued}");
                async move { Ok::<_, std::io::Error>(token) }
            },
        )
        .await?;

    println!("\nResult: {}", body);

    Ok(())
}

/// Example 4: Cancelling a run from another task
async fn example_cancel() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 4: Cancellation ===\n");

    let retrier = Retrier::new(
        Policy::builder()
            .initial_delay(Duration::from_secs(5))
            .unbounded()
            .build(),
    );
    let (ctx, canceller) = Context::background().with_cancel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel_with_cause(std::io::Error::other("shutting down"));
    });

    let start = Instant::now();
    let err = retrier
        .call(&ctx, || async {
            Err::<(), _>(std::io::Error::other("service unavailable"))
        })
        .await
        .unwrap_err();

    println!("Cancelled: {} ({})", err.is_cancelled(), err);
    println!("Stopped after {:?}", start.elapsed());
    if let Some(Cancelled::Cause(cause)) = err.cancellation() {
        println!("Cause: {}", cause);
    }

    Ok(())
}

/// Example 5: Backoff schedule
fn example_schedule() {
    println!("\n=== Example 5: Backoff Schedule (initial 100ms, cap 10s) ===\n");

    for run in 1..=3 {
        let delays: Vec<String> = Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            false,
        )
        .take(8)
        .map(|d| format!("{:>6}ms", d.as_millis()))
        .collect();
        println!("Run {}: {}", run, delays.join(" "));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    example_simple_retry().await?;
    example_halt().await?;
    example_refresh().await?;
    example_cancel().await?;
    example_schedule();

    println!("\n=== All examples completed successfully ===");
    Ok(())
}
