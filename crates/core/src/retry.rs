//! Bounded-retry policies for remote operations.
//!
//! Every remote operation carries its own policy (attempt count, delay,
//! fixed or exponential backoff). Exhaustion raises a distinct condition
//! wrapping the last underlying error, so callers can tell "it kept failing"
//! apart from the failure itself.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
	Fixed,
	Exponential,
}

/// Bounded-retry policy for one remote operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub attempts: u32,
	pub delay: Duration,
	pub backoff: Backoff,
}

impl RetryPolicy {
	pub const fn fixed(attempts: u32, delay: Duration) -> Self {
		Self {
			attempts,
			delay,
			backoff: Backoff::Fixed,
		}
	}

	pub const fn exponential(attempts: u32, delay: Duration) -> Self {
		Self {
			attempts,
			delay,
			backoff: Backoff::Exponential,
		}
	}

	fn delay_for(&self, attempt: u32) -> Duration {
		match self.backoff {
			Backoff::Fixed => self.delay,
			// Doubling per attempt, capped so a long policy cannot overflow.
			Backoff::Exponential => self.delay * 2u32.saturating_pow(attempt.min(16)),
		}
	}
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Terminal errors (input/config mistakes, a gone worker) are returned
/// immediately; retrying cannot help them.
pub(crate) async fn retry<T, F, Fut>(op: &'static str, policy: RetryPolicy, mut operation: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let attempts = policy.attempts.max(1);
	let mut last = None;
	for attempt in 0..attempts {
		match operation().await {
			Ok(value) => return Ok(value),
			Err(e) if e.is_terminal() => return Err(e),
			Err(e) => {
				debug!(target = "cbt", op, attempt, error = %e, "operation failed; will retry");
				last = Some(e);
				if attempt + 1 < attempts {
					tokio::time::sleep(policy.delay_for(attempt)).await;
				}
			}
		}
	}
	Err(Error::RetriesExhausted {
		op,
		attempts,
		source: Box::new(last.expect("at least one attempt ran")),
	})
}

/// Polls `probe` until it reports true or the policy is exhausted.
pub(crate) async fn wait_until<F, Fut>(op: &'static str, policy: RetryPolicy, mut probe: F) -> Result<()>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<bool>>,
{
	let attempts = policy.attempts.max(1);
	for attempt in 0..attempts {
		if probe().await? {
			return Ok(());
		}
		if attempt + 1 < attempts {
			tokio::time::sleep(policy.delay_for(attempt)).await;
		}
	}
	Err(Error::RetriesExhausted {
		op,
		attempts,
		source: Box::new(Error::ConditionNotMet(op)),
	})
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn quick(attempts: u32) -> RetryPolicy {
		RetryPolicy::fixed(attempts, Duration::from_millis(1))
	}

	#[tokio::test]
	async fn succeeds_after_transient_failures() {
		let calls = AtomicU32::new(0);
		let result = retry("test op", quick(5), || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				if n < 2 {
					Err(Error::ConditionNotMet("not yet"))
				} else {
					Ok(n)
				}
			}
		})
		.await;
		assert_eq!(result.unwrap(), 2);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn exhaustion_is_distinct_from_the_underlying_error() {
		let result: Result<()> = retry("test op", quick(3), || async {
			Err(Error::ConditionNotMet("never"))
		})
		.await;
		match result.unwrap_err() {
			Error::RetriesExhausted { op, attempts, source } => {
				assert_eq!(op, "test op");
				assert_eq!(attempts, 3);
				assert!(matches!(*source, Error::ConditionNotMet(_)));
			}
			other => panic!("expected RetriesExhausted, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn terminal_errors_short_circuit() {
		let calls = AtomicU32::new(0);
		let result: Result<()> = retry("test op", quick(5), || {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err(Error::WorkerGone) }
		})
		.await;
		assert!(matches!(result.unwrap_err(), Error::WorkerGone));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn wait_until_polls_to_success() {
		let calls = AtomicU32::new(0);
		wait_until("test wait", quick(5), || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			async move { Ok(n >= 3) }
		})
		.await
		.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 4);
	}
}
