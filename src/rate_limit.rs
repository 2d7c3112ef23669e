//! Per-credential sliding-window rate limiting.
//!
//! A call is admitted iff fewer than `qps_limit` admissions fall inside `(now - 1s, now]`. There
//! is no release: an admitted slot ages out with the window.

// self
use crate::{
	_prelude::*,
	auth::CredentialId,
	store::{GovernorStore, RateAdmission},
};

/// Length of the sliding admission window.
pub const RATE_WINDOW: Duration = Duration::SECOND;

/// Result emitted by [`RateLimiter::acquire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The call may proceed immediately.
	Allow,
	/// The call should be delayed.
	Delay(RetryDirective),
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Suggested backoff duration.
	pub recommended_backoff: Duration,
	/// Optional descriptive string.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided timing metadata.
	pub fn new(earliest_retry_at: OffsetDateTime, recommended_backoff: Duration) -> Self {
		Self { earliest_retry_at, recommended_backoff, reason: None }
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

/// Admits calls per credential against the shared sliding window.
pub struct RateLimiter {
	store: Arc<dyn GovernorStore>,
	qps_limit: u32,
	window: Duration,
}
impl RateLimiter {
	/// Creates a limiter backed by the shared store.
	pub fn new(store: Arc<dyn GovernorStore>, qps_limit: u32) -> Self {
		Self { store, qps_limit, window: RATE_WINDOW }
	}

	/// Admissions allowed per window.
	pub fn limit(&self) -> u32 {
		self.qps_limit
	}

	/// Records one admission when the window has room.
	pub async fn try_acquire(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<bool> {
		Ok(matches!(self.acquire(credential, now).await?, RateLimitDecision::Allow))
	}

	/// Same admission as [`RateLimiter::try_acquire`], reporting when a slot frees up on rejection.
	pub async fn acquire(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<RateLimitDecision> {
		let admission =
			self.store.acquire_rate_slot(credential, now, self.qps_limit, self.window).await?;

		Ok(match admission {
			RateAdmission::Admitted { .. } => RateLimitDecision::Allow,
			RateAdmission::Rejected { retry_at } => RateLimitDecision::Delay(
				RetryDirective::new(retry_at, (retry_at - now).max(Duration::ZERO))
					.with_reason(format!("{} calls per second reached", self.qps_limit)),
			),
		})
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("qps_limit", &self.qps_limit)
			.field("window", &self.window)
			.finish()
	}
}
