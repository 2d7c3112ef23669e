//! Round-robin credential selection.
//!
//! Each pass claims its own cursor ticket and visits every credential once, starting at
//! `ticket % len`, so concurrent passes start on different credentials. A candidate must be
//! eligible, win a quota reservation, and win a rate slot before its token is fetched. Every
//! capacity reservation taken for a candidate that is ultimately skipped is returned.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credential, CredentialId},
	health::{FailureKind, HealthMonitor},
	obs::{self, OpKind, OpOutcome, OpSpan},
	pool::CredentialPool,
	quota::{QuotaTracker, UsagePeriod},
	rate_limit::{RateLimitDecision, RateLimiter},
	store::GovernorStore,
	token::TokenManager,
};

/// Why a credential was passed over during one selection pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	/// Unhealthy, or in probation with the probe already handed out.
	Unhealthy,
	/// Monthly quota is used up.
	QuotaExceeded,
	/// The one-second window is full.
	RateLimitExceeded,
	/// The token endpoint failed.
	TokenFetchFailed,
	/// Another holder kept the refresh lock too long.
	LockTimeout,
}
impl SkipReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			SkipReason::Unhealthy => "unhealthy",
			SkipReason::QuotaExceeded => "quota_exceeded",
			SkipReason::RateLimitExceeded => "rate_limit_exceeded",
			SkipReason::TokenFetchFailed => "token_fetch_failed",
			SkipReason::LockTimeout => "lock_timeout",
		}
	}
}
impl Display for SkipReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A skipped credential and the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSkip {
	/// Skipped credential.
	pub credential: CredentialId,
	/// Why it was skipped.
	pub reason: SkipReason,
}

/// A credential ready for one upstream call.
///
/// One quota unit is held in `period` until the call is reported.
#[derive(Clone, Debug)]
pub struct Selection {
	/// Chosen credential.
	pub credential: Credential,
	/// Token to send upstream.
	pub token: AccessToken,
	/// Period the quota reservation was taken in.
	pub period: UsagePeriod,
	/// Instant the selection was made.
	pub selected_at: OffsetDateTime,
}

/// Picks credentials in round-robin order.
pub struct Selector {
	pool: CredentialPool,
	store: Arc<dyn GovernorStore>,
	health: Arc<HealthMonitor>,
	quota: Arc<QuotaTracker>,
	rate: Arc<RateLimiter>,
	tokens: Arc<TokenManager>,
}
impl Selector {
	/// Wires a selector over shared components.
	pub fn new(
		pool: CredentialPool,
		store: Arc<dyn GovernorStore>,
		health: Arc<HealthMonitor>,
		quota: Arc<QuotaTracker>,
		rate: Arc<RateLimiter>,
		tokens: Arc<TokenManager>,
	) -> Self {
		Self { pool, store, health, quota, rate, tokens }
	}

	/// Pool being selected from.
	pub fn pool(&self) -> &CredentialPool {
		&self.pool
	}

	/// Picks the next usable credential and a valid token for it.
	///
	/// Fails with [`Error::AllCredentialsUnavailable`] when every credential was skipped, and
	/// propagates store failures as-is.
	pub async fn select(&self, now: OffsetDateTime) -> Result<Selection> {
		const KIND: OpKind = OpKind::Select;

		let span = OpSpan::new(KIND, "select");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.select_pass(now)).await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn select_pass(&self, now: OffsetDateTime) -> Result<Selection> {
		let len = self.pool.len();
		let mut skipped = Vec::new();
		let mut retry_at: Option<OffsetDateTime> = None;

		if len == 0 {
			return Err(Error::AllCredentialsUnavailable { skipped, retry_after: None });
		}

		let ticket = self.store.claim_tickets(1).await?;
		let start = (ticket % len as u64) as usize;
		let period = UsagePeriod::containing(now);

		for offset in 0..len {
			let Some(credential) = self.pool.at((start + offset) % len) else {
				continue;
			};
			let id = &credential.id;

			if !self.health.is_eligible(id, now).await? {
				skip(&mut skipped, id, SkipReason::Unhealthy);

				continue;
			}
			if !self.quota.try_reserve_in(id, period).await? {
				skip(&mut skipped, id, SkipReason::QuotaExceeded);

				continue;
			}
			if let RateLimitDecision::Delay(directive) = self.rate.acquire(id, now).await? {
				self.quota.release_in(id, period).await?;

				let at = directive.earliest_retry_at;

				retry_at = Some(retry_at.map_or(at, |current| current.min(at)));
				skip(&mut skipped, id, SkipReason::RateLimitExceeded);

				continue;
			}

			match self.tokens.get_valid_token(credential, now).await {
				Ok(token) => {
					// Skipped slots count as visited so the next pass starts after the winner.
					if offset > 0 {
						if let Err(err) = self.store.claim_tickets(offset as u64).await {
							self.quota.release_in(id, period).await?;

							return Err(err.into());
						}
					}

					return Ok(Selection {
						credential: credential.clone(),
						token,
						period,
						selected_at: now,
					});
				},
				Err(err) => {
					self.quota.release_in(id, period).await?;

					let reason = match err {
						Error::Storage(_) => return Err(err),
						// Lock contention says nothing about the credential itself.
						Error::LockTimeout { .. } => SkipReason::LockTimeout,
						_ => {
							let message = failure_message(&err);

							self.health
								.record_failure_with(id, now, FailureKind::from(&err), Some(&message))
								.await?;

							SkipReason::TokenFetchFailed
						},
					};

					skip(&mut skipped, id, reason);
				},
			}
		}

		Err(Error::AllCredentialsUnavailable {
			skipped,
			retry_after: retry_at.map(|at| (at - now).max(Duration::ZERO)),
		})
	}
}
impl Debug for Selector {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Selector").field("pool_len", &self.pool.len()).finish()
	}
}

fn skip(skipped: &mut Vec<CredentialSkip>, credential: &CredentialId, reason: SkipReason) {
	obs::record_skip(credential, reason);
	skipped.push(CredentialSkip { credential: credential.clone(), reason });
}

fn failure_message(error: &Error) -> String {
	match error {
		Error::TokenFetchFailed { source, .. } => source.to_string(),
		other => other.to_string(),
	}
}
