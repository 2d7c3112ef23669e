//! Administrative views and privileged maintenance.
//!
//! Views only read the store. In particular, a snapshot never grants probation to an unhealthy
//! credential, so polling a dashboard cannot steal a probe from real traffic.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialId},
	governor::Governor,
	health::{HealthState, HealthStatus},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::{PurgeReport, PurgeScope},
};

/// Token metadata safe to show operators; never carries the value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenView {
	/// Issue instant.
	pub issued_at: OffsetDateTime,
	/// Expiry instant (after the safety margin).
	pub expires_at: OffsetDateTime,
	/// Hand-outs so far.
	pub use_count: u32,
	/// Hand-out ceiling.
	pub max_uses: u32,
	/// Whether the token would be handed out at the snapshot instant.
	pub valid: bool,
}
impl TokenView {
	fn of(token: &AccessToken, now: OffsetDateTime) -> Self {
		Self {
			issued_at: token.issued_at,
			expires_at: token.expires_at,
			use_count: token.use_count,
			max_uses: token.max_uses,
			valid: token.is_valid_at(now),
		}
	}
}

/// Per-credential admin view.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CredentialSnapshot {
	/// Credential id.
	pub id: CredentialId,
	/// Non-reversible secret fingerprint.
	pub fingerprint: String,
	/// Stored health record.
	pub health: HealthState,
	/// Earliest instant an unhealthy credential may be probed.
	pub next_retry_at: Option<OffsetDateTime>,
	/// Calls reserved in the current month.
	pub usage: u64,
	/// Calls left in the current month.
	pub remaining: u64,
	/// `usage` as a percentage of the monthly limit.
	pub usage_percentage: f64,
	/// Shared token, if any.
	pub token: Option<TokenView>,
}

/// Pool-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
	/// Configured credentials.
	pub total: usize,
	/// Healthy credentials.
	pub healthy: usize,
	/// Unhealthy credentials.
	pub unhealthy: usize,
	/// Credentials with a probe in flight.
	pub probation: usize,
	/// Credentials holding a valid token.
	pub live_tokens: usize,
	/// Calls reserved across the pool this month.
	pub total_monthly_usage: u64,
}

/// Point-in-time view of the whole pool.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolSnapshot {
	/// Snapshot instant.
	pub taken_at: OffsetDateTime,
	/// Monthly limit per credential.
	pub monthly_quota_limit: u64,
	/// Credentials in round-robin order.
	pub credentials: Vec<CredentialSnapshot>,
	/// Aggregates over `credentials`.
	pub stats: PoolStats,
}

/// Admin handle borrowed from a [`Governor`].
#[derive(Clone, Copy, Debug)]
pub struct Admin<'a> {
	governor: &'a Governor,
}
impl<'a> Admin<'a> {
	pub(crate) fn new(governor: &'a Governor) -> Self {
		Self { governor }
	}

	/// Builds a read-only snapshot of every credential.
	pub async fn snapshot(&self, now: OffsetDateTime) -> Result<PoolSnapshot> {
		admin_op("snapshot", async move {
			let mut credentials = Vec::with_capacity(self.governor.pool.len());
			let mut stats = PoolStats { total: self.governor.pool.len(), ..Default::default() };

			for credential in self.governor.pool.iter() {
				let snapshot = self.snapshot_of(&credential.id, now).await?;

				match snapshot.health.status {
					HealthStatus::Healthy => stats.healthy += 1,
					HealthStatus::Unhealthy => stats.unhealthy += 1,
					HealthStatus::Probation => stats.probation += 1,
				}
				if snapshot.token.as_ref().is_some_and(|token| token.valid) {
					stats.live_tokens += 1;
				}

				stats.total_monthly_usage += snapshot.usage;

				credentials.push(snapshot);
			}

			Ok(PoolSnapshot {
				taken_at: now,
				monthly_quota_limit: self.governor.quota.limit(),
				credentials,
				stats,
			})
		})
		.await
	}

	/// Read-only view of one credential.
	pub async fn credential_snapshot(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<CredentialSnapshot> {
		self.snapshot_of(credential, now).await
	}

	/// Discards the shared token and fetches a new one.
	pub async fn force_refresh(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<TokenView> {
		admin_op("force_refresh", async move {
			let credential = self.governor.credential(credential)?;
			let token = self.governor.tokens.force_refresh(credential, now).await?;

			Ok(TokenView::of(&token, now))
		})
		.await
	}

	/// Removes the health record, restoring the credential; returns `true` if one existed.
	pub async fn reset_health(&self, credential: &CredentialId) -> Result<bool> {
		admin_op("reset_health", async move {
			self.governor.credential(credential)?;
			self.governor.health.reset(credential).await
		})
		.await
	}

	/// Removes the shared token; returns `true` if one existed.
	pub async fn purge_token(&self, credential: &CredentialId) -> Result<bool> {
		admin_op("purge_token", async move {
			self.governor.credential(credential)?;

			Ok(self.governor.store.purge_token(credential).await?)
		})
		.await
	}

	/// Removes every shared token.
	pub async fn purge_all_tokens(&self) -> Result<PurgeReport> {
		self.purge("purge_all_tokens", PurgeScope::AllTokens).await
	}

	/// Removes every usage counter.
	pub async fn clear_usage(&self) -> Result<PurgeReport> {
		self.purge("clear_usage", PurgeScope::AllUsage).await
	}

	/// Removes records of credentials that are no longer configured.
	pub async fn purge_orphans(&self) -> Result<PurgeReport> {
		self.purge("purge_orphans", PurgeScope::Orphans { known: self.governor.pool.ids() }).await
	}

	async fn purge(&self, stage: &'static str, scope: PurgeScope) -> Result<PurgeReport> {
		admin_op(stage, async move { Ok(self.governor.store.purge(&scope).await?) }).await
	}

	async fn snapshot_of(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<CredentialSnapshot> {
		let governor = self.governor;
		let fingerprint = governor.credential(credential)?.fingerprint();
		let health = governor.health.state(credential).await?;
		let usage = governor.quota.usage(credential, now).await?.count;
		let limit = governor.quota.limit();
		let token = governor.tokens.peek(credential).await?;

		Ok(CredentialSnapshot {
			id: credential.clone(),
			fingerprint,
			next_retry_at: health.next_probe_at(governor.health.policy().check_interval),
			health,
			usage,
			remaining: limit.saturating_sub(usage),
			usage_percentage: if limit == 0 { 0. } else { usage as f64 * 100. / limit as f64 },
			token: token.as_ref().map(|token| TokenView::of(token, now)),
		})
	}
}

async fn admin_op<T, Fut>(stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	const KIND: OpKind = OpKind::Admin;

	let span = OpSpan::new(KIND, stage);

	obs::record_op_outcome(KIND, OpOutcome::Attempt);

	let result = span.instrument(fut).await;

	match &result {
		Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
		Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
	}

	result
}
