//! Process-wide governor handle wiring every component over one shared store.

// self
use crate::{
	_prelude::*,
	admin::Admin,
	auth::{Credential, CredentialId},
	config::GovernorConfig,
	endpoint::TokenEndpoint,
	health::{FailureKind, HealthMonitor, HealthState},
	obs::{self, OpKind, OpOutcome, OpSpan},
	pool::CredentialPool,
	quota::QuotaTracker,
	rate_limit::RateLimiter,
	selector::{Selection, Selector},
	store::GovernorStore,
	token::TokenManager,
};
#[cfg(feature = "reqwest")]
use crate::endpoint::ReqwestTokenEndpoint;

/// How an upstream OCR call that used a [`Selection`] ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
	/// The call completed successfully.
	Succeeded,
	/// The call completed with an error; the quota unit stays consumed.
	Failed {
		/// Upstream error text, classified for critical markers.
		message: String,
	},
	/// The call timed out; counts as a failure.
	TimedOut,
	/// The call was abandoned before dispatch; the quota unit is returned.
	Cancelled,
}
impl CallOutcome {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(&self) -> &'static str {
		match self {
			CallOutcome::Succeeded => "succeeded",
			CallOutcome::Failed { .. } => "failed",
			CallOutcome::TimedOut => "timed_out",
			CallOutcome::Cancelled => "cancelled",
		}
	}

	/// Error describing a failed call, if the outcome is a failure.
	pub fn to_error(&self, credential: &CredentialId) -> Option<Error> {
		let reason = match self {
			CallOutcome::Failed { message } => message.clone(),
			CallOutcome::TimedOut => "upstream call timed out".into(),
			CallOutcome::Succeeded | CallOutcome::Cancelled => return None,
		};

		Some(Error::UpstreamCallFailed { credential: credential.clone(), reason })
	}
}

/// Shared governor state handle; clones share every component.
#[derive(Clone)]
pub struct Governor {
	pub(crate) pool: CredentialPool,
	pub(crate) store: Arc<dyn GovernorStore>,
	pub(crate) health: Arc<HealthMonitor>,
	pub(crate) quota: Arc<QuotaTracker>,
	pub(crate) tokens: Arc<TokenManager>,
	selector: Arc<Selector>,
	ocr_endpoint: Url,
}
impl Governor {
	/// Wires a governor from validated configuration, a store, and a token endpoint.
	pub fn new(
		config: GovernorConfig,
		store: Arc<dyn GovernorStore>,
		endpoint: Arc<dyn TokenEndpoint>,
	) -> Result<Self> {
		let pool = CredentialPool::new(config.credentials)?;
		let health = Arc::new(HealthMonitor::new(store.clone(), config.health));
		let quota = Arc::new(QuotaTracker::new(store.clone(), config.monthly_quota_limit));
		let rate = Arc::new(RateLimiter::new(store.clone(), config.qps_limit));
		let tokens = Arc::new(TokenManager::new(store.clone(), endpoint, config.token));
		let selector = Arc::new(Selector::new(
			pool.clone(),
			store.clone(),
			health.clone(),
			quota.clone(),
			rate,
			tokens.clone(),
		));

		Ok(Self { pool, store, health, quota, tokens, selector, ocr_endpoint: config.ocr_endpoint })
	}

	/// Wires a governor whose tokens come from the configured reqwest endpoint.
	#[cfg(feature = "reqwest")]
	pub fn with_reqwest(config: GovernorConfig, store: Arc<dyn GovernorStore>) -> Result<Self> {
		let endpoint = ReqwestTokenEndpoint::new(config.token_endpoint.clone())?;

		Self::new(config, store, Arc::new(endpoint))
	}

	/// Configured pool.
	pub fn pool(&self) -> &CredentialPool {
		&self.pool
	}

	/// Health monitor shared with the selector.
	pub fn health(&self) -> &HealthMonitor {
		&self.health
	}

	/// Quota tracker shared with the selector.
	pub fn quota(&self) -> &QuotaTracker {
		&self.quota
	}

	/// Token manager shared with the selector.
	pub fn tokens(&self) -> &TokenManager {
		&self.tokens
	}

	/// OCR endpoint callers should send the selected token to.
	pub fn ocr_endpoint(&self) -> &Url {
		&self.ocr_endpoint
	}

	/// Picks a credential and a ready token.
	pub async fn select(&self, now: OffsetDateTime) -> Result<Selection> {
		self.selector.select(now).await
	}

	/// Records a successful upstream call.
	pub async fn record_success(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<HealthState> {
		self.credential(credential)?;
		self.health.record_success(credential, now).await
	}

	/// Records a failed upstream call.
	pub async fn record_failure(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
		kind: FailureKind,
	) -> Result<HealthState> {
		self.credential(credential)?;
		self.health.record_failure(credential, now, kind).await
	}

	/// Returns the quota unit held by an undispatched selection; returns the new count.
	pub async fn release(&self, selection: &Selection) -> Result<u64> {
		self.quota.release_in(&selection.credential.id, selection.period).await
	}

	/// Feeds the outcome of the upstream call back into health and quota bookkeeping.
	pub async fn report(
		&self,
		selection: &Selection,
		outcome: CallOutcome,
		now: OffsetDateTime,
	) -> Result<()> {
		const KIND: OpKind = OpKind::Report;

		let span = OpSpan::new(KIND, outcome.as_str());

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let id = &selection.credential.id;

				match outcome.to_error(id) {
					Some(err) => {
						self.health
							.record_failure_with(
								id,
								now,
								FailureKind::from(&err),
								Some(&failure_reason(&err)),
							)
							.await?;
					},
					None if outcome == CallOutcome::Cancelled => {
						self.release(selection).await?;
					},
					None => {
						self.health.record_success(id, now).await?;
					},
				}

				obs::record_upstream(id, outcome.as_str());

				Ok(())
			})
			.await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Administrative views and maintenance.
	pub fn admin(&self) -> Admin<'_> {
		Admin::new(self)
	}

	pub(crate) fn credential(&self, credential: &CredentialId) -> Result<&Credential> {
		self.pool
			.get(credential)
			.ok_or_else(|| Error::UnknownCredential { credential: credential.clone() })
	}
}
impl Debug for Governor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Governor")
			.field("pool_len", &self.pool.len())
			.field("quota", &self.quota)
			.field("tokens", &self.tokens)
			.field("ocr_endpoint", &self.ocr_endpoint.as_str())
			.finish()
	}
}

fn failure_reason(error: &Error) -> String {
	match error {
		Error::UpstreamCallFailed { reason, .. } => reason.clone(),
		other => other.to_string(),
	}
}
