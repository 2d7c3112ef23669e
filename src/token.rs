//! Shared access tokens with bounded reuse and deduplicated refresh.
//!
//! Every hand-out is one atomic consume in the store. When the shared token is missing, expired,
//! or used up, a refresh runs under two layers of deduplication: a per-credential async mutex
//! collapses concurrent handlers inside this process, and an expiring store lock
//! (`lock:token:{id}`) collapses processes sharing the store. Waiters poll the store for the
//! holder's token and give up after a bounded wait.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use rand::{Rng, distr::Alphanumeric};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credential, CredentialId},
	endpoint::TokenEndpoint,
	error::{ConfigError, TransientError},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::{GovernorStore, TokenConsumption},
};

const LOCK_OWNER_LEN: usize = 24;
const MAX_LEASE_MARGIN: Duration = Duration::SECOND;

/// Token reuse and refresh coordination settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenPolicy {
	/// Hand-outs per token before a refresh is forced.
	pub max_uses: u32,
	/// Safety margin subtracted from endpoint lifetimes.
	pub expiry_margin: Duration,
	/// Lease of the cross-process refresh lock.
	pub lock_ttl: Duration,
	/// Longest a waiter polls for another holder's token.
	pub wait_timeout: Duration,
	/// Poll cadence while waiting.
	pub poll_interval: Duration,
}
impl TokenPolicy {
	/// Lifetime stored for a token the endpoint says lives `expires_in`.
	///
	/// The margin only applies when the lifetime is more than twice the margin.
	pub fn effective_lifetime(&self, expires_in: Duration) -> Duration {
		if expires_in > self.expiry_margin * 2 { expires_in - self.expiry_margin } else { expires_in }
	}

	/// Longest a holder may spend on one endpoint call.
	///
	/// Ends before the refresh lock lease so no other process can take the lock while a fetch is
	/// still outstanding.
	pub fn fetch_budget(&self) -> Duration {
		self.lock_ttl - (self.lock_ttl / 10_i32).min(MAX_LEASE_MARGIN)
	}
}
impl Default for TokenPolicy {
	fn default() -> Self {
		Self {
			max_uses: 900,
			expiry_margin: Duration::seconds(30),
			lock_ttl: Duration::seconds(30),
			wait_timeout: Duration::seconds(10),
			poll_interval: Duration::milliseconds(50),
		}
	}
}

/// Hands out shared tokens and coordinates refreshes.
pub struct TokenManager {
	store: Arc<dyn GovernorStore>,
	endpoint: Arc<dyn TokenEndpoint>,
	policy: TokenPolicy,
	metrics: Arc<RefreshMetrics>,
	guards: Mutex<HashMap<CredentialId, Arc<AsyncMutex<()>>>>,
}
impl TokenManager {
	/// Creates a manager over the shared store and upstream endpoint.
	pub fn new(
		store: Arc<dyn GovernorStore>,
		endpoint: Arc<dyn TokenEndpoint>,
		policy: TokenPolicy,
	) -> Self {
		Self {
			store,
			endpoint,
			policy,
			metrics: Default::default(),
			guards: Default::default(),
		}
	}

	/// Active policy.
	pub fn policy(&self) -> &TokenPolicy {
		&self.policy
	}

	/// Refresh counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Returns the stored token without consuming a use.
	pub async fn peek(&self, credential: &CredentialId) -> Result<Option<AccessToken>> {
		Ok(self.store.fetch_token(credential).await?)
	}

	/// Returns a valid token for the credential, consuming one use.
	///
	/// The returned copy carries the post-increment `use_count`.
	pub async fn get_valid_token(
		&self,
		credential: &Credential,
		now: OffsetDateTime,
	) -> Result<AccessToken> {
		if let Some(token) = self.try_consume(&credential.id, now).await? {
			return Ok(token);
		}

		self.refresh(credential, now, false).await
	}

	/// Discards the cached token and fetches a new one under the same lock protocol.
	pub async fn force_refresh(
		&self,
		credential: &Credential,
		now: OffsetDateTime,
	) -> Result<AccessToken> {
		self.refresh(credential, now, true).await
	}

	async fn refresh(
		&self,
		credential: &Credential,
		now: OffsetDateTime,
		force: bool,
	) -> Result<AccessToken> {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, if force { "force_refresh" } else { "get_valid_token" });

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				self.metrics.record_attempt();

				let outcome = self.refresh_deduplicated(credential, now, force).await;

				match &outcome {
					Ok(_) => self.metrics.record_success(),
					Err(_) => self.metrics.record_failure(),
				}

				outcome
			})
			.await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn refresh_deduplicated(
		&self,
		credential: &Credential,
		now: OffsetDateTime,
		force: bool,
	) -> Result<AccessToken> {
		let id = &credential.id;
		let guard = self.flow_guard(id);
		let started = Instant::now();
		// The in-process wait shares the budget with the store lock wait below.
		let (_singleflight, mut waited) = match guard.try_lock() {
			Some(held) => (held, false),
			None => match tokio::time::timeout(self.policy.wait_timeout.unsigned_abs(), guard.lock())
				.await
			{
				Ok(held) => (held, true),
				Err(_) => return self.give_up_waiting(id, now, started).await,
			},
		};

		if force {
			if waited {
				// The holder we queued behind already replaced the token.
				if let Some(token) = self.try_consume(id, now + elapsed(started)).await? {
					return Ok(token);
				}
			}

			self.store.purge_token(id).await?;
		} else if let Some(token) = self.try_consume(id, now + elapsed(started)).await? {
			return Ok(token);
		}

		let owner = lock_owner();

		while !self.store.try_lock(id, &owner, self.policy.lock_ttl, now + elapsed(started)).await? {
			if elapsed(started) >= self.policy.wait_timeout {
				return self.give_up_waiting(id, now, started).await;
			}

			waited = true;

			tokio::time::sleep(self.policy.poll_interval.unsigned_abs()).await;

			if let Some(token) = self.try_consume(id, now + elapsed(started)).await? {
				return Ok(token);
			}
		}

		let at = now + elapsed(started);
		let outcome: Result<AccessToken> = async {
			// Another holder may have published right before releasing the lock.
			if !force || waited {
				if let Some(token) = self.try_consume(id, at).await? {
					return Ok(token);
				}
			}

			self.fetch_and_publish(credential, at).await
		}
		.await;

		if let Err(err) = self.store.unlock(id, &owner).await {
			obs::trace_unlock_failure(id, &Error::from(err));
		}

		outcome
	}

	async fn fetch_and_publish(
		&self,
		credential: &Credential,
		at: OffsetDateTime,
	) -> Result<AccessToken> {
		let id = &credential.id;

		self.metrics.record_endpoint_call();

		let budget = self.policy.fetch_budget();
		let request = self.endpoint.request_token(credential);
		let issued = tokio::time::timeout(budget.unsigned_abs(), request)
			.await
			.map_err(|_| fetch_failed(id, lease_exceeded(budget)))?
			.map_err(|source| fetch_failed(id, source))?;
		let token = AccessToken::builder(id.clone())
			.access_token(issued.access_token.expose())
			.issued_at(at)
			.expires_in(self.policy.effective_lifetime(issued.expires_in))
			.max_uses(self.policy.max_uses)
			.use_count(1)
			.build()
			.map_err(|err| fetch_failed(id, ConfigError::from(err).into()))?;

		self.store.publish_token(token.clone()).await?;
		obs::trace_refreshed(id, token.expires_at);

		Ok(token)
	}

	// A last look for the token the holder may have published before the budget ran out.
	async fn give_up_waiting(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
		started: Instant,
	) -> Result<AccessToken> {
		let spent = elapsed(started);

		if let Some(token) = self.try_consume(credential, now + spent).await? {
			return Ok(token);
		}

		obs::trace_lock_timeout(credential, spent);

		Err(Error::LockTimeout { credential: credential.clone(), waited: spent })
	}

	async fn try_consume(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<Option<AccessToken>> {
		Ok(match self.store.consume_token(credential, now).await? {
			TokenConsumption::Granted(token) => Some(token),
			TokenConsumption::Stale(_) | TokenConsumption::Missing => None,
		})
	}

	fn flow_guard(&self, credential: &CredentialId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(credential.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("policy", &self.policy)
			.field("metrics", &self.metrics)
			.finish()
	}
}

fn fetch_failed(credential: &CredentialId, source: Error) -> Error {
	Error::TokenFetchFailed { credential: credential.clone(), source: Box::new(source) }
}

fn lease_exceeded(budget: Duration) -> Error {
	TransientError::TokenEndpoint {
		message: format!("no response within the {budget} refresh lease"),
		status: None,
		retry_after: None,
	}
	.into()
}

fn lock_owner() -> String {
	rand::rng().sample_iter(Alphanumeric).take(LOCK_OWNER_LEN).map(char::from).collect()
}

fn elapsed(started: Instant) -> Duration {
	Duration::try_from(started.elapsed()).unwrap_or(Duration::ZERO)
}
