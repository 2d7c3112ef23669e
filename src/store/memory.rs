//! Thread-safe in-memory [`GovernorStore`] for single-process deployments and tests.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialId},
	health::HealthState,
	quota::{UsagePeriod, UsageRecord},
	store::{
		CompareAndSwapOutcome, GovernorStore, PurgeReport, PurgeScope, RateAdmission,
		StoreFuture, TokenConsumption, UsageReservation, state::StoreState,
	},
};

type StateHandle = Arc<RwLock<StoreState>>;

/// In-process storage backend; clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StateHandle);
impl MemoryStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
impl GovernorStore for MemoryStore {
	fn load_cursor(&self) -> StoreFuture<'_, u64> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().cursor()) })
	}

	fn claim_tickets(&self, count: u64) -> StoreFuture<'_, u64> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().claim_tickets(count)) })
	}

	fn fetch_health<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<HealthState>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().health(credential)) })
	}

	fn compare_and_swap_health<'a>(
		&'a self,
		credential: &'a CredentialId,
		expected: Option<&'a HealthState>,
		replacement: HealthState,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let state = self.0.clone();

		Box::pin(async move {
			Ok(state.write().compare_and_swap_health(credential, expected, replacement))
		})
	}

	fn clear_health<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().clear_health(credential)) })
	}

	fn reserve_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
		ceiling: u64,
	) -> StoreFuture<'a, UsageReservation> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().reserve_usage(credential, period, ceiling)) })
	}

	fn release_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, u64> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().release_usage(credential, period)) })
	}

	fn fetch_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, Option<UsageRecord>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().usage(credential, period)) })
	}

	fn acquire_rate_slot<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
		limit: u32,
		window: Duration,
	) -> StoreFuture<'a, RateAdmission> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().acquire_rate_slot(credential, now, limit, window)) })
	}

	fn fetch_token<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<AccessToken>> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.read().token(credential)) })
	}

	fn consume_token<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
	) -> StoreFuture<'a, TokenConsumption> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().consume_token(credential, now)) })
	}

	fn publish_token(&self, token: AccessToken) -> StoreFuture<'_, ()> {
		let state = self.0.clone();

		Box::pin(async move {
			state.write().publish_token(token);

			Ok(())
		})
	}

	fn purge_token<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().purge_token(credential)) })
	}

	fn try_lock<'a>(
		&'a self,
		credential: &'a CredentialId,
		owner: &'a str,
		ttl: Duration,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().try_lock(credential, owner, ttl, now)) })
	}

	fn unlock<'a>(&'a self, credential: &'a CredentialId, owner: &'a str) -> StoreFuture<'a, bool> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().unlock(credential, owner)) })
	}

	fn purge<'a>(&'a self, scope: &'a PurgeScope) -> StoreFuture<'a, PurgeReport> {
		let state = self.0.clone();

		Box::pin(async move { Ok(state.write().purge(scope)) })
	}
}
