mod common;

// std
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};
// crates.io
use time::{Duration, OffsetDateTime};
// self
use common::{FakeFailure, FakeTokenEndpoint, T0, id};
use ocr_pool_governor::{
	auth::{AccessToken, CredentialId},
	error::Error,
	governor::Governor,
	health::{FailureKind, HealthMonitor, HealthPolicy, HealthState, HealthStatus},
	pool::CredentialPool,
	quota::{QuotaTracker, UsagePeriod, UsageRecord},
	rate_limit::RateLimiter,
	selector::{CredentialSkip, SkipReason, Selector},
	store::{
		CompareAndSwapOutcome, GovernorStore, MemoryStore, PurgeReport, PurgeScope, RateAdmission,
		StoreFuture, TokenConsumption, UsageReservation,
	},
	token::{TokenManager, TokenPolicy},
};

/// Memory store that yields to the scheduler before every operation, so concurrent passes
/// interleave at each store round trip the way they do against a networked backend.
struct YieldingStore(MemoryStore);
impl GovernorStore for YieldingStore {
	fn load_cursor(&self) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.load_cursor().await
		})
	}

	fn claim_tickets(&self, count: u64) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.claim_tickets(count).await
		})
	}

	fn fetch_health<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<HealthState>> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.fetch_health(credential).await
		})
	}

	fn compare_and_swap_health<'a>(
		&'a self,
		credential: &'a CredentialId,
		expected: Option<&'a HealthState>,
		replacement: HealthState,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.compare_and_swap_health(credential, expected, replacement).await
		})
	}

	fn clear_health<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.clear_health(credential).await
		})
	}

	fn reserve_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
		ceiling: u64,
	) -> StoreFuture<'a, UsageReservation> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.reserve_usage(credential, period, ceiling).await
		})
	}

	fn release_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, u64> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.release_usage(credential, period).await
		})
	}

	fn fetch_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, Option<UsageRecord>> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.fetch_usage(credential, period).await
		})
	}

	fn acquire_rate_slot<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
		limit: u32,
		window: Duration,
	) -> StoreFuture<'a, RateAdmission> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.acquire_rate_slot(credential, now, limit, window).await
		})
	}

	fn fetch_token<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<AccessToken>> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.fetch_token(credential).await
		})
	}

	fn consume_token<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
	) -> StoreFuture<'a, TokenConsumption> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.consume_token(credential, now).await
		})
	}

	fn publish_token(&self, token: AccessToken) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.publish_token(token).await
		})
	}

	fn purge_token<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.purge_token(credential).await
		})
	}

	fn try_lock<'a>(
		&'a self,
		credential: &'a CredentialId,
		owner: &'a str,
		ttl: Duration,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.try_lock(credential, owner, ttl, now).await
		})
	}

	fn unlock<'a>(&'a self, credential: &'a CredentialId, owner: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.unlock(credential, owner).await
		})
	}

	fn purge<'a>(&'a self, scope: &'a PurgeScope) -> StoreFuture<'a, PurgeReport> {
		Box::pin(async move {
			tokio::task::yield_now().await;
			self.0.purge(scope).await
		})
	}
}

fn skipped(err: Error) -> (Vec<CredentialSkip>, Option<Duration>) {
	match err {
		Error::AllCredentialsUnavailable { skipped, retry_after } => (skipped, retry_after),
		other => panic!("Unexpected error: {other:?}."),
	}
}

#[tokio::test]
async fn unhealthy_credentials_are_skipped_until_their_probe() {
	let (governor, _, _) = common::governor(&["key-a", "key-b"], |builder| builder);
	let (a, b) = (id("key-a"), id("key-b"));
	let pick = |now| {
		let governor = governor.clone();

		async move {
			governor.select(now).await.expect("Selection should succeed.").credential.id
		}
	};

	assert_eq!(pick(T0).await, a);
	assert_eq!(pick(T0).await, b);

	for _ in 0..3 {
		governor.record_failure(&a, T0, FailureKind::Transient).await.expect("Failure recorded.");
	}

	assert!(!governor.health().is_eligible(&a, T0).await.expect("Eligibility loads."));

	for second in 1..=10 {
		assert_eq!(pick(T0 + Duration::seconds(second)).await, b);
	}

	let probe_at = T0 + Duration::hours(1);

	assert_eq!(pick(probe_at).await, a);
	assert_eq!(
		governor.health().state(&a).await.expect("State loads.").status,
		HealthStatus::Probation
	);
	// The probe is still in flight, so nobody else gets A.
	assert_eq!(pick(probe_at + Duration::seconds(1)).await, b);

	governor.record_success(&a, probe_at + Duration::seconds(2)).await.expect("Success recorded.");

	assert_eq!(pick(probe_at + Duration::seconds(3)).await, a);
	assert_eq!(pick(probe_at + Duration::seconds(3)).await, b);
}

#[tokio::test]
async fn round_robin_spreads_selections_evenly() {
	let ids = ["key-a", "key-b", "key-c"];
	let (governor, _, _) = common::governor(&ids, |builder| builder);
	let mut counts = HashMap::new();

	for second in 0..300 {
		let selection = governor
			.select(T0 + Duration::seconds(second))
			.await
			.expect("Selection should succeed.");

		*counts.entry(selection.credential.id).or_insert(0) += 1;
	}

	for value in ids {
		assert_eq!(counts.get(&id(value)), Some(&100));
	}
}

#[tokio::test]
async fn rate_limited_candidates_return_their_quota_and_report_a_hint() {
	let (governor, _, _) = common::governor(&["key-a"], |builder| builder.qps_limit(1));
	let a = id("key-a");

	governor.select(T0).await.expect("First selection should succeed.");

	let later = T0 + Duration::milliseconds(250);
	let (skips, retry_after) =
		skipped(governor.select(later).await.expect_err("The window should be full."));

	assert_eq!(skips, vec![CredentialSkip { credential: a.clone(), reason: SkipReason::RateLimitExceeded }]);
	assert_eq!(retry_after, Some(Duration::milliseconds(750)));
	assert_eq!(governor.quota().usage(&a, later).await.expect("Usage loads.").count, 1);
}

#[tokio::test]
async fn exhausted_pool_lists_every_skip_reason() {
	let (governor, _, endpoint) =
		common::governor(&["key-a", "key-b", "key-c"], |builder| builder.monthly_quota_limit(1));
	let (a, b, c) = (id("key-a"), id("key-b"), id("key-c"));

	for _ in 0..3 {
		governor.record_failure(&a, T0, FailureKind::Transient).await.expect("Failure recorded.");
	}

	assert!(governor.quota().try_reserve(&b, T0).await.expect("Reservation works."));

	endpoint.fail_with(Some(FakeFailure::Transient));

	let (skips, retry_after) =
		skipped(governor.select(T0).await.expect_err("Nothing should be available."));

	assert_eq!(
		skips,
		vec![
			CredentialSkip { credential: a, reason: SkipReason::Unhealthy },
			CredentialSkip { credential: b, reason: SkipReason::QuotaExceeded },
			CredentialSkip { credential: c.clone(), reason: SkipReason::TokenFetchFailed },
		]
	);
	assert_eq!(retry_after, None);

	// The failed candidate gave its quota back and took a health strike.
	assert_eq!(governor.quota().usage(&c, T0).await.expect("Usage loads.").count, 0);

	let health = governor.health().state(&c).await.expect("State loads.");

	assert_eq!(health.consecutive_errors, 1);
	assert!(health.last_error.is_some_and(|message| message.contains("service busy")));
}

#[tokio::test]
async fn critical_token_failures_trip_immediately() {
	let (governor, _, endpoint) = common::governor(&["key-a"], |builder| builder);
	let a = id("key-a");

	endpoint.fail_with(Some(FakeFailure::InvalidClient));

	let (skips, _) = skipped(governor.select(T0).await.expect_err("The fetch should fail."));

	assert_eq!(skips[0].reason, SkipReason::TokenFetchFailed);
	assert_eq!(
		governor.health().state(&a).await.expect("State loads.").status,
		HealthStatus::Unhealthy
	);

	endpoint.fail_with(None);

	let (skips, _) = skipped(
		governor.select(T0 + Duration::seconds(1)).await.expect_err("A should stay excluded."),
	);

	assert_eq!(skips[0].reason, SkipReason::Unhealthy);
	assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn empty_pools_report_no_skips() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let selector = Selector::new(
		CredentialPool::new(Vec::new()).expect("Empty pools are structurally valid."),
		store.clone(),
		Arc::new(HealthMonitor::new(store.clone(), HealthPolicy::default())),
		Arc::new(QuotaTracker::new(store.clone(), 10)),
		Arc::new(RateLimiter::new(store.clone(), 2)),
		Arc::new(TokenManager::new(store, Arc::new(FakeTokenEndpoint::new()), TokenPolicy::default())),
	);
	let (skips, retry_after) =
		skipped(selector.select(T0).await.expect_err("An empty pool has nothing to offer."));

	assert!(skips.is_empty());
	assert_eq!(retry_after, None);
}

#[tokio::test]
async fn concurrent_passes_start_on_different_credentials() {
	let ids = ["key-a", "key-b", "key-c", "key-d"];
	let governor = Governor::new(
		common::config(&ids, |builder| builder.qps_limit(10)),
		Arc::new(YieldingStore(MemoryStore::new())),
		Arc::new(FakeTokenEndpoint::new()),
	)
	.expect("Governor should wire up.");
	let (a, b, c, d) = tokio::join!(
		governor.select(T0),
		governor.select(T0),
		governor.select(T0),
		governor.select(T0),
	);
	let picked = [a, b, c, d]
		.into_iter()
		.map(|selection| selection.expect("Selection should succeed.").credential.id)
		.collect::<HashSet<_>>();

	assert_eq!(picked, ids.iter().copied().map(id).collect::<HashSet<_>>());
}

#[tokio::test]
async fn passes_resume_after_the_credential_they_picked() {
	let (governor, _, _) = common::governor(&["key-a", "key-b", "key-c"], |builder| builder);
	let a = id("key-a");

	for _ in 0..3 {
		governor.record_failure(&a, T0, FailureKind::Transient).await.expect("Failure recorded.");
	}

	let mut picked = Vec::new();

	for second in 0..4 {
		let selection = governor
			.select(T0 + Duration::seconds(second))
			.await
			.expect("Selection should succeed.");

		picked.push(selection.credential.id);
	}

	assert_eq!(picked, vec![id("key-b"), id("key-c"), id("key-b"), id("key-c")]);
}
