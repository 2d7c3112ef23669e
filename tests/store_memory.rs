mod common;

// std
use std::{collections::HashSet, sync::Arc};
// crates.io
use time::{Duration, macros};
// self
use common::id;
use ocr_pool_governor::{
	auth::{AccessToken, TokenStatus},
	health::{FailureKind, HealthMonitor, HealthPolicy},
	quota::{QuotaTracker, UsagePeriod},
	rate_limit::RateLimiter,
	store::{GovernorStore, MemoryStore, PurgeReport, PurgeScope, TokenConsumption},
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_exceed_the_ceiling() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let quota = Arc::new(QuotaTracker::new(store.clone(), 25));
	let credential = id("key-a");
	let mut handles = Vec::new();

	for _ in 0..100 {
		let quota = quota.clone();
		let credential = credential.clone();

		handles.push(tokio::spawn(async move {
			quota.try_reserve(&credential, common::T0).await.expect("Reservation should not fail.")
		}));
	}

	let mut granted = 0;

	for handle in handles {
		if handle.await.expect("Reservation task should not panic.") {
			granted += 1;
		}
	}

	assert_eq!(granted, 25);
	assert_eq!(quota.usage(&credential, common::T0).await.expect("Usage should load.").count, 25);
	assert_eq!(quota.remaining(&credential, common::T0).await.expect("Usage should load."), 0);
}

#[tokio::test]
async fn quota_resets_with_the_calendar_month_and_releases_hit_the_reserving_period() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let quota = QuotaTracker::new(store, 1000);
	let credential = id("key-a");
	let june = macros::datetime!(2025-06-30 23:59:59 UTC);
	let july = macros::datetime!(2025-07-01 00:00:00 UTC);

	for _ in 0..1000 {
		assert!(quota.try_reserve(&credential, june).await.expect("Reservation should not fail."));
	}

	assert!(!quota.try_reserve(&credential, june).await.expect("Reservation should not fail."));
	assert!(quota.try_reserve(&credential, july).await.expect("Reservation should not fail."));
	assert_eq!(quota.usage(&credential, july).await.expect("Usage should load.").count, 1);

	// A June reservation cancelled in July goes back to June.
	let june_period = UsagePeriod::from(june);

	assert_eq!(quota.release_in(&credential, june_period).await.expect("Release works."), 999);
	assert_eq!(quota.usage(&credential, july).await.expect("Usage should load.").count, 1);
}

#[tokio::test]
async fn releases_never_underflow() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let quota = QuotaTracker::new(store, 10);
	let credential = id("key-a");

	assert_eq!(quota.release(&credential, common::T0).await.expect("Release works."), 0);
	assert!(quota.try_reserve(&credential, common::T0).await.expect("Reservation works."));
	assert_eq!(quota.release(&credential, common::T0).await.expect("Release works."), 0);
	assert_eq!(quota.release(&credential, common::T0).await.expect("Release works."), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rate_acquisitions_respect_the_window() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let limiter = Arc::new(RateLimiter::new(store, 2));
	let credential = id("key-a");
	let mut handles = Vec::new();

	for i in 0..40 {
		let limiter = limiter.clone();
		let credential = credential.clone();
		let now = common::T0 + Duration::milliseconds(i % 10);

		handles.push(tokio::spawn(async move {
			limiter.try_acquire(&credential, now).await.expect("Acquire should not fail.")
		}));
	}

	let mut admitted = 0;

	for handle in handles {
		if handle.await.expect("Acquire task should not panic.") {
			admitted += 1;
		}
	}

	assert_eq!(admitted, 2);
	assert!(
		limiter
			.try_acquire(&credential, common::T0 + Duration::seconds(2))
			.await
			.expect("Acquire should not fail.")
	);
}

#[tokio::test]
async fn consumption_never_hands_out_exhausted_or_expired_tokens() {
	let store = MemoryStore::new();
	let credential = id("key-a");
	let token = AccessToken::builder(credential.clone())
		.access_token("value")
		.issued_at(common::T0)
		.expires_in(Duration::minutes(5))
		.max_uses(2)
		.build()
		.expect("Token fixture should build.");

	store.publish_token(token).await.expect("Publish works.");

	for expected in 1..=2 {
		match store.consume_token(&credential, common::T0).await.expect("Consume works.") {
			TokenConsumption::Granted(token) => assert_eq!(token.use_count, expected),
			other => panic!("Unexpected consumption: {other:?}."),
		}
	}

	assert_eq!(
		store.consume_token(&credential, common::T0).await.expect("Consume works."),
		TokenConsumption::Stale(TokenStatus::Exhausted)
	);

	let fresh = AccessToken::builder(credential.clone())
		.access_token("value-2")
		.issued_at(common::T0)
		.expires_in(Duration::minutes(5))
		.max_uses(10)
		.build()
		.expect("Token fixture should build.");

	store.publish_token(fresh).await.expect("Publish works.");

	assert_eq!(
		store
			.consume_token(&credential, common::T0 + Duration::minutes(5))
			.await
			.expect("Consume works."),
		TokenConsumption::Stale(TokenStatus::Expired)
	);
	assert_eq!(
		store.consume_token(&id("key-b"), common::T0).await.expect("Consume works."),
		TokenConsumption::Missing
	);
}

#[tokio::test]
async fn refresh_locks_are_owner_checked_and_expire() {
	let store = MemoryStore::new();
	let credential = id("key-a");
	let ttl = Duration::seconds(30);

	assert!(store.try_lock(&credential, "owner-a", ttl, common::T0).await.expect("Lock works."));
	assert!(!store.try_lock(&credential, "owner-b", ttl, common::T0).await.expect("Lock works."));
	assert!(!store.unlock(&credential, "owner-b").await.expect("Unlock works."));
	assert!(
		store
			.try_lock(&credential, "owner-b", ttl, common::T0 + ttl)
			.await
			.expect("Expired locks may be taken over.")
	);
	assert!(!store.unlock(&credential, "owner-a").await.expect("Unlock works."));
	assert!(store.unlock(&credential, "owner-b").await.expect("Unlock works."));
}

#[tokio::test]
async fn orphan_purge_removes_only_unknown_ids() {
	let store: Arc<dyn GovernorStore> = Arc::new(MemoryStore::new());
	let quota = QuotaTracker::new(store.clone(), 10);
	let health = HealthMonitor::new(store.clone(), HealthPolicy::default());
	let kept = id("key-a");
	let dropped = id("key-gone");

	for credential in [&kept, &dropped] {
		quota.try_reserve(credential, common::T0).await.expect("Reservation works.");
		health
			.record_failure(credential, common::T0, FailureKind::Transient)
			.await
			.expect("Failure is recorded.");
		store
			.publish_token(
				AccessToken::builder(credential.clone())
					.access_token("value")
					.issued_at(common::T0)
					.expires_in(Duration::hours(1))
					.build()
					.expect("Token fixture should build."),
			)
			.await
			.expect("Publish works.");
	}

	let report = store
		.purge(&PurgeScope::Orphans { known: HashSet::from([kept.clone()]) })
		.await
		.expect("Purge works.");

	assert_eq!(report, PurgeReport { tokens: 1, health: 1, usage: 1 });
	assert!(store.fetch_token(&kept).await.expect("Fetch works.").is_some());
	assert!(store.fetch_token(&dropped).await.expect("Fetch works.").is_none());
	assert_eq!(health.state(&kept).await.expect("State loads.").consecutive_errors, 1);
	assert_eq!(health.state(&dropped).await.expect("State loads.").consecutive_errors, 0);
	assert_eq!(quota.usage(&dropped, common::T0).await.expect("Usage loads.").count, 0);
}
