#![allow(dead_code)]

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, macros};
// self
use ocr_pool_governor::{
	auth::{Credential, CredentialId},
	config::{GovernorConfig, GovernorConfigBuilder},
	endpoint::{EndpointFuture, IssuedToken, TokenEndpoint},
	error::{Error, TransientError},
	governor::Governor,
	store::{GovernorStore, MemoryStore},
};

/// Fixed instant well inside a calendar month.
pub const T0: OffsetDateTime = macros::datetime!(2025-06-10 08:00 UTC);

/// How [`FakeTokenEndpoint`] fails, when told to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeFailure {
	InvalidClient,
	Transient,
}

/// Token endpoint double that counts calls and hands out `"{id}-token-{n}"` values.
#[derive(Debug)]
pub struct FakeTokenEndpoint {
	calls: AtomicUsize,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
	delay: std::time::Duration,
	expires_in: Duration,
	failure: Mutex<Option<FakeFailure>>,
}
impl FakeTokenEndpoint {
	pub fn new() -> Self {
		Self {
			calls: AtomicUsize::new(0),
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
			delay: std::time::Duration::ZERO,
			expires_in: Duration::days(30),
			failure: Mutex::new(None),
		}
	}

	pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
		self.delay = delay;

		self
	}

	pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
		self.expires_in = expires_in;

		self
	}

	pub fn fail_with(&self, failure: Option<FakeFailure>) {
		*self.failure.lock() = failure;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// Highest number of requests that were outstanding at the same time.
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}
}

// Counts a request as outstanding until it completes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);
impl<'a> InFlight<'a> {
	fn enter(endpoint: &'a FakeTokenEndpoint) -> Self {
		let now = endpoint.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		endpoint.max_in_flight.fetch_max(now, Ordering::SeqCst);

		Self(&endpoint.in_flight)
	}
}
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}
impl TokenEndpoint for FakeTokenEndpoint {
	fn request_token<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, IssuedToken> {
		Box::pin(async move {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			let _in_flight = InFlight::enter(self);

			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}

			let failure = *self.failure.lock();

			match failure {
				Some(FakeFailure::InvalidClient) =>
					Err(Error::InvalidClient { reason: "invalid_client: unknown client id".into() }),
				Some(FakeFailure::Transient) => Err(TransientError::TokenEndpoint {
					message: "service busy".into(),
					status: Some(503),
					retry_after: None,
				}
				.into()),
				None => Ok(IssuedToken::new(format!("{}-token-{n}", credential.id), self.expires_in)),
			}
		})
	}
}

pub fn id(value: &str) -> CredentialId {
	CredentialId::new(value).expect("Credential id fixture should be valid.")
}

pub fn credential(value: &str) -> Credential {
	Credential::new(value, format!("{value}-secret")).expect("Credential fixture should be valid.")
}

pub fn config<F>(ids: &[&str], configure: F) -> GovernorConfig
where
	F: FnOnce(GovernorConfigBuilder) -> GovernorConfigBuilder,
{
	configure(GovernorConfig::builder().credentials(ids.iter().copied().map(credential)))
		.build()
		.expect("Governor config fixture should validate.")
}

/// Governor over a fresh memory store and a fake endpoint.
pub fn governor<F>(
	ids: &[&str],
	configure: F,
) -> (Governor, Arc<MemoryStore>, Arc<FakeTokenEndpoint>)
where
	F: FnOnce(GovernorConfigBuilder) -> GovernorConfigBuilder,
{
	governor_with(ids, configure, FakeTokenEndpoint::new())
}

pub fn governor_with<F>(
	ids: &[&str],
	configure: F,
	endpoint: FakeTokenEndpoint,
) -> (Governor, Arc<MemoryStore>, Arc<FakeTokenEndpoint>)
where
	F: FnOnce(GovernorConfigBuilder) -> GovernorConfigBuilder,
{
	let store = Arc::new(MemoryStore::new());
	let endpoint = Arc::new(endpoint);
	let shared: Arc<dyn GovernorStore> = store.clone();
	let governor = Governor::new(config(ids, configure), shared, endpoint.clone())
		.expect("Governor fixture should wire up.");

	(governor, store, endpoint)
}
