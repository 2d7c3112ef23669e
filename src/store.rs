//! Shared-state contracts and built-in store implementations.
//!
//! Every mutation that more than one handler or process may race on is a single atomic store
//! operation: quota reservation, rate admission, token consumption, health compare-and-swap,
//! lock acquisition, and cursor ticket claims. Callers never read-modify-write shared state.

pub mod file;
pub mod memory;

mod state;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialId, TokenStatus},
	health::HealthState,
	quota::{UsagePeriod, UsageRecord},
};

/// Boxed future returned by every [`GovernorStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract shared by every governor component.
pub trait GovernorStore
where
	Self: Send + Sync,
{
	/// Reads the round-robin cursor ticket.
	fn load_cursor(&self) -> StoreFuture<'_, u64>;

	/// Atomically claims `count` consecutive tickets and returns the first one.
	///
	/// Concurrent callers always receive disjoint ranges.
	fn claim_tickets(&self, count: u64) -> StoreFuture<'_, u64>;

	/// Fetches the health record for a credential, if any.
	fn fetch_health<'a>(&'a self, credential: &'a CredentialId)
	-> StoreFuture<'a, Option<HealthState>>;

	/// Replaces the health record only if it still equals `expected` (`None` means absent).
	fn compare_and_swap_health<'a>(
		&'a self,
		credential: &'a CredentialId,
		expected: Option<&'a HealthState>,
		replacement: HealthState,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Deletes the health record; returns `true` if one existed.
	fn clear_health<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool>;

	/// Increments the period counter only while it stays at or below `ceiling`.
	fn reserve_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
		ceiling: u64,
	) -> StoreFuture<'a, UsageReservation>;

	/// Decrements the period counter, saturating at zero; returns the new count.
	fn release_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, u64>;

	/// Fetches the period counter, if any calls were recorded.
	fn fetch_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, Option<UsageRecord>>;

	/// Admits one call into the sliding window ending at `now` when fewer than `limit` calls
	/// fall inside it.
	fn acquire_rate_slot<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
		limit: u32,
		window: Duration,
	) -> StoreFuture<'a, RateAdmission>;

	/// Fetches the shared token without consuming a use.
	fn fetch_token<'a>(&'a self, credential: &'a CredentialId)
	-> StoreFuture<'a, Option<AccessToken>>;

	/// Atomically checks validity and increments `use_count` of the shared token.
	fn consume_token<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
	) -> StoreFuture<'a, TokenConsumption>;

	/// Publishes (or replaces) the shared token of its credential.
	fn publish_token(&self, token: AccessToken) -> StoreFuture<'_, ()>;

	/// Deletes the shared token; returns `true` if one existed.
	fn purge_token<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool>;

	/// Acquires the refresh lock for `owner` unless a different owner holds an unexpired lease.
	fn try_lock<'a>(
		&'a self,
		credential: &'a CredentialId,
		owner: &'a str,
		ttl: Duration,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool>;

	/// Releases the refresh lock if `owner` still holds it.
	fn unlock<'a>(&'a self, credential: &'a CredentialId, owner: &'a str) -> StoreFuture<'a, bool>;

	/// Bulk removal used by administrative maintenance.
	fn purge<'a>(&'a self, scope: &'a PurgeScope) -> StoreFuture<'a, PurgeReport>;
}

/// Result of a health compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The record matched the expected value and was replaced.
	Updated,
	/// The record differs from the expected value.
	StateMismatch,
	/// A record was expected but none exists.
	Missing,
}

/// Result of a quota reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageReservation {
	/// The counter was incremented to `count`.
	Reserved {
		/// Counter value after the increment.
		count: u64,
	},
	/// The counter already sits at the ceiling.
	Exhausted {
		/// Unchanged counter value.
		count: u64,
	},
}

/// Result of a rate admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateAdmission {
	/// The call was recorded in the window.
	Admitted {
		/// Calls inside the window including this one.
		in_window: u32,
	},
	/// The window is full.
	Rejected {
		/// Instant the oldest recorded call leaves the window.
		retry_at: OffsetDateTime,
	},
}

/// Result of an atomic token consumption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenConsumption {
	/// The token was valid; the returned copy carries the incremented count.
	Granted(AccessToken),
	/// A token exists but can no longer be handed out.
	Stale(TokenStatus),
	/// No token is stored.
	Missing,
}

/// Selection of state removed by [`GovernorStore::purge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurgeScope {
	/// Every shared token.
	AllTokens,
	/// Every usage counter of every period.
	AllUsage,
	/// Tokens, health records, and usage counters of ids outside `known`.
	Orphans {
		/// Ids that are still configured.
		known: HashSet<CredentialId>,
	},
}

/// Counts of records removed by a purge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
	/// Removed tokens.
	pub tokens: usize,
	/// Removed health records.
	pub health: usize,
	/// Removed usage counters.
	pub usage: usize,
}
impl PurgeReport {
	/// Total records removed.
	pub fn total(&self) -> usize {
		self.tokens + self.health + self.usage
	}
}

/// Error type produced by [`GovernorStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A compare-and-swap loop kept losing against concurrent writers.
	#[error("Gave up updating `{key}` under contention.")]
	Contention {
		/// Logical key that could not be updated.
		key: String,
	},
}

/// Logical key layout shared by every backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreKey {
	/// `token:{id}`
	Token(CredentialId),
	/// `usage:{id}:{YYYY-MM}`
	Usage(CredentialId, UsagePeriod),
	/// `health:{id}`
	Health(CredentialId),
	/// `ratelimit:{id}`
	RateLimit(CredentialId),
	/// `lock:token:{id}`
	TokenLock(CredentialId),
	/// `rr:cursor`
	Cursor,
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			StoreKey::Token(id) => write!(f, "token:{id}"),
			StoreKey::Usage(id, period) => write!(f, "usage:{id}:{period}"),
			StoreKey::Health(id) => write!(f, "health:{id}"),
			StoreKey::RateLimit(id) => write!(f, "ratelimit:{id}"),
			StoreKey::TokenLock(id) => write!(f, "lock:token:{id}"),
			StoreKey::Cursor => f.write_str("rr:cursor"),
		}
	}
}
