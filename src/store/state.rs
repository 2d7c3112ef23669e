//! In-process state shared by the memory and file backends.
//!
//! Each method runs under the caller's write guard, which is what makes it atomic.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialId, TokenStatus},
	health::HealthState,
	quota::{UsagePeriod, UsageRecord},
	store::{
		CompareAndSwapOutcome, PurgeReport, PurgeScope, RateAdmission, TokenConsumption,
		UsageReservation,
	},
};

#[derive(Clone, Debug)]
struct RefreshLock {
	owner: String,
	expires_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StoreState {
	cursor: u64,
	tokens: HashMap<CredentialId, AccessToken>,
	health: HashMap<CredentialId, HealthState>,
	usage: HashMap<(CredentialId, UsagePeriod), u64>,
	// Ephemeral; never persisted.
	rate_windows: HashMap<CredentialId, VecDeque<OffsetDateTime>>,
	locks: HashMap<CredentialId, RefreshLock>,
}
impl StoreState {
	pub(crate) fn from_durable(snapshot: DurableSnapshot) -> Self {
		Self {
			cursor: snapshot.cursor,
			tokens: snapshot.tokens.into_iter().map(|t| (t.credential.clone(), t)).collect(),
			health: snapshot.health.into_iter().collect(),
			usage: snapshot
				.usage
				.into_iter()
				.map(|record| ((record.credential, record.period), record.count))
				.collect(),
			..Default::default()
		}
	}

	pub(crate) fn durable(&self) -> DurableSnapshot {
		let mut tokens = self.tokens.values().cloned().collect::<Vec<_>>();
		let mut health =
			self.health.iter().map(|(id, state)| (id.clone(), state.clone())).collect::<Vec<_>>();
		let mut usage = self
			.usage
			.iter()
			.map(|((credential, period), count)| UsageRecord {
				credential: credential.clone(),
				period: *period,
				count: *count,
			})
			.collect::<Vec<_>>();

		// Stable ordering keeps snapshots diffable.
		tokens.sort_by(|a, b| a.credential.cmp(&b.credential));
		health.sort_by(|a, b| a.0.cmp(&b.0));
		usage.sort_by(|a, b| (&a.credential, a.period).cmp(&(&b.credential, b.period)));

		DurableSnapshot { cursor: self.cursor, tokens, health, usage }
	}

	pub(crate) fn cursor(&self) -> u64 {
		self.cursor
	}

	pub(crate) fn claim_tickets(&mut self, count: u64) -> u64 {
		let first = self.cursor;

		self.cursor = first.wrapping_add(count);

		first
	}

	pub(crate) fn health(&self, credential: &CredentialId) -> Option<HealthState> {
		self.health.get(credential).cloned()
	}

	pub(crate) fn compare_and_swap_health(
		&mut self,
		credential: &CredentialId,
		expected: Option<&HealthState>,
		replacement: HealthState,
	) -> CompareAndSwapOutcome {
		let outcome = match (self.health.get(credential), expected) {
			(None, None) => CompareAndSwapOutcome::Updated,
			(Some(current), Some(expected)) if current == expected => CompareAndSwapOutcome::Updated,
			(None, Some(_)) => CompareAndSwapOutcome::Missing,
			(Some(_), _) => CompareAndSwapOutcome::StateMismatch,
		};

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			self.health.insert(credential.clone(), replacement);
		}

		outcome
	}

	pub(crate) fn clear_health(&mut self, credential: &CredentialId) -> bool {
		self.health.remove(credential).is_some()
	}

	pub(crate) fn reserve_usage(
		&mut self,
		credential: &CredentialId,
		period: UsagePeriod,
		ceiling: u64,
	) -> UsageReservation {
		let key = (credential.clone(), period);
		let count = self.usage.get(&key).copied().unwrap_or(0);

		if count >= ceiling {
			return UsageReservation::Exhausted { count };
		}

		self.usage.insert(key, count + 1);

		UsageReservation::Reserved { count: count + 1 }
	}

	pub(crate) fn release_usage(&mut self, credential: &CredentialId, period: UsagePeriod) -> u64 {
		match self.usage.get_mut(&(credential.clone(), period)) {
			Some(counter) => {
				*counter = counter.saturating_sub(1);

				*counter
			},
			None => 0,
		}
	}

	pub(crate) fn usage(&self, credential: &CredentialId, period: UsagePeriod) -> Option<UsageRecord> {
		self.usage.get(&(credential.clone(), period)).map(|count| UsageRecord {
			credential: credential.clone(),
			period,
			count: *count,
		})
	}

	pub(crate) fn acquire_rate_slot(
		&mut self,
		credential: &CredentialId,
		now: OffsetDateTime,
		limit: u32,
		window: Duration,
	) -> RateAdmission {
		let cutoff = now - window;
		let entries = self.rate_windows.entry(credential.clone()).or_default();

		// Callers may race with slightly different clocks, so prune by value, not by position.
		entries.retain(|admitted| *admitted > cutoff);

		if entries.len() < limit as usize {
			entries.push_back(now);

			return RateAdmission::Admitted { in_window: entries.len() as u32 };
		}

		let oldest = entries.iter().min().copied().unwrap_or(now);

		RateAdmission::Rejected { retry_at: oldest + window }
	}

	pub(crate) fn token(&self, credential: &CredentialId) -> Option<AccessToken> {
		self.tokens.get(credential).cloned()
	}

	pub(crate) fn consume_token(
		&mut self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> TokenConsumption {
		let Some(token) = self.tokens.get_mut(credential) else {
			return TokenConsumption::Missing;
		};

		match token.status_at(now) {
			TokenStatus::Active => {
				token.use_count += 1;

				TokenConsumption::Granted(token.clone())
			},
			status => TokenConsumption::Stale(status),
		}
	}

	pub(crate) fn publish_token(&mut self, token: AccessToken) {
		self.tokens.insert(token.credential.clone(), token);
	}

	pub(crate) fn purge_token(&mut self, credential: &CredentialId) -> bool {
		self.tokens.remove(credential).is_some()
	}

	pub(crate) fn try_lock(
		&mut self,
		credential: &CredentialId,
		owner: &str,
		ttl: Duration,
		now: OffsetDateTime,
	) -> bool {
		let held_elsewhere = self
			.locks
			.get(credential)
			.is_some_and(|lock| lock.owner != owner && lock.expires_at > now);

		if held_elsewhere {
			return false;
		}

		self.locks
			.insert(credential.clone(), RefreshLock { owner: owner.to_owned(), expires_at: now + ttl });

		true
	}

	pub(crate) fn unlock(&mut self, credential: &CredentialId, owner: &str) -> bool {
		match self.locks.get(credential) {
			Some(lock) if lock.owner == owner => {
				self.locks.remove(credential);

				true
			},
			_ => false,
		}
	}

	pub(crate) fn purge(&mut self, scope: &PurgeScope) -> PurgeReport {
		let mut report = PurgeReport::default();

		match scope {
			PurgeScope::AllTokens => {
				report.tokens = self.tokens.len();

				self.tokens.clear();
			},
			PurgeScope::AllUsage => {
				report.usage = self.usage.len();

				self.usage.clear();
			},
			PurgeScope::Orphans { known } => {
				let (tokens, health, usage) =
					(self.tokens.len(), self.health.len(), self.usage.len());

				self.tokens.retain(|id, _| known.contains(id));
				self.health.retain(|id, _| known.contains(id));
				self.usage.retain(|(id, _), _| known.contains(id));
				self.rate_windows.retain(|id, _| known.contains(id));
				self.locks.retain(|id, _| known.contains(id));

				report.tokens = tokens - self.tokens.len();
				report.health = health - self.health.len();
				report.usage = usage - self.usage.len();
			},
		}

		report
	}
}

/// Durable subset of [`StoreState`] written by the file backend.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct DurableSnapshot {
	cursor: u64,
	tokens: Vec<AccessToken>,
	health: Vec<(CredentialId, HealthState)>,
	usage: Vec<UsageRecord>,
}
