//! File-backed [`GovernorStore`] for single-process deployments that must survive restarts.
//!
//! Tokens, usage counters, health records, and the cursor are written to a JSON snapshot after each
//! mutation. Rate windows and refresh locks are short-lived and stay in memory.
//!
//! State lives in this process and the file is only read on [`FileStore::open`]. Two processes
//! opening the same file overwrite each other's counters; share a networked backend instead.
//! A mutation whose snapshot cannot be written is rolled back before the error is returned.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialId},
	health::HealthState,
	quota::{UsagePeriod, UsageRecord},
	store::{
		CompareAndSwapOutcome, GovernorStore, PurgeReport, PurgeScope, RateAdmission,
		StoreError, StoreFuture, TokenConsumption, UsageReservation,
		state::{DurableSnapshot, StoreState},
	},
};

/// Persists durable governor state to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<StoreState>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(StoreState::from_durable(snapshot))) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<DurableSnapshot, StoreError> {
		if !path.exists() {
			return Ok(DurableSnapshot::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(DurableSnapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, state: &StoreState) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(&state.durable()).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	// Runs a mutation under the write guard and persists when it reports a change.
	fn mutate<T>(
		&self,
		f: impl FnOnce(&mut StoreState) -> T,
		changed: impl FnOnce(&T) -> bool,
	) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let before = guard.clone();
		let outcome = f(&mut guard);

		if changed(&outcome) {
			if let Err(e) = self.persist_locked(&guard) {
				*guard = before;

				return Err(e);
			}
		}

		Ok(outcome)
	}
}
impl GovernorStore for FileStore {
	fn load_cursor(&self) -> StoreFuture<'_, u64> {
		Box::pin(async move { Ok(self.inner.read().cursor()) })
	}

	fn claim_tickets(&self, count: u64) -> StoreFuture<'_, u64> {
		Box::pin(async move { self.mutate(|state| state.claim_tickets(count), |_| count > 0) })
	}

	fn fetch_health<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<HealthState>> {
		Box::pin(async move { Ok(self.inner.read().health(credential)) })
	}

	fn compare_and_swap_health<'a>(
		&'a self,
		credential: &'a CredentialId,
		expected: Option<&'a HealthState>,
		replacement: HealthState,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			self.mutate(
				|state| state.compare_and_swap_health(credential, expected, replacement),
				|outcome| matches!(outcome, CompareAndSwapOutcome::Updated),
			)
		})
	}

	fn clear_health<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.mutate(|state| state.clear_health(credential), |hit| *hit) })
	}

	fn reserve_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
		ceiling: u64,
	) -> StoreFuture<'a, UsageReservation> {
		Box::pin(async move {
			self.mutate(
				|state| state.reserve_usage(credential, period, ceiling),
				|outcome| matches!(outcome, UsageReservation::Reserved { .. }),
			)
		})
	}

	fn release_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, u64> {
		Box::pin(async move { self.mutate(|state| state.release_usage(credential, period), |_| true) })
	}

	fn fetch_usage<'a>(
		&'a self,
		credential: &'a CredentialId,
		period: UsagePeriod,
	) -> StoreFuture<'a, Option<UsageRecord>> {
		Box::pin(async move { Ok(self.inner.read().usage(credential, period)) })
	}

	fn acquire_rate_slot<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
		limit: u32,
		window: Duration,
	) -> StoreFuture<'a, RateAdmission> {
		Box::pin(async move {
			Ok(self.inner.write().acquire_rate_slot(credential, now, limit, window))
		})
	}

	fn fetch_token<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<AccessToken>> {
		Box::pin(async move { Ok(self.inner.read().token(credential)) })
	}

	fn consume_token<'a>(
		&'a self,
		credential: &'a CredentialId,
		now: OffsetDateTime,
	) -> StoreFuture<'a, TokenConsumption> {
		Box::pin(async move {
			self.mutate(
				|state| state.consume_token(credential, now),
				|outcome| matches!(outcome, TokenConsumption::Granted(_)),
			)
		})
	}

	fn publish_token(&self, token: AccessToken) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|state| state.publish_token(token), |_| true) })
	}

	fn purge_token<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.mutate(|state| state.purge_token(credential), |hit| *hit) })
	}

	fn try_lock<'a>(
		&'a self,
		credential: &'a CredentialId,
		owner: &'a str,
		ttl: Duration,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.inner.write().try_lock(credential, owner, ttl, now)) })
	}

	fn unlock<'a>(&'a self, credential: &'a CredentialId, owner: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.inner.write().unlock(credential, owner)) })
	}

	fn purge<'a>(&'a self, scope: &'a PurgeScope) -> StoreFuture<'a, PurgeReport> {
		Box::pin(async move {
			self.mutate(|state| state.purge(scope), |report| report.total() > 0)
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros;
	use tokio::runtime::Runtime;
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"ocr_pool_governor_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn durable_state_survives_reopen() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let id = CredentialId::new("key-a").expect("Credential fixture should be valid.");
		let period = UsagePeriod::new(2025, 6).expect("Period fixture should be valid.");
		let now = macros::datetime!(2025-06-01 00:00 UTC);
		let token = AccessToken::builder(id.clone())
			.access_token("access-token")
			.issued_at(now)
			.expires_in(Duration::days(30))
			.max_uses(900)
			.use_count(1)
			.build()
			.expect("Failed to build file-store test token.");

		rt.block_on(async {
			store.publish_token(token.clone()).await.expect("Publishing should persist.");
			store.reserve_usage(&id, period, 10).await.expect("Reservation should persist.");
			store.claim_tickets(3).await.expect("Cursor should persist.");
			store.try_lock(&id, "owner", Duration::seconds(30), now).await.expect("Lock should work.");
		});
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		rt.block_on(async {
			let fetched = reopened
				.fetch_token(&id)
				.await
				.expect("Failed to fetch token from file store.")
				.expect("File store lost the token after reopen.");
			let usage = reopened
				.fetch_usage(&id, period)
				.await
				.expect("Failed to fetch usage.")
				.expect("File store lost the usage counter after reopen.");

			assert_eq!(fetched.value.expose(), token.value.expose());
			assert_eq!(usage.count, 1);
			assert_eq!(reopened.load_cursor().await.expect("Cursor should load."), 3);
			// Locks are ephemeral, so another owner can take the lease after a restart.
			assert!(
				reopened
					.try_lock(&id, "other", Duration::seconds(30), now)
					.await
					.expect("Lock should work.")
			);
		});

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn failed_writes_leave_state_untouched() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let id = CredentialId::new("key-a").expect("Credential fixture should be valid.");
		let period = UsagePeriod::new(2025, 6).expect("Period fixture should be valid.");

		rt.block_on(async {
			store.reserve_usage(&id, period, 10).await.expect("Reservation should persist.");
		});

		// A non-empty directory in place of the snapshot makes the final rename fail.
		fs::remove_file(&path).expect("Failed to remove snapshot before replacing it.");
		fs::create_dir_all(path.join("blocker")).expect("Failed to create blocking directory.");

		rt.block_on(async {
			store.reserve_usage(&id, period, 10).await.expect_err("The write should fail.");

			let usage = store
				.fetch_usage(&id, period)
				.await
				.expect("Failed to fetch usage.")
				.expect("The persisted reservation should remain.");

			assert_eq!(usage.count, 1);
		});

		let mut tmp_path = path.clone();

		tmp_path.set_extension("tmp");

		let _ = fs::remove_file(&tmp_path);

		fs::remove_dir_all(&path).unwrap_or_else(|e| {
			panic!("Failed to remove blocking directory {}: {e}", path.display())
		});
	}
}
