//! Per-credential health tracking with half-open probation.
//!
//! A credential trips to [`HealthStatus::Unhealthy`] after `max_consecutive_errors` failures in a
//! row, or immediately on a critical (credential-invalid) failure. Once `check_interval` has
//! elapsed since the last recheck, exactly one caller wins the move to
//! [`HealthStatus::Probation`] and may send a single probe call; the probe's reported outcome
//! decides whether the credential recovers or waits another interval.

// self
use crate::{
	_prelude::*,
	auth::CredentialId,
	obs,
	provider::{self, ProviderErrorKind},
	store::{CompareAndSwapOutcome, GovernorStore, StoreError, StoreKey},
};

const CAS_ATTEMPTS: usize = 16;

/// Thresholds applied by the [`HealthMonitor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthPolicy {
	/// Consecutive failures that mark a credential unhealthy.
	pub max_consecutive_errors: u32,
	/// Grace period before an unhealthy credential may be probed again.
	pub check_interval: Duration,
}
impl Default for HealthPolicy {
	fn default() -> Self {
		Self { max_consecutive_errors: 3, check_interval: Duration::hours(1) }
	}
}

/// Health status of one credential.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	/// Eligible for selection.
	#[default]
	Healthy,
	/// Excluded until the re-check interval elapses.
	Unhealthy,
	/// One probe call is in flight; everyone else keeps treating the credential as ineligible.
	Probation,
}
impl HealthStatus {
	/// Returns a stable label suitable for logs and admin views.
	pub const fn as_str(self) -> &'static str {
		match self {
			HealthStatus::Healthy => "healthy",
			HealthStatus::Unhealthy => "unhealthy",
			HealthStatus::Probation => "probation",
		}
	}
}

/// Stored health record; an absent record means [`HealthState::default`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
	/// Failures since the last success.
	pub consecutive_errors: u32,
	/// Current status.
	pub status: HealthStatus,
	/// Instant the credential last tripped.
	#[serde(default)]
	pub unhealthy_since: Option<OffsetDateTime>,
	/// Instant of the last trip or probation grant; the re-check interval counts from here.
	#[serde(default)]
	pub last_recheck_at: Option<OffsetDateTime>,
	/// Last recorded failure message.
	#[serde(default)]
	pub last_error: Option<String>,
	/// Instant of the last failure.
	#[serde(default)]
	pub last_error_at: Option<OffsetDateTime>,
	/// Instant of the last success.
	#[serde(default)]
	pub last_success_at: Option<OffsetDateTime>,
}
impl HealthState {
	/// Returns `true` when the status is [`HealthStatus::Healthy`].
	pub fn is_healthy(&self) -> bool {
		self.status == HealthStatus::Healthy
	}

	/// Earliest instant a probe may be granted; `None` while healthy.
	pub fn next_probe_at(&self, interval: Duration) -> Option<OffsetDateTime> {
		if self.is_healthy() {
			return None;
		}

		let anchor = self
			.last_recheck_at
			.or(self.unhealthy_since)
			.unwrap_or(OffsetDateTime::UNIX_EPOCH);

		Some(anchor + interval)
	}

	fn probe_due(&self, now: OffsetDateTime, interval: Duration) -> bool {
		self.next_probe_at(interval).is_some_and(|at| now >= at)
	}

	fn after_success(&self, now: OffsetDateTime) -> Self {
		Self {
			consecutive_errors: 0,
			status: HealthStatus::Healthy,
			unhealthy_since: None,
			last_recheck_at: None,
			last_error: self.last_error.clone(),
			last_error_at: self.last_error_at,
			last_success_at: Some(now),
		}
	}

	fn after_failure(
		&self,
		now: OffsetDateTime,
		kind: FailureKind,
		message: Option<&str>,
		policy: &HealthPolicy,
	) -> Self {
		let mut next = self.clone();

		next.consecutive_errors = self.consecutive_errors.saturating_add(1);
		next.last_error = message.map(str::to_owned).or_else(|| self.last_error.clone());
		next.last_error_at = Some(now);

		match self.status {
			HealthStatus::Healthy =>
				if next.consecutive_errors >= policy.max_consecutive_errors
					|| kind == FailureKind::Critical
				{
					next.status = HealthStatus::Unhealthy;
					next.unhealthy_since = Some(now);
					next.last_recheck_at = Some(now);
				},
			// The probe failed; wait a full interval again.
			HealthStatus::Probation => {
				next.status = HealthStatus::Unhealthy;
				next.last_recheck_at = Some(now);
			},
			HealthStatus::Unhealthy => {},
		}

		next
	}

	fn into_probation(&self, now: OffsetDateTime) -> Self {
		Self { status: HealthStatus::Probation, last_recheck_at: Some(now), ..self.clone() }
	}
}

/// Severity of a recorded failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	/// Counts toward the consecutive failure threshold.
	#[default]
	Transient,
	/// The credential itself is invalid; trips immediately.
	Critical,
}
impl FailureKind {
	/// Classifies free-form upstream error text.
	pub fn classify(message: &str) -> Self {
		match provider::classify_text(message) {
			Some(ProviderErrorKind::InvalidClient) => FailureKind::Critical,
			_ => FailureKind::Transient,
		}
	}
}
impl From<&Error> for FailureKind {
	fn from(error: &Error) -> Self {
		match error {
			Error::InvalidClient { .. } => FailureKind::Critical,
			Error::TokenFetchFailed { source, .. } => FailureKind::from(source.as_ref()),
			Error::UpstreamCallFailed { reason, .. } => FailureKind::classify(reason),
			_ => FailureKind::Transient,
		}
	}
}

/// Reads and updates health records through compare-and-swap loops.
pub struct HealthMonitor {
	store: Arc<dyn GovernorStore>,
	policy: HealthPolicy,
}
impl HealthMonitor {
	/// Creates a monitor backed by the shared store.
	pub fn new(store: Arc<dyn GovernorStore>, policy: HealthPolicy) -> Self {
		Self { store, policy }
	}

	/// Active thresholds.
	pub fn policy(&self) -> &HealthPolicy {
		&self.policy
	}

	/// Read-only view of the credential's health; never grants probation.
	pub async fn state(&self, credential: &CredentialId) -> Result<HealthState> {
		Ok(self.store.fetch_health(credential).await?.unwrap_or_default())
	}

	/// Clears the failure streak and restores the credential.
	pub async fn record_success(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
	) -> Result<HealthState> {
		self.update(credential, |state| state.after_success(now)).await
	}

	/// Records a failure without a message.
	pub async fn record_failure(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
		kind: FailureKind,
	) -> Result<HealthState> {
		self.record_failure_with(credential, now, kind, None).await
	}

	/// Records a failure and keeps its message for admin views.
	pub async fn record_failure_with(
		&self,
		credential: &CredentialId,
		now: OffsetDateTime,
		kind: FailureKind,
		message: Option<&str>,
	) -> Result<HealthState> {
		let policy = self.policy;

		self.update(credential, |state| state.after_failure(now, kind, message, &policy)).await
	}

	/// Returns `true` when the credential may be used now.
	///
	/// For an unhealthy credential whose re-check interval has elapsed, exactly one concurrent
	/// caller receives `true` and moves the record into probation.
	pub async fn is_eligible(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<bool> {
		for _ in 0..CAS_ATTEMPTS {
			let current = self.store.fetch_health(credential).await?;
			let Some(state) = current.as_ref() else {
				return Ok(true);
			};

			if state.is_healthy() {
				return Ok(true);
			}
			if !state.probe_due(now, self.policy.check_interval) {
				return Ok(false);
			}

			let probation = state.into_probation(now);

			match self.store.compare_and_swap_health(credential, current.as_ref(), probation).await?
			{
				CompareAndSwapOutcome::Updated => {
					obs::record_health_transition(credential, state.status, HealthStatus::Probation);

					return Ok(true);
				},
				CompareAndSwapOutcome::StateMismatch | CompareAndSwapOutcome::Missing => continue,
			}
		}

		Err(contention(credential))
	}

	/// Removes the health record; returns `true` if one existed.
	pub async fn reset(&self, credential: &CredentialId) -> Result<bool> {
		Ok(self.store.clear_health(credential).await?)
	}

	async fn update<F>(&self, credential: &CredentialId, transition: F) -> Result<HealthState>
	where
		F: Fn(&HealthState) -> HealthState,
	{
		for _ in 0..CAS_ATTEMPTS {
			let current = self.store.fetch_health(credential).await?;
			let base = current.clone().unwrap_or_default();
			let next = transition(&base);

			match self
				.store
				.compare_and_swap_health(credential, current.as_ref(), next.clone())
				.await?
			{
				CompareAndSwapOutcome::Updated => {
					if base.status != next.status {
						obs::record_health_transition(credential, base.status, next.status);
					}

					return Ok(next);
				},
				CompareAndSwapOutcome::StateMismatch | CompareAndSwapOutcome::Missing => continue,
			}
		}

		Err(contention(credential))
	}
}
impl Debug for HealthMonitor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HealthMonitor").field("policy", &self.policy).finish()
	}
}

fn contention(credential: &CredentialId) -> Error {
	StoreError::Contention { key: StoreKey::Health(credential.clone()).to_string() }.into()
}
