//! Monthly per-credential call quotas.
//!
//! Counters are keyed by UTC calendar month, so a new month starts from zero without any reset
//! job. Reservations and releases are single atomic store operations.

// crates.io
use time::{Month, UtcOffset};
// self
use crate::{
	_prelude::*,
	auth::CredentialId,
	store::{GovernorStore, UsageReservation},
};

/// UTC calendar month a usage counter belongs to; renders as `YYYY-MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsagePeriod {
	year: i32,
	month: u8,
}
impl UsagePeriod {
	/// Builds a period after validating the month.
	pub fn new(year: i32, month: u8) -> Result<Self, UsagePeriodError> {
		if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
			return Err(UsagePeriodError::OutOfRange { year, month });
		}

		Ok(Self { year, month })
	}

	/// Period containing the provided instant, evaluated in UTC.
	pub fn containing(instant: OffsetDateTime) -> Self {
		let utc = instant.to_offset(UtcOffset::UTC);

		Self { year: utc.year(), month: u8::from(utc.month()) }
	}

	/// Calendar year.
	pub fn year(self) -> i32 {
		self.year
	}

	/// Calendar month.
	pub fn month(self) -> Month {
		Month::try_from(self.month).unwrap_or(Month::January)
	}

	/// The following period.
	pub fn next(self) -> Self {
		if self.month == 12 {
			Self { year: self.year + 1, month: 1 }
		} else {
			Self { year: self.year, month: self.month + 1 }
		}
	}
}
impl From<OffsetDateTime> for UsagePeriod {
	fn from(instant: OffsetDateTime) -> Self {
		Self::containing(instant)
	}
}
impl Display for UsagePeriod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{:04}-{:02}", self.year, self.month)
	}
}
impl FromStr for UsagePeriod {
	type Err = UsagePeriodError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || UsagePeriodError::Malformed { value: s.to_owned() };
		let (year, month) = s.split_once('-').ok_or_else(invalid)?;

		if year.len() != 4 || month.len() != 2 {
			return Err(invalid());
		}

		let year = year.parse::<i32>().map_err(|_| invalid())?;
		let month = month.parse::<u8>().map_err(|_| invalid())?;

		Self::new(year, month)
	}
}
impl TryFrom<String> for UsagePeriod {
	type Error = UsagePeriodError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl From<UsagePeriod> for String {
	fn from(value: UsagePeriod) -> Self {
		value.to_string()
	}
}

/// Error returned when a usage period cannot be parsed or built.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum UsagePeriodError {
	/// The text is not `YYYY-MM`.
	#[error("Usage period `{value}` is not formatted as YYYY-MM.")]
	Malformed {
		/// Rejected input.
		value: String,
	},
	/// Year or month outside the supported range.
	#[error("Usage period {year}-{month} is out of range.")]
	OutOfRange {
		/// Rejected year.
		year: i32,
		/// Rejected month.
		month: u8,
	},
}

/// Calls recorded for one credential in one period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
	/// Credential the counter belongs to.
	pub credential: CredentialId,
	/// Calendar month.
	pub period: UsagePeriod,
	/// Reserved calls.
	pub count: u64,
}

/// Enforces the monthly call ceiling per credential.
pub struct QuotaTracker {
	store: Arc<dyn GovernorStore>,
	monthly_limit: u64,
}
impl QuotaTracker {
	/// Creates a tracker backed by the shared store.
	pub fn new(store: Arc<dyn GovernorStore>, monthly_limit: u64) -> Self {
		Self { store, monthly_limit }
	}

	/// Monthly ceiling.
	pub fn limit(&self) -> u64 {
		self.monthly_limit
	}

	/// Counter for the period containing `now`; zero when nothing was recorded.
	pub async fn usage(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<UsageRecord> {
		let period = UsagePeriod::containing(now);
		let record = self.store.fetch_usage(credential, period).await?;

		Ok(record.unwrap_or_else(|| UsageRecord { credential: credential.clone(), period, count: 0 }))
	}

	/// Calls left in the period containing `now`.
	pub async fn remaining(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<u64> {
		let usage = self.usage(credential, now).await?;

		Ok(self.monthly_limit.saturating_sub(usage.count))
	}

	/// Reserves one call in the period containing `now`.
	pub async fn try_reserve(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<bool> {
		self.try_reserve_in(credential, UsagePeriod::containing(now)).await
	}

	/// Reserves one call in an explicit period.
	pub async fn try_reserve_in(&self, credential: &CredentialId, period: UsagePeriod) -> Result<bool> {
		let reservation = self.store.reserve_usage(credential, period, self.monthly_limit).await?;

		Ok(matches!(reservation, UsageReservation::Reserved { .. }))
	}

	/// Returns one call to the period containing `now`.
	pub async fn release(&self, credential: &CredentialId, now: OffsetDateTime) -> Result<u64> {
		self.release_in(credential, UsagePeriod::containing(now)).await
	}

	/// Returns one call to an explicit period, saturating at zero.
	pub async fn release_in(&self, credential: &CredentialId, period: UsagePeriod) -> Result<u64> {
		Ok(self.store.release_usage(credential, period).await?)
	}
}
impl Debug for QuotaTracker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("QuotaTracker").field("monthly_limit", &self.monthly_limit).finish()
	}
}
