//! Shared access token records with use counting, lifecycle helpers, and a builder.

// self
use crate::{
	_prelude::*,
	auth::{CredentialId, token::secret::TokenSecret},
};

/// Current lifecycle status for an access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
	/// Token may be handed out again.
	Active,
	/// Token reached its (margin-adjusted) expiry instant.
	Expired,
	/// Token has been handed out `max_uses` times.
	Exhausted,
}
impl TokenStatus {
	/// Returns a stable label for logs and admin views.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenStatus::Active => "active",
			TokenStatus::Expired => "expired",
			TokenStatus::Exhausted => "exhausted",
		}
	}
}

/// Errors produced by [`AccessTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum AccessTokenBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the access token value is blank.
	#[error("Access token cannot be empty.")]
	EmptyAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the expiry does not lie after the issued-at instant.
	#[error("Token expiry must be later than its issued-at instant.")]
	NonPositiveLifetime,
	/// Issued when the use ceiling is zero.
	#[error("Token max uses must be greater than zero.")]
	ZeroMaxUses,
}

/// Access token shared by every handler drawing on one credential.
///
/// `use_count` is advanced only by the store's atomic consume operation, never by read-modify-write
/// in callers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// Pool entry the token belongs to.
	pub credential: CredentialId,
	/// Access token secret; callers must avoid logging it.
	pub value: TokenSecret,
	/// Instant the token was obtained.
	pub issued_at: OffsetDateTime,
	/// Instant the token stops being handed out, already shortened by the expiry margin.
	pub expires_at: OffsetDateTime,
	/// Number of times the token has been handed out.
	pub use_count: u32,
	/// Hand-out ceiling before a refresh is forced.
	pub max_uses: u32,
}
impl AccessToken {
	/// Returns a builder bound to the provided credential.
	pub fn builder(credential: CredentialId) -> AccessTokenBuilder {
		AccessTokenBuilder::new(credential)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}
		if self.use_count >= self.max_uses {
			return TokenStatus::Exhausted;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the token may be handed out at the provided instant.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Active)
	}

	/// Remaining hand-outs before the use ceiling is hit.
	pub fn remaining_uses(&self) -> u32 {
		self.max_uses.saturating_sub(self.use_count)
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("credential", &self.credential)
			.field("value", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("use_count", &self.use_count)
			.field("max_uses", &self.max_uses)
			.finish()
	}
}

/// Builder for [`AccessToken`].
#[derive(Clone, Debug)]
pub struct AccessTokenBuilder {
	credential: CredentialId,
	value: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	use_count: u32,
	max_uses: u32,
}
impl AccessTokenBuilder {
	fn new(credential: CredentialId) -> Self {
		Self {
			credential,
			value: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			use_count: 0,
			max_uses: 1,
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.value = Some(TokenSecret::new(token));

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the hand-out ceiling.
	pub fn max_uses(mut self, max_uses: u32) -> Self {
		self.max_uses = max_uses;

		self
	}

	/// Sets the starting use count; a freshly fetched token is published already used once.
	pub fn use_count(mut self, use_count: u32) -> Self {
		self.use_count = use_count;

		self
	}

	/// Consumes the builder and produces an [`AccessToken`].
	pub fn build(self) -> Result<AccessToken, AccessTokenBuilderError> {
		let value = self.value.ok_or(AccessTokenBuilderError::MissingAccessToken)?;

		if value.is_blank() {
			return Err(AccessTokenBuilderError::EmptyAccessToken);
		}
		if self.max_uses == 0 {
			return Err(AccessTokenBuilderError::ZeroMaxUses);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(AccessTokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(AccessTokenBuilderError::NonPositiveLifetime);
		}

		Ok(AccessToken {
			credential: self.credential,
			value,
			issued_at,
			expires_at,
			use_count: self.use_count,
			max_uses: self.max_uses,
		})
	}
}
