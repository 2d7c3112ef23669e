//! Governor-level error types shared across the pool, token, and store layers.

// self
use crate::{_prelude::*, auth::CredentialId, selector::CredentialSkip};

/// Governor-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical governor error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The token endpoint rejected the client id/secret pair.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// A token could not be obtained for the credential.
	#[error("Token fetch failed for credential `{credential}`.")]
	TokenFetchFailed {
		/// Credential whose token could not be fetched.
		credential: CredentialId,
		/// Underlying endpoint failure.
		#[source]
		source: Box<Error>,
	},
	/// Another holder kept the refresh lock past the wait budget.
	#[error("Timed out after {waited} waiting for the refresh lock of credential `{credential}`.")]
	LockTimeout {
		/// Credential whose refresh lock stayed held.
		credential: CredentialId,
		/// Time spent waiting.
		waited: Duration,
	},
	/// Every credential was skipped during one selection pass.
	#[error("No credential is currently available ({} skipped).", skipped.len())]
	AllCredentialsUnavailable {
		/// Per-credential skip reasons in visiting order.
		skipped: Vec<CredentialSkip>,
		/// Earliest retry hint derived from rate-limited candidates.
		retry_after: Option<Duration>,
	},
	/// The caller reported a failed upstream OCR call.
	#[error("Upstream call with credential `{credential}` failed: {reason}.")]
	UpstreamCallFailed {
		/// Credential used for the call.
		credential: CredentialId,
		/// Caller-supplied failure description.
		reason: String,
	},
	/// The credential is not part of the configured pool.
	#[error("Credential `{credential}` is not configured.")]
	UnknownCredential {
		/// Requested credential id.
		credential: CredentialId,
	},
}

/// Configuration and validation failures raised by the governor.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration document is invalid.")]
	InvalidDocument {
		/// Structured parsing failure including the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
	},
	/// An endpoint URL cannot be parsed.
	#[error("The {name} endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Endpoint label.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// An endpoint does not use HTTPS.
	#[error("The {name} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Endpoint label.
		name: &'static str,
		/// Offending URL.
		url: String,
	},
	/// An identifier failed validation.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// The pool has no credentials.
	#[error("At least one credential must be configured.")]
	NoCredentials,
	/// Two credentials share the same pool id.
	#[error("Credential `{id}` is configured more than once.")]
	DuplicateCredential {
		/// Repeated id.
		id: CredentialId,
	},
	/// A credential carries an empty secret.
	#[error("Credential `{id}` has an empty client secret.")]
	EmptySecret {
		/// Offending credential.
		id: CredentialId,
	},
	/// A limit or duration that must be positive is zero.
	#[error("The {field} setting must be greater than zero.")]
	ZeroLimit {
		/// Setting name.
		field: &'static str,
	},
	/// The refresh lock lease leaves no room for a full endpoint request.
	#[error(
		"The refresh_lock_ttl setting ({ttl}) must leave more than {request_timeout} for the token request."
	)]
	RefreshLeaseTooShort {
		/// Configured lease.
		ttl: Duration,
		/// Endpoint request timeout the lease must cover.
		request_timeout: Duration,
	},
	/// Token builder validation failed.
	#[error("Unable to build access token.")]
	TokenBuild(#[from] crate::auth::AccessTokenBuilderError),
	/// Token endpoint response omitted `access_token`.
	#[error("Token endpoint response is missing access_token.")]
	MissingAccessToken,
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or governor-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
