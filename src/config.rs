//! Governor configuration, JSON loading, and validation.

// std
use std::iter::IntoIterator;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialEntry, CredentialId},
	error::ConfigError,
	health::HealthPolicy,
	token::TokenPolicy,
};

/// Default token endpoint.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://aip.baidubce.com/oauth/2.0/token";
/// Default OCR endpoint handed to callers.
pub const DEFAULT_OCR_ENDPOINT: &str = "https://aip.baidubce.com/rest/2.0/ocr/v1/multiple_invoice";
/// Default monthly call ceiling per credential.
pub const DEFAULT_MONTHLY_QUOTA_LIMIT: u64 = 1_000;
/// Default per-second admission ceiling per credential.
pub const DEFAULT_QPS_LIMIT: u32 = 2;
/// Per-request timeout of the token endpoint client; refresh leases must outlast it.
pub const ENDPOINT_REQUEST_TIMEOUT: Duration = Duration::seconds(15);

/// Validated governor configuration.
#[derive(Clone, Debug)]
pub struct GovernorConfig {
	/// Pool entries in round-robin order.
	pub credentials: Vec<Credential>,
	/// Monthly call ceiling per credential.
	pub monthly_quota_limit: u64,
	/// Admissions per rolling second per credential.
	pub qps_limit: u32,
	/// Health thresholds.
	pub health: HealthPolicy,
	/// Token reuse and refresh coordination settings.
	pub token: TokenPolicy,
	/// Endpoint that issues access tokens.
	pub token_endpoint: Url,
	/// OCR endpoint callers should invoke with the selected token.
	pub ocr_endpoint: Url,
}
impl GovernorConfig {
	/// Returns a builder seeded with defaults.
	pub fn builder() -> GovernorConfigBuilder {
		GovernorConfigBuilder::default()
	}

	/// Parses and validates a JSON configuration document.
	///
	/// Only `credentials` is required; every other field falls back to its default.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let document: ConfigDocument = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::InvalidDocument { source })?;

		document.into_builder()?.build()
	}
}

/// Builder for [`GovernorConfig`] values.
#[derive(Clone, Debug)]
pub struct GovernorConfigBuilder {
	credentials: Vec<Credential>,
	monthly_quota_limit: u64,
	qps_limit: u32,
	health: HealthPolicy,
	token: TokenPolicy,
	token_endpoint: Option<Url>,
	ocr_endpoint: Option<Url>,
}
impl GovernorConfigBuilder {
	/// Appends one credential.
	pub fn credential(mut self, credential: Credential) -> Self {
		self.credentials.push(credential);

		self
	}

	/// Appends multiple credentials, preserving order.
	pub fn credentials<I>(mut self, credentials: I) -> Self
	where
		I: IntoIterator<Item = Credential>,
	{
		self.credentials.extend(credentials);

		self
	}

	/// Overrides the monthly call ceiling.
	pub fn monthly_quota_limit(mut self, limit: u64) -> Self {
		self.monthly_quota_limit = limit;

		self
	}

	/// Overrides the per-second admission ceiling.
	pub fn qps_limit(mut self, limit: u32) -> Self {
		self.qps_limit = limit;

		self
	}

	/// Overrides how many hand-outs one token serves.
	pub fn token_max_uses(mut self, max_uses: u32) -> Self {
		self.token.max_uses = max_uses;

		self
	}

	/// Overrides the consecutive failure threshold.
	pub fn max_consecutive_errors(mut self, max: u32) -> Self {
		self.health.max_consecutive_errors = max;

		self
	}

	/// Overrides the unhealthy re-check interval.
	pub fn health_check_interval(mut self, interval: Duration) -> Self {
		self.health.check_interval = interval;

		self
	}

	/// Overrides the expiry safety margin subtracted from token lifetimes.
	pub fn token_expiry_margin(mut self, margin: Duration) -> Self {
		self.token.expiry_margin = margin;

		self
	}

	/// Overrides the refresh lock lease.
	pub fn refresh_lock_ttl(mut self, ttl: Duration) -> Self {
		self.token.lock_ttl = ttl;

		self
	}

	/// Overrides how long a waiter polls for another holder's token.
	pub fn refresh_wait_timeout(mut self, timeout: Duration) -> Self {
		self.token.wait_timeout = timeout;

		self
	}

	/// Overrides the poll cadence while waiting on another holder.
	pub fn refresh_poll_interval(mut self, interval: Duration) -> Self {
		self.token.poll_interval = interval;

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the OCR endpoint.
	pub fn ocr_endpoint(mut self, url: Url) -> Self {
		self.ocr_endpoint = Some(url);

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<GovernorConfig, ConfigError> {
		let token_endpoint = match self.token_endpoint {
			Some(url) => url,
			None => parse_endpoint("token", DEFAULT_TOKEN_ENDPOINT)?,
		};
		let ocr_endpoint = match self.ocr_endpoint {
			Some(url) => url,
			None => parse_endpoint("ocr", DEFAULT_OCR_ENDPOINT)?,
		};
		let config = GovernorConfig {
			credentials: self.credentials,
			monthly_quota_limit: self.monthly_quota_limit,
			qps_limit: self.qps_limit,
			health: self.health,
			token: self.token,
			token_endpoint,
			ocr_endpoint,
		};

		config.validate()?;

		Ok(config)
	}
}
impl Default for GovernorConfigBuilder {
	fn default() -> Self {
		Self {
			credentials: Vec::new(),
			monthly_quota_limit: DEFAULT_MONTHLY_QUOTA_LIMIT,
			qps_limit: DEFAULT_QPS_LIMIT,
			health: HealthPolicy::default(),
			token: TokenPolicy::default(),
			token_endpoint: None,
			ocr_endpoint: None,
		}
	}
}

impl GovernorConfig {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.credentials.is_empty() {
			return Err(ConfigError::NoCredentials);
		}

		let mut seen = HashSet::<&CredentialId>::new();

		for credential in &self.credentials {
			if !seen.insert(&credential.id) {
				return Err(ConfigError::DuplicateCredential { id: credential.id.clone() });
			}
			if credential.client_secret.is_blank() {
				return Err(ConfigError::EmptySecret { id: credential.id.clone() });
			}
		}

		ensure_nonzero("monthly_quota_limit", self.monthly_quota_limit)?;
		ensure_nonzero("qps_limit", u64::from(self.qps_limit))?;
		ensure_nonzero("token_max_uses", u64::from(self.token.max_uses))?;
		ensure_nonzero("max_consecutive_errors", u64::from(self.health.max_consecutive_errors))?;
		ensure_positive("health_check_interval", self.health.check_interval)?;
		ensure_positive("refresh_lock_ttl", self.token.lock_ttl)?;
		ensure_positive("refresh_wait_timeout", self.token.wait_timeout)?;
		ensure_positive("refresh_poll_interval", self.token.poll_interval)?;

		if self.token.fetch_budget() <= ENDPOINT_REQUEST_TIMEOUT {
			return Err(ConfigError::RefreshLeaseTooShort {
				ttl: self.token.lock_ttl,
				request_timeout: ENDPOINT_REQUEST_TIMEOUT,
			});
		}
		if self.token.expiry_margin.is_negative() {
			return Err(ConfigError::ZeroLimit { field: "token_expiry_margin" });
		}

		validate_endpoint("token", &self.token_endpoint)?;
		validate_endpoint("ocr", &self.ocr_endpoint)?;

		Ok(())
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
	credentials: Vec<CredentialEntry>,
	token_max_uses: Option<u32>,
	monthly_quota_limit: Option<u64>,
	qps_limit: Option<u32>,
	max_consecutive_errors: Option<u32>,
	health_check_interval_secs: Option<u64>,
	token_endpoint: Option<String>,
	ocr_endpoint: Option<String>,
	token_expiry_margin_secs: Option<u64>,
	refresh_lock_ttl_secs: Option<u64>,
	refresh_wait_timeout_ms: Option<u64>,
	refresh_poll_interval_ms: Option<u64>,
}
impl ConfigDocument {
	fn into_builder(self) -> Result<GovernorConfigBuilder, ConfigError> {
		let mut builder = GovernorConfig::builder();

		for entry in self.credentials {
			builder = builder.credential(entry.into_credential()?);
		}
		if let Some(v) = self.token_max_uses {
			builder = builder.token_max_uses(v);
		}
		if let Some(v) = self.monthly_quota_limit {
			builder = builder.monthly_quota_limit(v);
		}
		if let Some(v) = self.qps_limit {
			builder = builder.qps_limit(v);
		}
		if let Some(v) = self.max_consecutive_errors {
			builder = builder.max_consecutive_errors(v);
		}
		if let Some(v) = self.health_check_interval_secs {
			builder = builder.health_check_interval(Duration::seconds(saturating_i64(v)));
		}
		if let Some(v) = self.token_expiry_margin_secs {
			builder = builder.token_expiry_margin(Duration::seconds(saturating_i64(v)));
		}
		if let Some(v) = self.refresh_lock_ttl_secs {
			builder = builder.refresh_lock_ttl(Duration::seconds(saturating_i64(v)));
		}
		if let Some(v) = self.refresh_wait_timeout_ms {
			builder = builder.refresh_wait_timeout(Duration::milliseconds(saturating_i64(v)));
		}
		if let Some(v) = self.refresh_poll_interval_ms {
			builder = builder.refresh_poll_interval(Duration::milliseconds(saturating_i64(v)));
		}
		if let Some(raw) = self.token_endpoint.as_deref() {
			builder = builder.token_endpoint(parse_endpoint("token", raw)?);
		}
		if let Some(raw) = self.ocr_endpoint.as_deref() {
			builder = builder.ocr_endpoint(parse_endpoint("ocr", raw)?);
		}

		Ok(builder)
	}
}

fn saturating_i64(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_endpoint(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint { name, source })
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
	if value == 0 { Err(ConfigError::ZeroLimit { field }) } else { Ok(()) }
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::ZeroLimit { field }) }
}

// Plain HTTP is only accepted for loopback hosts so local mocks keep working.
fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ConfigError> {
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		Ok(())
	} else {
		Err(ConfigError::InsecureEndpoint { name, url: url.to_string() })
	}
}
