//! Upstream token endpoint contract and its reqwest implementation.
//!
//! The endpoint answers `POST {token_url}?grant_type=client_credentials&client_id=…&client_secret=…`
//! with `{"access_token": "…", "expires_in": 2592000}` on success, or an `error` /
//! `error_description` pair (sometimes with HTTP 200) on failure.

// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	error::{ConfigError, TransientError},
	provider::{ProviderErrorContext, ProviderErrorKind, ProviderStrategy},
};
#[cfg(feature = "reqwest")]
use crate::{
	error::TransportError,
	http::{ReqwestHttpClient, ResponseMetadata},
	provider::DefaultProviderStrategy,
};

/// Boxed future returned by [`TokenEndpoint::request_token`].
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Fetches fresh access tokens for a credential.
pub trait TokenEndpoint
where
	Self: Send + Sync,
{
	/// Requests one new token; implementations must not retry internally.
	fn request_token<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, IssuedToken>;
}

/// Token material returned by the endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
	/// Access token value.
	pub access_token: TokenSecret,
	/// Lifetime reported by the endpoint.
	pub expires_in: Duration,
}
impl IssuedToken {
	/// Wraps endpoint output.
	pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
		Self { access_token: TokenSecret::new(access_token), expires_in }
	}
}

#[derive(Debug, Deserialize)]
struct TokenResponseBody {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

/// Turns a raw token endpoint response into an [`IssuedToken`] or a classified error.
#[cfg_attr(not(feature = "reqwest"), allow(dead_code))]
pub(crate) fn parse_token_response(
	strategy: &dyn ProviderStrategy,
	status: u16,
	retry_after: Option<Duration>,
	body: &[u8],
) -> Result<IssuedToken> {
	let success = (200..300).contains(&status);
	let mut de = serde_json::Deserializer::from_slice(body);
	let payload: TokenResponseBody = match serde_path_to_error::deserialize(&mut de) {
		Ok(payload) => payload,
		Err(source) => {
			if success {
				return Err(TransientError::TokenResponseParse { source, status: Some(status) }.into());
			}

			let ctx = ProviderErrorContext::default()
				.with_http_status(status)
				.with_body_preview(String::from_utf8_lossy(body));

			return Err(classified_error(strategy, &ctx, retry_after));
		},
	};

	if !success || payload.error.is_some() {
		let mut ctx = ProviderErrorContext::default().with_http_status(status);

		if let Some(error) = payload.error {
			ctx = ctx.with_oauth_error(error);
		}
		if let Some(description) = payload.error_description {
			ctx = ctx.with_error_description(description);
		}

		return Err(classified_error(strategy, &ctx, retry_after));
	}

	let access_token = payload
		.access_token
		.filter(|value| !value.trim().is_empty())
		.ok_or(ConfigError::MissingAccessToken)?;
	let expires_in = payload.expires_in.ok_or(ConfigError::MissingExpiresIn)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	Ok(IssuedToken::new(access_token, Duration::seconds(expires_in)))
}

#[cfg_attr(not(feature = "reqwest"), allow(dead_code))]
fn classified_error(
	strategy: &dyn ProviderStrategy,
	ctx: &ProviderErrorContext,
	retry_after: Option<Duration>,
) -> Error {
	match strategy.classify_token_error(ctx) {
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason: ctx.summary() },
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message: ctx.summary(),
			status: ctx.http_status,
			retry_after,
		}
		.into(),
	}
}

/// [`TokenEndpoint`] backed by reqwest.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestTokenEndpoint {
	http_client: ReqwestHttpClient,
	url: Url,
	strategy: Arc<dyn ProviderStrategy>,
}
#[cfg(feature = "reqwest")]
impl ReqwestTokenEndpoint {
	/// Creates an endpoint with a default client and [`DefaultProviderStrategy`].
	pub fn new(url: Url) -> Result<Self, ConfigError> {
		Ok(Self {
			http_client: ReqwestHttpClient::new()?,
			url,
			strategy: Arc::new(DefaultProviderStrategy),
		})
	}

	/// Replaces the HTTP client.
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Token endpoint URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	fn query(&self, credential: &Credential) -> BTreeMap<String, String> {
		let mut params = BTreeMap::from([
			("grant_type".to_owned(), "client_credentials".to_owned()),
			("client_id".to_owned(), credential.client_id.to_string()),
			("client_secret".to_owned(), credential.client_secret.expose().to_owned()),
		]);

		self.strategy.augment_token_request(&mut params);

		params
	}
}
#[cfg(feature = "reqwest")]
impl TokenEndpoint for ReqwestTokenEndpoint {
	fn request_token<'a>(&'a self, credential: &'a Credential) -> EndpointFuture<'a, IssuedToken> {
		Box::pin(async move {
			let response = self
				.http_client
				.post(self.url.clone())
				.query(&self.query(credential))
				.header(reqwest::header::ACCEPT, "application/json")
				.send()
				.await
				.map_err(map_reqwest_error)?;
			let metadata = ResponseMetadata::capture(&response);
			let body = response.bytes().await.map_err(map_reqwest_error)?;

			parse_token_response(
				self.strategy.as_ref(),
				metadata.status.unwrap_or_default(),
				metadata.retry_after,
				&body,
			)
		})
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestTokenEndpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReqwestTokenEndpoint").field("url", &self.url.as_str()).finish()
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(error: ReqwestError) -> Error {
	if error.is_builder() {
		return ConfigError::from(error).into();
	}
	if error.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "request timed out".into(),
			status: None,
			retry_after: None,
		}
		.into();
	}

	TransportError::from(error).into()
}
