//! Provider strategy hooks that customize token requests and classify failures.
//!
//! Implementations decorate outgoing token requests and normalize error mapping without tying the
//! token endpoint to any particular HTTP client.

// self
use crate::_prelude::*;

/// Error text fragments that mean the client id/secret pair itself is unusable.
const CREDENTIAL_INVALID_MARKERS: &[&str] = &[
	"invalid_client",
	"invalid_secret",
	"unauthorized_client",
	"unknown client id",
	"client_id not found",
];

/// Strategy hook that allows providers to decorate requests and classify errors.
///
/// Implementors are required to be `Send + Sync`, and the hooks use crate-owned data types so
/// downstream crates never depend on reqwest-specific structures.
pub trait ProviderStrategy: Send + Sync {
	/// Maps low-level HTTP/JSON errors into the governor taxonomy for a token request.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Gives providers a chance to add custom query parameters before dispatching.
	///
	/// The default implementation does nothing.
	fn augment_token_request(&self, _params: &mut BTreeMap<String, String>) {}
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Client authentication failed; the credential should be taken out of rotation.
	InvalidClient,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Context passed to provider strategies when classifying token errors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Convenience constructor for transport-level/network failures.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Default::default() }
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the `error` code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Human-readable summary used in error messages.
	pub fn summary(&self) -> String {
		match (self.oauth_error.as_deref(), self.error_description.as_deref()) {
			(Some(error), Some(description)) => format!("{error}: {description}"),
			(Some(error), None) => error.to_owned(),
			(None, Some(description)) => description.to_owned(),
			(None, None) => match (self.http_status, self.body_preview.as_deref()) {
				(Some(status), Some(body)) => format!("HTTP {status}: {body}"),
				(Some(status), None) => format!("HTTP {status}"),
				(None, Some(body)) => body.to_owned(),
				(None, None) => "unknown error".into(),
			},
		}
	}
}

/// Default strategy: structured fields first, then body text hints, then the HTTP status.
///
/// Network failures are always treated as transient.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Transient;
		}

		if let Some(kind) = ctx
			.oauth_error
			.as_deref()
			.and_then(classify_text)
			.or_else(|| ctx.error_description.as_deref().and_then(classify_text))
			.or_else(|| ctx.body_preview.as_deref().and_then(classify_text))
		{
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

/// Classifies free-form error text; `None` when nothing recognizable is found.
pub fn classify_text(text: &str) -> Option<ProviderErrorKind> {
	let lowered = text.to_ascii_lowercase();

	if CREDENTIAL_INVALID_MARKERS.iter().any(|marker| lowered.contains(marker)) {
		Some(ProviderErrorKind::InvalidClient)
	} else if lowered.contains("temporarily_unavailable")
		|| lowered.contains("server_error")
		|| lowered.contains("retry")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(401) => ProviderErrorKind::InvalidClient,
		_ => ProviderErrorKind::Transient,
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn structured_fields_take_precedence() {
		let strategy = DefaultProviderStrategy;
		let ctx = ProviderErrorContext::default()
			.with_http_status(400)
			.with_oauth_error("invalid_client")
			.with_error_description("unknown client id");

		assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidClient);
		assert_eq!(ctx.summary(), "invalid_client: unknown client id");
	}

	#[test]
	fn descriptions_and_bodies_are_scanned_for_markers() {
		let strategy = DefaultProviderStrategy;
		let described =
			ProviderErrorContext::default().with_error_description("Client authentication failed: client_id not found");
		let body = ProviderErrorContext::default().with_body_preview("{\"msg\":\"invalid_secret\"}");

		assert_eq!(strategy.classify_token_error(&described), ProviderErrorKind::InvalidClient);
		assert_eq!(strategy.classify_token_error(&body), ProviderErrorKind::InvalidClient);
	}

	#[test]
	fn status_and_network_fallbacks() {
		let strategy = DefaultProviderStrategy;

		assert_eq!(
			strategy.classify_token_error(&ProviderErrorContext::default().with_http_status(401)),
			ProviderErrorKind::InvalidClient
		);
		assert_eq!(
			strategy.classify_token_error(&ProviderErrorContext::default().with_http_status(503)),
			ProviderErrorKind::Transient
		);
		assert_eq!(
			strategy.classify_token_error(
				&ProviderErrorContext::network_failure().with_oauth_error("invalid_client")
			),
			ProviderErrorKind::Transient
		);
	}

	#[test]
	fn previews_are_truncated() {
		let ctx = ProviderErrorContext::default().with_body_preview("x".repeat(1_000));
		let preview = ctx.body_preview.expect("Preview should be stored.");

		assert_eq!(preview.chars().count(), ProviderErrorContext::BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}
}
