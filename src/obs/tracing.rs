// self
use crate::{
	_prelude::*, auth::CredentialId, health::HealthStatus, obs::OpKind, selector::SkipReason,
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by governor operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("ocr_pool_governor.op", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

pub(crate) fn trace_skip(credential: &CredentialId, reason: SkipReason) {
	#[cfg(feature = "tracing")]
	tracing::debug!(credential = %credential, reason = reason.as_str(), "Skipped credential.");
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, reason);
}

pub(crate) fn trace_health_transition(
	credential: &CredentialId,
	from: HealthStatus,
	to: HealthStatus,
) {
	#[cfg(feature = "tracing")]
	match to {
		HealthStatus::Unhealthy => tracing::warn!(
			credential = %credential,
			from = from.as_str(),
			"Credential marked unhealthy."
		),
		_ => tracing::info!(
			credential = %credential,
			from = from.as_str(),
			to = to.as_str(),
			"Credential health changed."
		),
	}
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, from, to);
}

pub(crate) fn trace_upstream(credential: &CredentialId, outcome: &'static str) {
	#[cfg(feature = "tracing")]
	tracing::debug!(credential = %credential, outcome, "Upstream call reported.");
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, outcome);
}

pub(crate) fn trace_refreshed(credential: &CredentialId, expires_at: OffsetDateTime) {
	#[cfg(feature = "tracing")]
	tracing::info!(credential = %credential, %expires_at, "Access token refreshed.");
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, expires_at);
}

pub(crate) fn trace_lock_timeout(credential: &CredentialId, waited: Duration) {
	#[cfg(feature = "tracing")]
	tracing::warn!(credential = %credential, %waited, "Gave up waiting for the refresh lock.");
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, waited);
}

pub(crate) fn trace_unlock_failure(credential: &CredentialId, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		credential = %credential,
		error = %error,
		"Failed to release the refresh lock; it will expire on its own."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (credential, error);
}
