//! Optional observability helpers for governor operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `ocr_pool_governor.op` with the `op` and
//!   `stage` fields, plus events for skips, health transitions, refreshes, and lock problems.
//! - Enable `metrics` to increment `ocr_pool_governor_op_total{op,outcome}`,
//!   `ocr_pool_governor_skip_total{reason}`, and `ocr_pool_governor_upstream_total{outcome}`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, auth::CredentialId, health::HealthStatus, selector::SkipReason};

/// Operation kinds observed by the governor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// One selection pass over the pool.
	Select,
	/// Token refresh for one credential.
	Refresh,
	/// Upstream outcome feedback.
	Report,
	/// Administrative maintenance.
	Admin,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Select => "select",
			OpKind::Refresh => "refresh",
			OpKind::Report => "report",
			OpKind::Admin => "admin",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a governor operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records a credential skipped during selection.
pub fn record_skip(credential: &CredentialId, reason: SkipReason) {
	trace_skip(credential, reason);
	count_skip(reason);
}

/// Records a health status change that won its compare-and-swap.
pub fn record_health_transition(credential: &CredentialId, from: HealthStatus, to: HealthStatus) {
	trace_health_transition(credential, from, to);
}

/// Records the caller-reported outcome of an upstream OCR call.
pub fn record_upstream(credential: &CredentialId, outcome: &'static str) {
	trace_upstream(credential, outcome);
	count_upstream(outcome);
}
