// self
use crate::{
	obs::{OpKind, OpOutcome},
	selector::SkipReason,
};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"ocr_pool_governor_op_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

pub(crate) fn count_skip(reason: SkipReason) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("ocr_pool_governor_skip_total", "reason" => reason.as_str()).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = reason;
	}
}

pub(crate) fn count_upstream(outcome: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("ocr_pool_governor_upstream_total", "outcome" => outcome).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = outcome;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_noop_without_a_global_recorder() {
		record_op_outcome(OpKind::Select, OpOutcome::Failure);
		count_skip(SkipReason::RateLimitExceeded);
		count_upstream("failed");
	}
}
