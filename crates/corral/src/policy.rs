//! Restart eligibility classification.
//!
//! The core never restarts a process on its own initiative: this module only
//! classifies an observed exit so whoever orchestrates restarts (the CLI, an
//! external monitor) can decide. Keeping the decision out of the readiness
//! loop keeps Start a pure liveness check.

use crate::types::{ExitOutcome, RestartPolicy};

/// What an orchestrator should do with a process that exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
	/// The exit makes the process eligible for another start attempt.
	Retry,
	/// Leave it down.
	Fail,
}

/// Classify an exit under a restart policy.
///
/// Signal-terminated exits carry no code and count as failures.
pub fn evaluate(policy: RestartPolicy, exit: ExitOutcome) -> RestartDecision {
	match policy {
		RestartPolicy::Never => RestartDecision::Fail,
		RestartPolicy::Always => RestartDecision::Retry,
		RestartPolicy::OnFailure => {
			if exit.success {
				RestartDecision::Fail
			} else {
				RestartDecision::Retry
			}
		}
	}
}
