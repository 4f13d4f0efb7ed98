//! Probable causes for a result wait that ran out of time.

use std::path::Path;

use rbridge_runtime::PidState;
use serde::Serialize;

use crate::session::ProcessProbe;
use crate::session::state_file::{read_abend_flag, read_busy_flag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutCause {
	ComputeStillRunning,
	HandoffOrWriteDelay,
	OutputPathUnavailable,
	SessionLivenessIssue,
	Unknown,
}

impl TimeoutCause {
	pub fn as_str(self) -> &'static str {
		match self {
			TimeoutCause::ComputeStillRunning => "compute_still_running",
			TimeoutCause::HandoffOrWriteDelay => "handoff_or_write_delay",
			TimeoutCause::OutputPathUnavailable => "output_path_unavailable",
			TimeoutCause::SessionLivenessIssue => "session_liveness_issue",
			TimeoutCause::Unknown => "unknown",
		}
	}

	/// `(likely cause, suggested action)`.
	pub fn explanation(self) -> (&'static str, &'static str) {
		match self {
			TimeoutCause::ComputeStillRunning => (
				"R code still running in the live console",
				"interrupt or wait for the current console task before retrying",
			),
			TimeoutCause::HandoffOrWriteDelay => (
				"compute finished but result handoff/file write lagged",
				"increase the wait timeout or reduce the payload size, then retry once",
			),
			TimeoutCause::OutputPathUnavailable => (
				"output file removed or inaccessible",
				"check that the artifact directory exists and is writable by the session",
			),
			TimeoutCause::SessionLivenessIssue => (
				"session snapshot points to a dead/restarted rsession",
				"re-resolve live runtime env vars and retry once",
			),
			TimeoutCause::Unknown => (
				"request may not have reached the session",
				"the next invocation will probe the session before sending",
			),
		}
	}
}

/// Signals gathered right after a wait timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutFacts {
	pub busy: bool,
	pub artifact_exists: bool,
	pub artifact_size: u64,
	pub pid_state: PidState,
	pub abend: bool,
}

impl TimeoutFacts {
	/// Reads the signals from disk and the process table.
	pub fn collect(session_dir: &Path, artifact: &Path, raw_pid: Option<&str>, probe: &dyn ProcessProbe) -> Self {
		let metadata = std::fs::metadata(artifact).ok();
		Self {
			busy: read_busy_flag(session_dir),
			artifact_exists: metadata.is_some(),
			artifact_size: metadata.map(|m| m.len()).unwrap_or(0),
			pid_state: probe.pid_state(raw_pid),
			abend: read_abend_flag(session_dir),
		}
	}
}

/// Ordered, non-exclusive causes for `facts`. Never empty.
pub fn diagnose(facts: &TimeoutFacts) -> Vec<TimeoutCause> {
	let mut causes = Vec::new();
	if facts.busy {
		causes.push(TimeoutCause::ComputeStillRunning);
	}
	if facts.artifact_exists && facts.artifact_size == 0 && !facts.busy {
		causes.push(TimeoutCause::HandoffOrWriteDelay);
	}
	if !facts.artifact_exists {
		causes.push(TimeoutCause::OutputPathUnavailable);
	}
	if facts.pid_state.is_liveness_issue() || facts.abend {
		causes.push(TimeoutCause::SessionLivenessIssue);
	}
	if causes.is_empty() {
		causes.push(TimeoutCause::Unknown);
	}
	causes
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
	pub causes: Vec<TimeoutCause>,
	pub facts: TimeoutFacts,
}

impl Diagnosis {
	pub fn from_facts(facts: TimeoutFacts) -> Self {
		Self {
			causes: diagnose(&facts),
			facts,
		}
	}

	pub fn cause_names(&self) -> Vec<&'static str> {
		self.causes.iter().map(|c| c.as_str()).collect()
	}

	pub fn hints(&self) -> Vec<String> {
		self.causes
			.iter()
			.map(|cause| {
				let (likely, action) = cause.explanation();
				format!("{}: {likely}; {action}", cause.as_str())
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;

	fn base_facts() -> TimeoutFacts {
		TimeoutFacts {
			busy: false,
			artifact_exists: true,
			artifact_size: 0,
			pid_state: PidState::Alive,
			abend: false,
		}
	}

	#[test]
	fn idle_empty_artifact_is_handoff_delay() {
		assert_eq!(diagnose(&base_facts()), vec![TimeoutCause::HandoffOrWriteDelay]);
	}

	#[test]
	fn absent_artifact_and_dead_process_is_stable() {
		let facts = TimeoutFacts {
			artifact_exists: false,
			pid_state: PidState::DeadOrUnmatched,
			..base_facts()
		};
		let first: BTreeSet<_> = diagnose(&facts).into_iter().collect();
		let second: BTreeSet<_> = diagnose(&facts).into_iter().collect();
		assert_eq!(first, second);
		assert_eq!(
			first,
			BTreeSet::from([TimeoutCause::OutputPathUnavailable, TimeoutCause::SessionLivenessIssue])
		);
	}

	#[test]
	fn busy_with_absent_artifact_reports_both() {
		let facts = TimeoutFacts {
			busy: true,
			artifact_exists: false,
			..base_facts()
		};
		let causes = diagnose(&facts);
		assert!(causes.contains(&TimeoutCause::ComputeStillRunning));
		assert!(causes.contains(&TimeoutCause::OutputPathUnavailable));
		assert!(!causes.contains(&TimeoutCause::HandoffOrWriteDelay));
	}

	#[test]
	fn abend_alone_is_liveness_issue() {
		let facts = TimeoutFacts {
			artifact_size: 10,
			abend: true,
			..base_facts()
		};
		assert_eq!(diagnose(&facts), vec![TimeoutCause::SessionLivenessIssue]);
	}

	#[test]
	fn unknown_only_when_nothing_matches() {
		let facts = TimeoutFacts {
			artifact_size: 12,
			pid_state: PidState::Missing,
			..base_facts()
		};
		let diagnosis = Diagnosis::from_facts(facts);
		assert_eq!(diagnosis.causes, vec![TimeoutCause::Unknown]);
		assert_eq!(diagnosis.cause_names(), vec!["unknown"]);
	}

	#[test]
	fn hints_name_each_cause() {
		let diagnosis = Diagnosis::from_facts(TimeoutFacts {
			busy: true,
			..base_facts()
		});
		let hints = diagnosis.hints();
		assert_eq!(hints.len(), 1);
		assert!(hints[0].starts_with("compute_still_running: R code still running"));
	}
}
