//! Host process lookups used by session resolution.

use std::path::PathBuf;

use rbridge_runtime::{PidState, infer_stream_from_pid, parse_pid};

/// Answers liveness and registry questions about rsession processes.
pub trait ProcessProbe: Send + Sync {
	/// Liveness of a raw recorded pid value against the rsession program.
	fn pid_state(&self, raw_pid: Option<&str>) -> PidState;

	/// Stream id registered for a live pid, if any.
	fn stream_for_pid(&self, pid: u32) -> Option<String>;

	fn is_alive(&self, raw_pid: Option<&str>) -> bool {
		self.pid_state(raw_pid).is_alive()
	}
}

/// Probe backed by `/proc`, `kill(0)` and the RStudio pid registry.
#[derive(Debug, Clone)]
pub struct SystemProbe {
	program: String,
	registry_dir: PathBuf,
}

impl SystemProbe {
	pub fn new(program: impl Into<String>, registry_dir: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			registry_dir: registry_dir.into(),
		}
	}
}

impl ProcessProbe for SystemProbe {
	fn pid_state(&self, raw_pid: Option<&str>) -> PidState {
		PidState::probe(raw_pid, &self.program)
	}

	fn stream_for_pid(&self, pid: u32) -> Option<String> {
		infer_stream_from_pid(&self.registry_dir, pid)
	}
}

/// Parses a raw pid and returns it only when the probe reports it alive.
pub fn live_pid(probe: &dyn ProcessProbe, raw_pid: Option<&str>) -> Option<u32> {
	if probe.is_alive(raw_pid) { raw_pid.and_then(parse_pid) } else { None }
}
