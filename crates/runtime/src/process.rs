//! Pid liveness and command-line matching.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if pid == 0 {
			return false;
		}

		if PathBuf::from("/proc").join(pid.to_string()).exists() {
			return true;
		}

		let Ok(raw) = libc::pid_t::try_from(pid) else {
			return false;
		};
		// SAFETY: signal 0 performs permission and existence checks only.
		let rc = unsafe { libc::kill(raw, 0) };
		rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
	}

	#[cfg(not(unix))]
	{
		pid == std::process::id()
	}
}

/// Reads the command line of `pid`, space-joined.
///
/// Prefers `/proc/<pid>/cmdline` and falls back to `ps -p <pid> -o args=`.
pub fn process_command_line(pid: u32) -> Option<String> {
	if pid == 0 {
		return None;
	}

	let proc_path = PathBuf::from("/proc").join(pid.to_string()).join("cmdline");
	if let Ok(raw) = std::fs::read(&proc_path) {
		let joined = raw
			.split(|b| *b == 0)
			.filter(|part| !part.is_empty())
			.map(|part| String::from_utf8_lossy(part).into_owned())
			.collect::<Vec<_>>()
			.join(" ");
		if !joined.is_empty() {
			return Some(joined);
		}
	}

	let output = std::process::Command::new("ps")
		.args(["-p", &pid.to_string(), "-o", "args="])
		.output()
		.ok()?;
	if !output.status.success() {
		return None;
	}
	let args = String::from_utf8_lossy(&output.stdout).trim().to_string();
	(!args.is_empty()).then_some(args)
}

/// Returns `true` when `pid` is alive and its command line contains `program`.
pub fn process_matches(pid: u32, program: &str) -> bool {
	if !pid_is_alive(pid) {
		return false;
	}
	process_command_line(pid).is_some_and(|args| args.contains(program))
}

/// Parses a decimal pid; anything else (empty, signs, whitespace inside) is rejected.
pub fn parse_pid(raw: &str) -> Option<u32> {
	let raw = raw.trim();
	if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	raw.parse().ok()
}

/// Liveness verdict for a recorded session pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidState {
	/// No pid was recorded.
	Missing,
	/// The recorded value is not a pid.
	Invalid,
	/// Alive and running the expected program.
	Alive,
	/// Dead, or alive but running something else.
	DeadOrUnmatched,
}

impl PidState {
	/// Probes a raw recorded pid value against the expected program.
	pub fn probe(raw: Option<&str>, program: &str) -> Self {
		let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
			return PidState::Missing;
		};
		match parse_pid(raw) {
			None => PidState::Invalid,
			Some(pid) if process_matches(pid, program) => PidState::Alive,
			Some(_) => PidState::DeadOrUnmatched,
		}
	}

	pub fn is_alive(self) -> bool {
		self == PidState::Alive
	}

	/// `true` for states that indicate the session process is gone or wrong.
	pub fn is_liveness_issue(self) -> bool {
		matches!(self, PidState::Invalid | PidState::DeadOrUnmatched)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			PidState::Missing => "missing",
			PidState::Invalid => "invalid",
			PidState::Alive => "alive",
			PidState::DeadOrUnmatched => "dead_or_unmatched",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[cfg(unix)]
	#[test]
	fn current_process_is_alive() {
		assert!(pid_is_alive(std::process::id()));
	}

	#[cfg(unix)]
	#[test]
	fn pid_zero_is_never_alive() {
		assert!(!pid_is_alive(0));
		assert!(process_command_line(0).is_none());
	}

	#[cfg(target_os = "linux")]
	#[test]
	fn current_process_matches_its_own_executable_name() {
		let exe = std::env::current_exe().unwrap();
		let name = exe.file_name().unwrap().to_string_lossy().to_string();
		assert!(process_matches(std::process::id(), &name));
		assert!(!process_matches(std::process::id(), "/usr/lib/rstudio-server/bin/rsession-not-this"));
	}

	#[test]
	fn parse_pid_accepts_only_digits() {
		assert_eq!(parse_pid("1234"), Some(1234));
		assert_eq!(parse_pid(" 42\n"), Some(42));
		assert_eq!(parse_pid(""), None);
		assert_eq!(parse_pid("-5"), None);
		assert_eq!(parse_pid("12a"), None);
		assert_eq!(parse_pid("99999999999999999999"), None);
	}

	#[test]
	fn probe_classifies_missing_and_invalid() {
		assert_eq!(PidState::probe(None, "rsession"), PidState::Missing);
		assert_eq!(PidState::probe(Some(""), "rsession"), PidState::Missing);
		assert_eq!(PidState::probe(Some("abc"), "rsession"), PidState::Invalid);
		assert!(PidState::Invalid.is_liveness_issue());
		assert!(!PidState::Missing.is_liveness_issue());
	}

	#[cfg(unix)]
	#[test]
	fn probe_reports_unmatched_program_for_live_pid() {
		let own = std::process::id().to_string();
		assert_eq!(
			PidState::probe(Some(&own), "/usr/lib/rstudio-server/bin/rsession"),
			PidState::DeadOrUnmatched
		);
	}
}
