//! Sleep-poll wait for the result artifact.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use rbridge_protocol::{ArtifactContent, ArtifactState};
use tracing::{debug, trace};

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
	Success(String),
	RuntimeError(String),
	SyntaxError(String),
	Timeout,
}

/// Reads the artifact's current state. Unreadable files count as absent.
pub fn observe(path: &Path) -> ArtifactState {
	match std::fs::read(path) {
		Ok(bytes) if bytes.is_empty() => ArtifactState::EmptyPresent,
		Ok(bytes) => ArtifactState::Populated(String::from_utf8_lossy(&bytes).into_owned()),
		Err(err) if err.kind() == io::ErrorKind::NotFound => ArtifactState::Absent,
		Err(err) => {
			trace!(target = "rbridge.poll", path = %path.display(), error = %err, "artifact unreadable");
			ArtifactState::Absent
		}
	}
}

/// Polls `path` every `interval` until it has content or `timeout` elapses.
///
/// The artifact is checked once more at the deadline before giving up.
pub async fn wait_for_artifact(path: &Path, timeout: Duration, interval: Duration) -> PollOutcome {
	let started = Instant::now();
	let interval = interval.max(Duration::from_millis(10));
	let mut checks = 0u32;

	loop {
		checks += 1;
		if let ArtifactState::Populated(raw) = observe(path) {
			debug!(
				target = "rbridge.poll",
				path = %path.display(),
				checks,
				elapsed_ms = started.elapsed().as_millis() as u64,
				"artifact populated"
			);
			return match ArtifactContent::classify(&raw) {
				ArtifactContent::Value(value) => PollOutcome::Success(value),
				ArtifactContent::Error(message) => PollOutcome::RuntimeError(message),
				ArtifactContent::SyntaxError(detail) => PollOutcome::SyntaxError(detail),
			};
		}

		let elapsed = started.elapsed();
		if elapsed >= timeout {
			debug!(target = "rbridge.poll", path = %path.display(), checks, "wait deadline reached");
			return PollOutcome::Timeout;
		}
		tokio::time::sleep(interval.min(timeout - elapsed)).await;
	}
}
