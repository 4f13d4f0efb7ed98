//! Per-invocation view of the targeted session.
//!
//! Built fresh on every run from the session directory and the process table;
//! never written back to disk.

use std::path::{Path, PathBuf};

use rbridge_runtime::{PidState, parse_pid};
use serde::Serialize;
use tracing::{debug, warn};

use super::env::{ConnectionEnv, EnvResolutionInput, ResolvedEnv, resolve_connection_env};
use super::locator::{LocatedSession, Selection};
use super::probe::ProcessProbe;
use super::state_file::{
	ENVIRONMENT_FILE, KEY_ABEND, KEY_CLIENT_ID, KeyValueFile, PERSISTENT_STATE_FILE, read_busy_flag,
};
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
	pub session_id: String,
	pub directory: PathBuf,
	pub selected_by: Selection,
	pub client_id: String,
	pub abend: bool,
	pub busy: bool,
	pub process_id: Option<u32>,
	pub pid_state: PidState,
	/// Triple used for rpostback, with provenance.
	pub live_env: ResolvedEnv,
	/// Raw values from `suspended-session-data/environment_vars`.
	pub snapshot_env: ConnectionEnv,
}

impl SessionDescriptor {
	/// Reads the session files and resolves the connection triple.
	///
	/// A missing or empty `active-client-id` is left empty here; callers that
	/// send a request must check [`require_client_id`](Self::require_client_id).
	pub fn resolve(located: LocatedSession, caller: &ConnectionEnv, probe: &dyn ProcessProbe) -> Result<Self> {
		let state = KeyValueFile::load(&located.directory.join(PERSISTENT_STATE_FILE))?
			.ok_or_else(|| BridgeError::SessionDirMissing(located.directory.clone()))?;
		let snapshot_env = KeyValueFile::load(&located.directory.join(ENVIRONMENT_FILE))?
			.map(|file| ConnectionEnv::from_snapshot(&file))
			.unwrap_or_default();

		let live_env = resolve_connection_env(
			EnvResolutionInput {
				caller,
				snapshot: &snapshot_env,
			},
			probe,
		);
		let pid_state = probe.pid_state(live_env.env.pid.as_deref());
		let descriptor = Self {
			client_id: state.get(KEY_CLIENT_ID).unwrap_or_default().trim().to_string(),
			abend: state.get(KEY_ABEND).is_some_and(|v| v.trim() == "1"),
			busy: read_busy_flag(&located.directory),
			process_id: live_env.env.pid.as_deref().and_then(parse_pid),
			pid_state,
			live_env,
			snapshot_env,
			session_id: located.session_id,
			directory: located.directory,
			selected_by: located.selected_by,
		};

		debug!(
			target = "rbridge.session",
			session = %descriptor.session_id,
			source = ?descriptor.live_env.source,
			pid_state = descriptor.pid_state.as_str(),
			busy = descriptor.busy,
			abend = descriptor.abend,
			"session resolved"
		);
		if descriptor.live_env.is_possibly_stale() {
			warn!(target = "rbridge.session", session = %descriptor.session_id, "connection values come from an unverified snapshot");
		}
		Ok(descriptor)
	}

	pub fn require_client_id(&self) -> Result<&str> {
		if self.client_id.is_empty() {
			return Err(BridgeError::MissingClientId {
				path: self.state_file(),
			});
		}
		Ok(&self.client_id)
	}

	pub fn state_file(&self) -> PathBuf {
		self.directory.join(PERSISTENT_STATE_FILE)
	}

	pub fn directory(&self) -> &Path {
		&self.directory
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::TempDir;

	use super::super::env::EnvSource;
	use super::super::probe::fake::FakeProbe;
	use super::*;

	fn located(dir: &Path) -> LocatedSession {
		LocatedSession {
			session_id: "session-t".into(),
			directory: dir.to_path_buf(),
			selected_by: Selection::Override,
		}
	}

	#[test]
	fn reads_state_and_snapshot() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("suspended-session-data")).unwrap();
		fs::create_dir_all(dir.path().join("properties")).unwrap();
		fs::write(dir.path().join(PERSISTENT_STATE_FILE), "active-client-id=\"c-1\"\nabend=\"1\"\n").unwrap();
		fs::write(
			dir.path().join(ENVIRONMENT_FILE),
			"RSTUDIO_SESSION_STREAM=\"st\"\nRS_PORT_TOKEN=\"tk\"\nRSTUDIO_SESSION_PID=\"77\"\n",
		)
		.unwrap();
		fs::write(dir.path().join("properties/executing"), "1").unwrap();

		let probe = FakeProbe::with_alive(&[77]);
		let descriptor = SessionDescriptor::resolve(located(dir.path()), &ConnectionEnv::default(), &probe).unwrap();
		assert_eq!(descriptor.require_client_id().unwrap(), "c-1");
		assert!(descriptor.abend);
		assert!(descriptor.busy);
		assert_eq!(descriptor.process_id, Some(77));
		assert_eq!(descriptor.pid_state, PidState::Alive);
		assert_eq!(descriptor.live_env.source, EnvSource::Snapshot);
		assert_eq!(descriptor.snapshot_env.stream.as_deref(), Some("st"));
	}

	#[test]
	fn empty_client_id_is_rejected_before_send() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join(PERSISTENT_STATE_FILE), "active-client-id=\"\"\n").unwrap();

		let descriptor =
			SessionDescriptor::resolve(located(dir.path()), &ConnectionEnv::default(), &FakeProbe::default()).unwrap();
		assert!(matches!(descriptor.require_client_id(), Err(BridgeError::MissingClientId { .. })));
		assert_eq!(descriptor.pid_state, PidState::Missing);
	}
}
