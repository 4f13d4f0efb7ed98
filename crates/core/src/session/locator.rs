//! Finds the session directory to target.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use super::env::ConnectionEnv;
use super::probe::{ProcessProbe, live_pid};
use super::state_file::{ENVIRONMENT_FILE, KeyValueFile, PERSISTENT_STATE_FILE};
use crate::error::{BridgeError, Result};

const SESSION_DIR_PREFIX: &str = "session-";

/// A session directory picked by the locator, before its files are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSession {
	pub session_id: String,
	pub directory: PathBuf,
	pub selected_by: Selection,
}

/// Why a candidate was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
	Override,
	CallerPid,
	LiveSnapshotPid,
	MostRecent,
}

impl LocatedSession {
	fn new(directory: PathBuf, selected_by: Selection) -> Self {
		let session_id = directory
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| directory.display().to_string());
		Self {
			session_id,
			directory,
			selected_by,
		}
	}
}

pub struct SessionLocator<'a> {
	sessions_root: &'a Path,
	probe: &'a dyn ProcessProbe,
}

impl<'a> SessionLocator<'a> {
	pub fn new(sessions_root: &'a Path, probe: &'a dyn ProcessProbe) -> Self {
		Self { sessions_root, probe }
	}

	/// Picks the target session.
	///
	/// An explicit `override_dir` must hold a persistent-state file. Otherwise
	/// candidates are visited newest first: a snapshot recording the caller's
	/// live pid wins, then one recording any live rsession, then the newest
	/// candidate with a state file.
	pub fn locate(&self, override_dir: Option<&Path>, caller: &ConnectionEnv) -> Result<LocatedSession> {
		if let Some(dir) = override_dir {
			if !dir.join(PERSISTENT_STATE_FILE).is_file() {
				return Err(BridgeError::SessionDirMissing(dir.to_path_buf()));
			}
			return Ok(LocatedSession::new(dir.to_path_buf(), Selection::Override));
		}

		let candidates: Vec<PathBuf> = self
			.candidates()
			.into_iter()
			.filter(|dir| dir.join(PERSISTENT_STATE_FILE).is_file())
			.collect();
		debug!(target = "rbridge.session", root = %self.sessions_root.display(), count = candidates.len(), "session candidates");

		if let Some(caller_pid) = live_pid(self.probe, caller.pid.as_deref()) {
			let wanted = caller_pid.to_string();
			if let Some(dir) = candidates.iter().find(|dir| snapshot_pid(dir).as_deref() == Some(wanted.as_str())) {
				return Ok(LocatedSession::new(dir.clone(), Selection::CallerPid));
			}
		}

		if let Some(dir) = candidates
			.iter()
			.find(|dir| self.probe.is_alive(snapshot_pid(dir).as_deref()))
		{
			return Ok(LocatedSession::new(dir.clone(), Selection::LiveSnapshotPid));
		}

		candidates
			.into_iter()
			.next()
			.map(|dir| LocatedSession::new(dir, Selection::MostRecent))
			.ok_or_else(|| BridgeError::SessionNotFound {
				root: self.sessions_root.to_path_buf(),
			})
	}

	/// `session-*` directories, newest modification time first.
	fn candidates(&self) -> Vec<PathBuf> {
		let Ok(entries) = std::fs::read_dir(self.sessions_root) else {
			return Vec::new();
		};
		let mut dirs: Vec<(SystemTime, PathBuf)> = entries
			.filter_map(|entry| entry.ok())
			.filter(|entry| entry.file_name().to_string_lossy().starts_with(SESSION_DIR_PREFIX))
			.filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_dir()))
			.map(|entry| {
				let mtime = entry
					.metadata()
					.and_then(|m| m.modified())
					.unwrap_or(SystemTime::UNIX_EPOCH);
				(mtime, entry.path())
			})
			.collect();
		dirs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
		dirs.into_iter().map(|(_, path)| path).collect()
	}
}

fn snapshot_pid(dir: &Path) -> Option<String> {
	let file = KeyValueFile::load(&dir.join(ENVIRONMENT_FILE)).ok().flatten()?;
	ConnectionEnv::from_snapshot(&file).pid
}
