//! Cross-invocation memory of requests whose outcome is unknown.
//!
//! When an invocation ends without knowing whether its request ran, it leaves
//! a timeout marker next to the session lock. The next invocation against
//! the same session must reconcile it before sending anything:
//!
//! ```text
//! Clean -> MarkerPersisted -> RecoveryProbe -> Clean     (probe answered)
//!                                           -> Blocked   (window elapsed)
//! ```
//!
//! Markers past their TTL are purged without probing.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rbridge_protocol::StatusReason;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::lock::session_state_path;
use crate::request::Request;
use crate::session::SessionDescriptor;
use crate::transport::Transport;

/// Current on-disk schema version for timeout markers.
pub const MARKER_SCHEMA_VERSION: u32 = 1;

fn marker_schema_version() -> u32 {
	MARKER_SCHEMA_VERSION
}

/// Unix epoch seconds.
pub fn now_ts() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutMarker {
	#[serde(default = "marker_schema_version")]
	pub schema_version: u32,
	pub session_id: String,
	/// Unix epoch seconds when the timeout happened.
	pub created_at: u64,
	pub ttl_secs: u64,
	pub request_id: u64,
	pub reason: StatusReason,
	#[serde(default)]
	pub causes: Vec<String>,
}

impl TimeoutMarker {
	pub fn new(session_id: impl Into<String>, request_id: u64, reason: StatusReason, ttl: Duration) -> Self {
		Self {
			schema_version: MARKER_SCHEMA_VERSION,
			session_id: session_id.into(),
			created_at: now_ts(),
			ttl_secs: ttl.as_secs(),
			request_id,
			reason,
			causes: Vec::new(),
		}
	}

	pub fn with_causes(mut self, causes: Vec<String>) -> Self {
		self.causes = causes;
		self
	}

	pub fn age_secs(&self, now: u64) -> u64 {
		now.saturating_sub(self.created_at)
	}

	pub fn is_expired(&self, now: u64) -> bool {
		self.age_secs(now) >= self.ttl_secs
	}
}

/// Marker file for one session.
#[derive(Debug, Clone)]
pub struct MarkerStore {
	path: PathBuf,
}

impl MarkerStore {
	pub fn for_session(state_dir: &Path, session_id: &str) -> Self {
		Self {
			path: session_state_path(state_dir, session_id, ".timeout.json"),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads the marker. Unreadable or foreign-schema files are removed.
	pub fn load(&self) -> Result<Option<TimeoutMarker>> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};

		match serde_json::from_str::<TimeoutMarker>(&content) {
			Ok(marker) if marker.schema_version == MARKER_SCHEMA_VERSION => Ok(Some(marker)),
			Ok(marker) => {
				debug!(target = "rbridge.recovery", path = %self.path.display(), version = marker.schema_version, "dropping marker with unsupported schema_version");
				self.clear()?;
				Ok(None)
			}
			Err(err) => {
				warn!(target = "rbridge.recovery", path = %self.path.display(), error = %err, "dropping unreadable timeout marker");
				self.clear()?;
				Ok(None)
			}
		}
	}

	/// Writes the marker via a temp file and rename.
	pub fn save(&self, marker: &TimeoutMarker) -> Result<()> {
		let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
		fs::create_dir_all(dir)?;
		let mut normalized = marker.clone();
		normalized.schema_version = MARKER_SCHEMA_VERSION;

		let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
		tmp.write_all(serde_json::to_string_pretty(&normalized)?.as_bytes())?;
		tmp.persist(&self.path).map_err(|err| BridgeError::Io(err.error))?;
		info!(target = "rbridge.recovery", path = %self.path.display(), request_id = marker.request_id, "timeout marker persisted");
		Ok(())
	}

	/// Removes the marker; returns whether one existed.
	pub fn clear(&self) -> Result<bool> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(true),
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(err.into()),
		}
	}

	/// Loads the marker and purges it when expired.
	pub fn check(&self, now: u64) -> Result<MarkerState> {
		match self.load()? {
			None => Ok(MarkerState::Clean),
			Some(marker) if marker.is_expired(now) => {
				info!(
					target = "rbridge.recovery",
					session = %marker.session_id,
					age_secs = marker.age_secs(now),
					"purging expired timeout marker"
				);
				self.clear()?;
				Ok(MarkerState::Expired(marker))
			}
			Some(marker) => Ok(MarkerState::Pending(marker)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
	Clean,
	Expired(TimeoutMarker),
	Pending(TimeoutMarker),
}

/// How the pre-send reconciliation went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryVerdict {
	Clean,
	PurgedExpired,
	Recovered { attempts: u32 },
}

/// Probe settings for [`RecoveryManager`].
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
	pub window: Duration,
	pub interval: Duration,
	pub send_timeout: Duration,
}

pub struct RecoveryManager {
	store: MarkerStore,
	policy: ProbePolicy,
}

impl RecoveryManager {
	pub fn new(store: MarkerStore, policy: ProbePolicy) -> Self {
		Self { store, policy }
	}

	/// Settles any earlier unresolved timeout before a new request is sent.
	///
	/// Fails with [`BridgeError::PreviousTimeoutUnresolved`] when the session
	/// does not answer a no-op round trip within the window.
	pub async fn reconcile(&self, transport: &dyn Transport, session: &SessionDescriptor, probe_id: u64) -> Result<RecoveryVerdict> {
		let marker = match self.store.check(now_ts())? {
			MarkerState::Clean => return Ok(RecoveryVerdict::Clean),
			MarkerState::Expired(_) => return Ok(RecoveryVerdict::PurgedExpired),
			MarkerState::Pending(marker) => marker,
		};

		info!(
			target = "rbridge.recovery",
			session = %session.session_id,
			window_ms = self.policy.window.as_millis() as u64,
			"unresolved timeout marker found; probing session"
		);

		let started = Instant::now();
		let mut attempts = 0u32;
		loop {
			attempts += 1;
			let remaining = self.policy.window.saturating_sub(started.elapsed());
			let send_timeout = self.policy.send_timeout.min(remaining).max(Duration::from_secs(1));
			let report = transport.send(session, &Request::probe(probe_id, send_timeout)).await?;
			debug!(target = "rbridge.recovery", attempt = attempts, outcome = report.outcome.as_str(), "probe finished");

			if report.is_success() {
				self.store.clear()?;
				info!(target = "rbridge.recovery", session = %session.session_id, attempts, "session answered probe; marker cleared");
				return Ok(RecoveryVerdict::Recovered { attempts });
			}

			let elapsed = started.elapsed();
			if elapsed >= self.policy.window {
				warn!(target = "rbridge.recovery", session = %session.session_id, attempts, "recovery window elapsed");
				return Err(BridgeError::PreviousTimeoutUnresolved {
					session_id: session.session_id.clone(),
					attempts,
					marker,
				});
			}
			tokio::time::sleep(self.policy.interval.min(self.policy.window - elapsed)).await;
		}
	}
}
