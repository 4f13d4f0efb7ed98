//! Request lifecycle: locate, resolve, lock, reconcile, send, wait, diagnose.

use std::path::{Path, PathBuf};

use rbridge_protocol::{ArtifactContent, StatusReason};
use serde::Serialize;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::diagnose::{Diagnosis, TimeoutFacts};
use crate::error::{BridgeError, Result};
use crate::lock::{self, LockHandle, lock_path};
use crate::namespace::{AllowList, NamespaceDiff, NamespaceSnapshot, diff};
use crate::poller::{PollOutcome, wait_for_artifact};
use crate::recovery::{MarkerStore, ProbePolicy, RecoveryManager, RecoveryVerdict, TimeoutMarker, now_ts};
use crate::request::Request;
use crate::session::state_file::read_busy_flag;
use crate::session::{ConnectionEnv, ProcessProbe, SessionDescriptor, SessionLocator, SystemProbe};
use crate::statement::{Action, StatementOptions, build_program};
use crate::syntax::{RscriptChecker, SyntaxChecker, SyntaxVerdict};
use crate::transport::{RpostbackTransport, SendOutcome, SendReport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteLevel {
	Info,
	Warning,
}

/// Non-fatal observation attached to a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
	pub level: NoteLevel,
	pub source: &'static str,
	pub message: String,
}

impl Note {
	fn warning(source: &'static str, message: impl Into<String>) -> Self {
		Self {
			level: NoteLevel::Warning,
			source,
			message: message.into(),
		}
	}

	fn info(source: &'static str, message: impl Into<String>) -> Self {
		Self {
			level: NoteLevel::Info,
			source,
			message: message.into(),
		}
	}
}

/// Run one [`Action`] and read its result back.
#[derive(Debug, Clone, Default)]
pub struct EvalSpec {
	pub session_dir: Option<PathBuf>,
	pub request_id: u64,
	pub action: Action,
	pub options: StatementOptions,
	/// Caller-owned artifact path; a temp file is used otherwise.
	pub out: Option<PathBuf>,
	pub allow: AllowList,
	pub skip_syntax_check: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
	pub session_id: String,
	pub request_id: u64,
	/// Artifact content without the trailing newline.
	pub value: String,
	pub artifact: PathBuf,
	pub artifact_kept: bool,
	/// RDS file written by an export; kept on success only.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub export: Option<PathBuf>,
	pub recovery: RecoveryVerdict,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub namespace: Option<NamespaceDiff>,
	#[serde(skip)]
	pub program: String,
	#[serde(skip)]
	pub notes: Vec<Note>,
}

/// Post code without waiting for a result.
#[derive(Debug, Clone, Default)]
pub struct SendSpec {
	pub session_dir: Option<PathBuf>,
	pub request_id: u64,
	pub code: String,
	pub isolate: bool,
	pub skip_syntax_check: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
	pub session_id: String,
	pub request_id: u64,
	pub recovery: RecoveryVerdict,
	pub report: SendReport,
	#[serde(skip)]
	pub program: String,
	#[serde(skip)]
	pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
	pub session: SessionDescriptor,
	pub lock_path: PathBuf,
	pub lock_held_elsewhere: bool,
	pub marker_path: PathBuf,
	pub marker: Option<TimeoutMarker>,
	pub marker_expired: bool,
}

/// The artifact for one eval, removed on drop unless caller-owned.
///
/// An export file is removed on drop unless [`keep_export`](Self::keep_export)
/// ran, so a failed or undecided export never leaves an RDS behind.
struct ArtifactFile {
	path: PathBuf,
	temp: Option<TempPath>,
	sidecar: Option<PathBuf>,
	export: Option<PathBuf>,
}

impl ArtifactFile {
	fn create(out: Option<&Path>, artifact_dir: &Path) -> Result<Self> {
		match out {
			Some(path) => Ok(Self {
				path: path.to_path_buf(),
				temp: None,
				sidecar: None,
				export: None,
			}),
			None => {
				std::fs::create_dir_all(artifact_dir)?;
				let temp = tempfile::Builder::new()
					.prefix("rbridge_result_")
					.suffix(".txt")
					.tempfile_in(artifact_dir)?
					.into_temp_path();
				Ok(Self {
					path: temp.to_path_buf(),
					temp: Some(temp),
					sidecar: None,
					export: None,
				})
			}
		}
	}

	fn is_kept(&self) -> bool {
		self.temp.is_none()
	}

	/// Truncates the artifact and removes a stale sidecar or export.
	fn reset(&self) -> Result<()> {
		std::fs::write(&self.path, "")?;
		for stale in self.sidecar.iter().chain(&self.export) {
			let _ = std::fs::remove_file(stale);
		}
		Ok(())
	}

	fn keep_export(&mut self) -> Option<PathBuf> {
		self.export.take()
	}
}

impl Drop for ArtifactFile {
	fn drop(&mut self) {
		for path in self.sidecar.iter().chain(&self.export) {
			let _ = std::fs::remove_file(path);
		}
	}
}

pub struct Bridge<T: Transport> {
	config: BridgeConfig,
	transport: T,
	probe: Box<dyn ProcessProbe>,
	syntax: Box<dyn SyntaxChecker>,
	caller_env: ConnectionEnv,
}

impl Bridge<RpostbackTransport> {
	/// Bridge wired to rpostback, Rscript and the host process table.
	pub fn from_config(config: BridgeConfig) -> Self {
		let probe = SystemProbe::new(&config.rsession_program, &config.pid_registry_dir);
		let transport = RpostbackTransport::new(&config.rpostback_bin, &config.rpostback_log, probe.clone());
		let syntax = RscriptChecker::new(&config.rscript, config.syntax_timeout);
		Self::new(config, transport, Box::new(probe), Box::new(syntax)).with_caller_env(ConnectionEnv::from_process())
	}
}

impl<T: Transport> Bridge<T> {
	pub fn new(config: BridgeConfig, transport: T, probe: Box<dyn ProcessProbe>, syntax: Box<dyn SyntaxChecker>) -> Self {
		Self {
			config,
			transport,
			probe,
			syntax,
			caller_env: ConnectionEnv::default(),
		}
	}

	pub fn with_caller_env(mut self, env: ConnectionEnv) -> Self {
		self.caller_env = env;
		self
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	pub fn resolve_session(&self, session_dir: Option<&Path>) -> Result<SessionDescriptor> {
		let located = SessionLocator::new(&self.config.sessions_root, self.probe.as_ref()).locate(session_dir, &self.caller_env)?;
		SessionDescriptor::resolve(located, &self.caller_env, self.probe.as_ref())
	}

	pub fn marker_store(&self, session_id: &str) -> MarkerStore {
		MarkerStore::for_session(&self.config.state_dir, session_id)
	}

	pub async fn eval(&self, spec: EvalSpec) -> Result<EvalResult> {
		spec.action.validate(&spec.options)?;

		let mut artifact = ArtifactFile::create(spec.out.as_deref(), &self.config.artifact_dir)?;
		let program = build_program(&spec.action, &artifact.path, &spec.options);
		artifact.sidecar = program.sidecar.clone();
		artifact.export = program.export.clone();
		let request = Request::new(
			spec.request_id,
			program.code,
			true,
			self.config.rpc_timeout,
			self.config.wait_timeout,
		);
		let payload = request.payload();

		let mut notes = Vec::new();
		if let Err(err) = self.preflight(&payload, spec.skip_syntax_check, &mut notes).await {
			if let (BridgeError::Parse { detail, snippet }, true) = (&err, artifact.is_kept()) {
				std::fs::write(&artifact.path, ArtifactContent::syntax_error_payload(detail, snippet.as_deref()))?;
			}
			return Err(err);
		}

		let session = self.resolve_session(spec.session_dir.as_deref())?;
		session.require_client_id()?;
		let _lock = self.lock(&session).await?;
		let recovery = self.reconcile(&session, request.id).await?;
		self.ensure_idle(&session)?;

		artifact.reset()?;
		self.deliver(&session, &request).await?;

		info!(target = "rbridge.poll", path = %artifact.path.display(), timeout_s = request.wait_timeout.as_secs_f64(), "waiting for result");
		let value = match wait_for_artifact(&artifact.path, request.wait_timeout, self.config.poll_interval).await {
			PollOutcome::Success(raw) => raw.trim_end_matches(['\r', '\n']).to_string(),
			PollOutcome::RuntimeError(message) => return Err(BridgeError::Runtime(message)),
			PollOutcome::SyntaxError(detail) => return Err(BridgeError::Parse { detail, snippet: None }),
			PollOutcome::Timeout => return Err(self.result_timeout(&session, &request, &artifact.path)),
		};

		let namespace = match &artifact.sidecar {
			Some(sidecar) => {
				let mut allow = spec.allow.clone();
				allow.added.extend(spec.action.created_names());
				self.check_namespace(sidecar, &allow, &mut notes)
			}
			None => None,
		};
		let export = artifact.keep_export();
		if let Some(path) = &export {
			info!(target = "rbridge.poll", path = %path.display(), "export written");
		}

		Ok(EvalResult {
			session_id: session.session_id.clone(),
			request_id: request.id,
			value,
			artifact: artifact.path.clone(),
			artifact_kept: artifact.is_kept(),
			export,
			recovery,
			namespace,
			program: payload,
			notes,
		})
	}

	pub async fn send(&self, spec: SendSpec) -> Result<SendResult> {
		if spec.code.trim().is_empty() {
			return Err(BridgeError::Usage("code must not be empty".into()));
		}
		let request = Request::new(
			spec.request_id,
			spec.code,
			spec.isolate,
			self.config.rpc_timeout,
			self.config.wait_timeout,
		);
		let payload = request.payload();

		let mut notes = Vec::new();
		self.preflight(&payload, spec.skip_syntax_check, &mut notes).await?;

		let session = self.resolve_session(spec.session_dir.as_deref())?;
		session.require_client_id()?;
		let _lock = self.lock(&session).await?;
		let recovery = self.reconcile(&session, request.id).await?;
		self.ensure_idle(&session)?;
		let report = self.deliver(&session, &request).await?;

		Ok(SendResult {
			session_id: session.session_id.clone(),
			request_id: request.id,
			recovery,
			report,
			program: payload,
			notes,
		})
	}

	/// Snapshot of the session and its lock/marker files. Sends nothing.
	pub async fn status(&self, session_dir: Option<&Path>) -> Result<SessionStatus> {
		let session = self.resolve_session(session_dir)?;
		let lock_held_elsewhere = match lock::acquire(&self.config.state_dir, &session.session_id, std::time::Duration::ZERO).await {
			Ok(handle) => {
				handle.release();
				false
			}
			Err(BridgeError::LockTimeout { .. }) => true,
			Err(err) => return Err(err),
		};

		let store = self.marker_store(&session.session_id);
		let (marker, marker_expired) = match store.load()? {
			Some(marker) => {
				let expired = marker.is_expired(now_ts());
				(Some(marker), expired)
			}
			None => (None, false),
		};

		Ok(SessionStatus {
			lock_path: lock_path(&self.config.state_dir, &session.session_id),
			lock_held_elsewhere,
			marker_path: store.path().to_path_buf(),
			marker,
			marker_expired,
			session,
		})
	}

	/// Deletes the session's timeout marker; returns the session id and
	/// whether a marker existed.
	pub fn clear_marker(&self, session_dir: Option<&Path>) -> Result<(String, bool)> {
		let session = self.resolve_session(session_dir)?;
		let cleared = self.marker_store(&session.session_id).clear()?;
		Ok((session.session_id, cleared))
	}

	async fn preflight(&self, payload: &str, skip: bool, notes: &mut Vec<Note>) -> Result<()> {
		if skip {
			notes.push(Note::info("syntax", "parse check skipped by request"));
			return Ok(());
		}
		match self.syntax.check(payload).await? {
			SyntaxVerdict::Valid => Ok(()),
			SyntaxVerdict::Skipped { reason } => {
				notes.push(Note::warning("syntax", format!("parse check skipped: {reason}")));
				Ok(())
			}
			SyntaxVerdict::Invalid { detail, snippet } => Err(BridgeError::Parse { detail, snippet }),
		}
	}

	async fn lock(&self, session: &SessionDescriptor) -> Result<LockHandle> {
		lock::acquire(&self.config.state_dir, &session.session_id, self.config.lock_wait).await
	}

	async fn reconcile(&self, session: &SessionDescriptor, probe_id: u64) -> Result<RecoveryVerdict> {
		let manager = RecoveryManager::new(
			self.marker_store(&session.session_id),
			ProbePolicy {
				window: self.config.recovery_window,
				interval: self.config.probe_interval,
				send_timeout: self.config.rpc_timeout,
			},
		);
		manager.reconcile(&self.transport, session, probe_id).await
	}

	fn ensure_idle(&self, session: &SessionDescriptor) -> Result<()> {
		if read_busy_flag(session.directory()) {
			warn!(target = "rbridge.session", session = %session.session_id, "session is executing; refusing to send");
			return Err(BridgeError::SessionBusy {
				session_id: session.session_id.clone(),
			});
		}
		Ok(())
	}

	/// Sends once and maps every non-success outcome onto its error.
	async fn deliver(&self, session: &SessionDescriptor, request: &Request) -> Result<SendReport> {
		let report = self.transport.send(session, request).await?;
		match report.outcome.clone() {
			SendOutcome::Success => Ok(report),
			SendOutcome::Failure(message) => Err(BridgeError::TransportFailed { message, report }),
			SendOutcome::AmbiguousNoEnvelope => Err(BridgeError::TransportAmbiguous { report }),
			SendOutcome::HardTimeout => {
				let marker = TimeoutMarker::new(
					&session.session_id,
					request.id,
					StatusReason::TimedOutTransportUnavailable,
					self.config.marker_ttl,
				);
				let marker_persisted = self.persist_marker(&marker);
				Err(BridgeError::TransportHardTimeout {
					timeout: request.send_timeout,
					report,
					marker_persisted,
				})
			}
		}
	}

	fn result_timeout(&self, session: &SessionDescriptor, request: &Request, artifact: &Path) -> BridgeError {
		let facts = TimeoutFacts::collect(
			session.directory(),
			artifact,
			session.live_env.env.pid.as_deref(),
			self.probe.as_ref(),
		);
		let diagnosis = Diagnosis::from_facts(facts);
		warn!(
			target = "rbridge.poll",
			session = %session.session_id,
			causes = ?diagnosis.cause_names(),
			"no result before deadline"
		);

		let marker = TimeoutMarker::new(
			&session.session_id,
			request.id,
			StatusReason::TimedOutNoResultTransportReady,
			self.config.marker_ttl,
		)
		.with_causes(diagnosis.cause_names().into_iter().map(str::to_string).collect());
		let marker_persisted = self.persist_marker(&marker);

		BridgeError::ResultTimeout {
			timeout: request.wait_timeout,
			diagnosis,
			marker_persisted,
		}
	}

	/// Marker write failures are logged and reported, never fatal.
	fn persist_marker(&self, marker: &TimeoutMarker) -> bool {
		match self.marker_store(&marker.session_id).save(marker) {
			Ok(()) => true,
			Err(err) => {
				warn!(target = "rbridge.recovery", error = %err, "failed to persist timeout marker");
				false
			}
		}
	}

	fn check_namespace(&self, sidecar: &Path, allow: &AllowList, notes: &mut Vec<Note>) -> Option<NamespaceDiff> {
		let snapshot = std::fs::read_to_string(sidecar)
			.ok()
			.and_then(|text| NamespaceSnapshot::parse(&text));
		let Some(snapshot) = snapshot else {
			notes.push(Note::warning("namespace", "namespace snapshot missing or unreadable"));
			return None;
		};
		let result = diff(&snapshot, allow);
		if result.is_clean() {
			debug!(target = "rbridge.namespace", "global environment unchanged");
		} else {
			warn!(target = "rbridge.namespace", summary = %result.summary(), "global environment changed");
			notes.push(Note::warning("namespace_leak", result.summary()));
		}
		Some(result)
	}
}
