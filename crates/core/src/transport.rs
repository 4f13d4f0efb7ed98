//! One rpostback round trip per request.
//!
//! The bridge's exit status is not trusted; outcomes come from the text it
//! prints.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rbridge_protocol::{CONSOLE_INPUT_METHOD, ResponseClassification, ResponseKind, RpcEnvelope, classify_response};
use rbridge_runtime::{BoundedCommand, CommandOutcome, DEFAULT_KILL_GRACE, ProcessError};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::request::Request;
use crate::session::{ProcessProbe, SessionDescriptor};
use crate::session::state_file::read_abend_flag;

/// Longest response excerpt kept in error details.
const RESPONSE_EXCERPT_CHARS: usize = 2000;

pub const STALE_SNAPSHOT_HINT: &str = "session snapshot metadata may be stale. Prefer live runtime env vars (RSTUDIO_SESSION_STREAM/RS_PORT_TOKEN) over suspended-session-data values.";
pub const SANDBOX_SOCKET_HINT: &str =
	"run this command outside the sandbox or with elevated permissions so it can reach the local rsession socket.";
pub const SANDBOX_RETRY_HINT: &str =
	"if this call ran in a sandbox, rerun the same command with escalation; sandboxed postback access is a known failure mode.";
pub const STALE_AUTH_HINT: &str =
	"stale snapshot env vars can break auth; avoid overriding live RStudio env vars when they are already present.";

/// Three-way (plus timeout) send result. Never collapsed to a boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum SendOutcome {
	Success,
	Failure(String),
	AmbiguousNoEnvelope,
	HardTimeout,
}

impl SendOutcome {
	pub fn as_str(&self) -> &'static str {
		match self {
			SendOutcome::Success => "success",
			SendOutcome::Failure(_) => "failure",
			SendOutcome::AmbiguousNoEnvelope => "ambiguous_no_envelope",
			SendOutcome::HardTimeout => "hard_timeout",
		}
	}
}

/// Everything observed about one send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
	pub outcome: SendOutcome,
	pub classification: Option<ResponseClassification>,
	pub exit_code: Option<i32>,
	pub response: String,
	#[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
	pub elapsed: Duration,
	pub hints: Vec<String>,
}

impl SendReport {
	pub fn new(outcome: SendOutcome) -> Self {
		Self {
			outcome,
			classification: None,
			exit_code: None,
			response: String::new(),
			elapsed: Duration::ZERO,
			hints: Vec::new(),
		}
	}

	pub fn is_success(&self) -> bool {
		self.outcome == SendOutcome::Success
	}

	pub fn to_details(&self, ambiguous: bool) -> Value {
		let excerpt: String = self.response.chars().take(RESPONSE_EXCERPT_CHARS).collect();
		json!({
			"outcome": self.outcome.as_str(),
			"ambiguous": ambiguous,
			"exitCode": self.exit_code,
			"matchedBy": self.classification.as_ref().map(|c| c.matched_by.clone()),
			"response": excerpt,
			"elapsedMs": self.elapsed.as_millis() as u64,
		})
	}
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
	serializer.serialize_u64(value.as_millis() as u64)
}

/// Delivers a request to the live session.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, session: &SessionDescriptor, request: &Request) -> Result<SendReport>;
}

/// Transport that shells out to RStudio's `rpostback`.
#[derive(Clone)]
pub struct RpostbackTransport {
	bin: PathBuf,
	log_path: PathBuf,
	probe: Arc<dyn ProcessProbe>,
	kill_grace: Duration,
}

impl std::fmt::Debug for RpostbackTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpostbackTransport")
			.field("bin", &self.bin)
			.field("log_path", &self.log_path)
			.field("kill_grace", &self.kill_grace)
			.finish_non_exhaustive()
	}
}

impl RpostbackTransport {
	/// `probe` checks the session pid after a hard timeout.
	pub fn new(bin: impl Into<PathBuf>, log_path: impl Into<PathBuf>, probe: impl ProcessProbe + 'static) -> Self {
		Self {
			bin: bin.into(),
			log_path: log_path.into(),
			probe: Arc::new(probe),
			kill_grace: DEFAULT_KILL_GRACE,
		}
	}

	pub fn with_kill_grace(mut self, grace: Duration) -> Self {
		self.kill_grace = grace;
		self
	}

	fn hard_timeout_hints(&self, session: &SessionDescriptor) -> Vec<String> {
		let pid_state = self.probe.pid_state(session.live_env.env.pid.as_deref());
		let abend = read_abend_flag(session.directory());
		warn!(
			target = "rbridge.transport",
			session = %session.session_id,
			pid_state = pid_state.as_str(),
			abend,
			"rpostback hard timeout"
		);
		if abend || pid_state.is_liveness_issue() {
			vec![STALE_SNAPSHOT_HINT.to_string()]
		} else {
			Vec::new()
		}
	}
}

#[async_trait]
impl Transport for RpostbackTransport {
	async fn send(&self, session: &SessionDescriptor, request: &Request) -> Result<SendReport> {
		let client_id = session.require_client_id()?;
		let argument = RpcEnvelope::console_input(client_id, request.payload(), request.id).to_argument()?;
		let log_before = modified_time(&self.log_path);

		info!(
			target = "rbridge.transport",
			session = %session.session_id,
			id = request.id,
			timeout_s = request.send_timeout.as_secs_f64(),
			"sending console_input"
		);

		let mut command = BoundedCommand::new(&self.bin, request.send_timeout)
			.args(["--command", CONSOLE_INPUT_METHOD, "--argument"])
			.arg(argument)
			.kill_grace(self.kill_grace);
		for (key, value) in session.live_env.env.to_vars() {
			command = command.env(key, value);
		}

		let outcome = match command.run().await {
			Ok(outcome) => outcome,
			Err(ProcessError::Spawn { program, source }) => {
				warn!(target = "rbridge.transport", program = %program.display(), error = %source, "rpostback spawn failed");
				return Ok(SendReport::new(SendOutcome::Failure(format!(
					"failed to run {}: {source}",
					program.display()
				))));
			}
			Err(err) => return Err(err.into()),
		};

		match outcome {
			CommandOutcome::TimedOut { output, elapsed } => Ok(SendReport {
				outcome: SendOutcome::HardTimeout,
				classification: None,
				exit_code: None,
				response: output,
				elapsed,
				hints: self.hard_timeout_hints(session),
			}),
			CommandOutcome::Exited { code, output, elapsed } => {
				let classification = classify_response(&output);
				debug!(
					target = "rbridge.transport",
					kind = ?classification.kind,
					matched_by = %classification.matched_by,
					code = ?code,
					"response classified"
				);
				let (outcome, hints) = match classification.kind {
					ResponseKind::Result => (SendOutcome::Success, Vec::new()),
					ResponseKind::Error => {
						let message = classification
							.message
							.clone()
							.unwrap_or_else(|| "JSON-RPC error returned for console_input".to_string());
						(SendOutcome::Failure(message), Vec::new())
					}
					ResponseKind::NoEnvelope => {
						let log_line = fresh_log_line(&self.log_path, log_before);
						(SendOutcome::AmbiguousNoEnvelope, ambiguous_hints(log_line.as_deref(), code))
					}
				};
				Ok(SendReport {
					outcome,
					classification: Some(classification),
					exit_code: code,
					response: output,
					elapsed,
					hints,
				})
			}
		}
	}
}

fn ambiguous_hints(log_line: Option<&str>, exit_code: Option<i32>) -> Vec<String> {
	let mut hints = Vec::new();
	if let Some(line) = log_line {
		hints.push(format!("rpostback log: {line}"));
		if line.contains("Operation not permitted") {
			hints.push(SANDBOX_SOCKET_HINT.to_string());
		}
	}
	if exit_code != Some(0) {
		hints.push(SANDBOX_RETRY_HINT.to_string());
		hints.push(STALE_AUTH_HINT.to_string());
	}
	hints
}

fn modified_time(path: &Path) -> Option<SystemTime> {
	std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Last non-empty log line, only if the log changed since `before`.
fn fresh_log_line(path: &Path, before: Option<SystemTime>) -> Option<String> {
	let after = modified_time(path)?;
	if before == Some(after) {
		return None;
	}
	let content = std::fs::read_to_string(path).ok()?;
	content
		.lines()
		.rev()
		.map(str::trim)
		.find(|line| !line.is_empty())
		.map(str::to_string)
}

#[cfg(test)]
pub(crate) mod fake {
	use std::collections::VecDeque;
	use std::sync::Mutex;

	use super::*;

	/// Scripted transport; each send pops the next outcome and runs its hook.
	#[derive(Default)]
	pub struct FakeTransport {
		script: Mutex<VecDeque<FakeStep>>,
		sent: Mutex<Vec<Request>>,
	}

	pub struct FakeStep {
		pub outcome: SendOutcome,
		pub on_send: Option<Box<dyn Fn(&Request) + Send + Sync>>,
	}

	impl FakeTransport {
		pub fn push(&self, outcome: SendOutcome) -> &Self {
			self.push_with(outcome, |_| {})
		}

		pub fn push_with(&self, outcome: SendOutcome, on_send: impl Fn(&Request) + Send + Sync + 'static) -> &Self {
			self.script.lock().unwrap().push_back(FakeStep {
				outcome,
				on_send: Some(Box::new(on_send)),
			});
			self
		}

		pub fn sent(&self) -> Vec<Request> {
			self.sent.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl Transport for FakeTransport {
		async fn send(&self, session: &SessionDescriptor, request: &Request) -> Result<SendReport> {
			session.require_client_id()?;
			self.sent.lock().unwrap().push(request.clone());
			let step = self.script.lock().unwrap().pop_front();
			let outcome = match step {
				Some(step) => {
					if let Some(hook) = &step.on_send {
						hook(request);
					}
					step.outcome
				}
				None => SendOutcome::AmbiguousNoEnvelope,
			};
			Ok(SendReport::new(outcome))
		}
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::fs;
	use std::os::unix::fs::PermissionsExt;

	use tempfile::TempDir;

	use super::*;
	use crate::session::{ConnectionEnv, FakeProbe, LocatedSession, Selection};

	fn session(dir: &Path) -> SessionDescriptor {
		fs::write(dir.join("session-persistent-state"), "active-client-id=\"cid-7\"\nabend=\"1\"\n").unwrap();
		let located = LocatedSession {
			session_id: "session-t".into(),
			directory: dir.to_path_buf(),
			selected_by: Selection::Override,
		};
		let caller = ConnectionEnv {
			stream: Some("stream-1".into()),
			token: Some("tok-1".into()),
			pid: Some("4242".into()),
		};
		SessionDescriptor::resolve(located, &caller, &FakeProbe::with_alive(&[4242])).unwrap()
	}

	fn script(dir: &Path, body: &str) -> PathBuf {
		let path = dir.join("rpostback");
		fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
		fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	fn request(timeout: Duration) -> Request {
		Request::new(1, "1+1", true, timeout, Duration::from_secs(1))
	}

	#[tokio::test]
	async fn result_envelope_is_success_and_env_is_exported() {
		let dir = TempDir::new().unwrap();
		let bin = script(
			dir.path(),
			"[ \"$RSTUDIO_SESSION_STREAM\" = stream-1 ] && [ \"$2\" = console_input ] && printf '{\"result\":null}'",
		);
		let transport = RpostbackTransport::new(bin, dir.path().join("log"), FakeProbe::with_alive(&[4242]));
		let report = transport.send(&session(dir.path()), &request(Duration::from_secs(5))).await.unwrap();
		assert_eq!(report.outcome, SendOutcome::Success);
	}

	#[tokio::test]
	async fn error_envelope_is_failure_even_with_zero_exit() {
		let dir = TempDir::new().unwrap();
		let bin = script(dir.path(), "printf '{\"error\":{\"message\":\"bad client\"}}'; exit 0");
		let transport = RpostbackTransport::new(bin, dir.path().join("log"), FakeProbe::with_alive(&[4242]));
		let report = transport.send(&session(dir.path()), &request(Duration::from_secs(5))).await.unwrap();
		assert_eq!(report.outcome, SendOutcome::Failure("bad client".into()));
	}

	#[tokio::test]
	async fn silent_bridge_is_ambiguous_with_fresh_log_hint() {
		let dir = TempDir::new().unwrap();
		let log = dir.path().join("rpostback.log");
		fs::write(&log, "old line\n").unwrap();
		let body = format!(
			"sleep 1; printf 'connect: Operation not permitted\\n' >> '{}'; exit 1",
			log.display()
		);
		let bin = script(dir.path(), &body);
		let transport = RpostbackTransport::new(bin, &log, FakeProbe::with_alive(&[4242]));
		let report = transport.send(&session(dir.path()), &request(Duration::from_secs(5))).await.unwrap();

		assert_eq!(report.outcome, SendOutcome::AmbiguousNoEnvelope);
		assert_eq!(report.exit_code, Some(1));
		assert!(report.hints[0].contains("Operation not permitted"));
		assert!(report.hints.iter().any(|h| h == SANDBOX_SOCKET_HINT));
		assert!(report.hints.iter().any(|h| h == STALE_AUTH_HINT));
	}

	#[tokio::test]
	async fn unchanged_log_is_not_reported() {
		let dir = TempDir::new().unwrap();
		let log = dir.path().join("rpostback.log");
		fs::write(&log, "stale failure\n").unwrap();
		let bin = script(dir.path(), "exit 0");
		let transport = RpostbackTransport::new(bin, &log, FakeProbe::with_alive(&[4242]));
		let report = transport.send(&session(dir.path()), &request(Duration::from_secs(5))).await.unwrap();

		assert_eq!(report.outcome, SendOutcome::AmbiguousNoEnvelope);
		assert!(report.hints.is_empty());
	}

	#[tokio::test]
	async fn hung_bridge_is_hard_timeout_with_stale_hint() {
		let dir = TempDir::new().unwrap();
		let bin = script(dir.path(), "sleep 30");
		let transport = RpostbackTransport::new(bin, dir.path().join("log"), FakeProbe::with_alive(&[4242])).with_kill_grace(Duration::from_millis(200));
		let report = transport.send(&session(dir.path()), &request(Duration::from_millis(300))).await.unwrap();

		assert_eq!(report.outcome, SendOutcome::HardTimeout);
		assert_eq!(report.hints, vec![STALE_SNAPSHOT_HINT.to_string()]);
	}

	#[tokio::test]
	async fn hard_timeout_with_dead_pid_gets_stale_hint() {
		let dir = TempDir::new().unwrap();
		let described = session(dir.path());
		fs::write(dir.path().join("session-persistent-state"), "active-client-id=\"cid-7\"\nabend=\"0\"\n").unwrap();
		let bin = script(dir.path(), "sleep 30");
		let transport = RpostbackTransport::new(bin, dir.path().join("log"), FakeProbe::default()).with_kill_grace(Duration::from_millis(200));
		let report = transport.send(&described, &request(Duration::from_millis(300))).await.unwrap();

		assert_eq!(report.outcome, SendOutcome::HardTimeout);
		assert_eq!(report.hints, vec![STALE_SNAPSHOT_HINT.to_string()]);
	}

	#[tokio::test]
	async fn hard_timeout_with_live_pid_and_clean_state_has_no_hint() {
		let dir = TempDir::new().unwrap();
		let described = session(dir.path());
		fs::write(dir.path().join("session-persistent-state"), "active-client-id=\"cid-7\"\nabend=\"0\"\n").unwrap();
		let bin = script(dir.path(), "sleep 30");
		let transport =
			RpostbackTransport::new(bin, dir.path().join("log"), FakeProbe::with_alive(&[4242])).with_kill_grace(Duration::from_millis(200));
		let report = transport.send(&described, &request(Duration::from_millis(300))).await.unwrap();

		assert_eq!(report.outcome, SendOutcome::HardTimeout);
		assert!(report.hints.is_empty());
	}

	#[tokio::test]
	async fn missing_binary_is_failure() {
		let dir = TempDir::new().unwrap();
		let transport = RpostbackTransport::new(dir.path().join("absent"), dir.path().join("log"), FakeProbe::with_alive(&[4242]));
		let report = transport.send(&session(dir.path()), &request(Duration::from_secs(1))).await.unwrap();
		assert!(matches!(report.outcome, SendOutcome::Failure(_)));
	}
}
