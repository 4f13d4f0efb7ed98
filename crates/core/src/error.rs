use std::path::PathBuf;
use std::time::Duration;

use rbridge_protocol::{Status, StatusReason};
use serde_json::{Value, json};
use thiserror::Error;

use crate::diagnose::Diagnosis;
use crate::recovery::TimeoutMarker;
use crate::transport::SendReport;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("{0}")]
	Usage(String),

	#[error("no active RStudio session found under {root}")]
	SessionNotFound { root: PathBuf },

	#[error("session directory not found: {0}")]
	SessionDirMissing(PathBuf),

	#[error("active-client-id missing in {path}")]
	MissingClientId { path: PathBuf },

	#[error("timed out after {waited:?} waiting for session lock {path}")]
	LockTimeout {
		session_id: String,
		path: PathBuf,
		waited: Duration,
	},

	#[error("session {session_id} is busy executing another request")]
	SessionBusy { session_id: String },

	#[error("previous timeout for session {session_id} is unresolved after {attempts} probe(s)")]
	PreviousTimeoutUnresolved {
		session_id: String,
		attempts: u32,
		marker: TimeoutMarker,
	},

	#[error("rpostback failed: {message}")]
	TransportFailed { message: String, report: SendReport },

	#[error("rpostback produced no response envelope")]
	TransportAmbiguous { report: SendReport },

	#[error("rpostback exceeded its {timeout:?} hard timeout")]
	TransportHardTimeout {
		timeout: Duration,
		report: SendReport,
		marker_persisted: bool,
	},

	#[error("R parse error: {detail}")]
	Parse { detail: String, snippet: Option<String> },

	#[error("R error: {0}")]
	Runtime(String),

	#[error("no result within {timeout:?}")]
	ResultTimeout {
		timeout: Duration,
		diagnosis: Diagnosis,
		marker_persisted: bool,
	},

	#[error(transparent)]
	Process(#[from] rbridge_runtime::ProcessError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl BridgeError {
	/// Outcome status reported for this failure.
	pub fn status(&self) -> Status {
		match self {
			BridgeError::Usage(_) => Status::UsageError,
			BridgeError::SessionNotFound { .. } | BridgeError::SessionDirMissing(_) => Status::NotFound,
			BridgeError::MissingClientId { .. } => Status::NotFound,
			BridgeError::Parse { .. } => Status::ParseError,
			BridgeError::Runtime(_) => Status::RuntimeError,
			BridgeError::Process(_) | BridgeError::Io(_) | BridgeError::Json(_) => Status::InternalError,
			other => other.reason().map(StatusReason::status).unwrap_or(Status::Unknown),
		}
	}

	pub fn reason(&self) -> Option<StatusReason> {
		match self {
			BridgeError::LockTimeout { .. } => Some(StatusReason::SessionLockTimeout),
			BridgeError::SessionBusy { .. } => Some(StatusReason::SessionBusy),
			BridgeError::PreviousTimeoutUnresolved { .. } => Some(StatusReason::PreviousTimeoutUnresolved),
			BridgeError::TransportFailed { .. } | BridgeError::TransportAmbiguous { .. } => Some(StatusReason::SendFailed),
			BridgeError::TransportHardTimeout { .. } => Some(StatusReason::TimedOutTransportUnavailable),
			BridgeError::ResultTimeout { .. } => Some(StatusReason::TimedOutNoResultTransportReady),
			_ => None,
		}
	}

	/// Hints worth surfacing next to the error message.
	pub fn hints(&self) -> Vec<String> {
		match self {
			BridgeError::TransportFailed { report, .. }
			| BridgeError::TransportAmbiguous { report }
			| BridgeError::TransportHardTimeout { report, .. } => report.hints.clone(),
			BridgeError::ResultTimeout { diagnosis, .. } => diagnosis.hints(),
			BridgeError::PreviousTimeoutUnresolved { .. } => {
				vec!["the session has not answered since an earlier request timed out; wait for it to finish or run `rbridge session clear-marker`".into()]
			}
			BridgeError::SessionBusy { .. } => vec!["wait for the running R computation to finish, then retry".into()],
			_ => Vec::new(),
		}
	}

	/// Machine-readable context for the failure.
	pub fn details(&self) -> Option<Value> {
		match self {
			BridgeError::MissingClientId { path } => Some(json!({ "stateFile": path })),
			BridgeError::LockTimeout { session_id, path, waited } => Some(json!({
				"sessionId": session_id,
				"lockPath": path,
				"waitedMs": waited.as_millis() as u64,
			})),
			BridgeError::SessionBusy { session_id } => Some(json!({ "sessionId": session_id })),
			BridgeError::PreviousTimeoutUnresolved { session_id, attempts, marker } => Some(json!({
				"sessionId": session_id,
				"probeAttempts": attempts,
				"marker": marker,
			})),
			BridgeError::TransportFailed { report, .. } => Some(report.to_details(false)),
			BridgeError::TransportAmbiguous { report } => Some(report.to_details(true)),
			BridgeError::TransportHardTimeout {
				report, marker_persisted, ..
			} => {
				let mut details = report.to_details(false);
				details["markerPersisted"] = json!(marker_persisted);
				Some(details)
			}
			BridgeError::Parse { snippet, .. } => snippet.as_ref().map(|s| json!({ "snippet": s })),
			BridgeError::ResultTimeout {
				diagnosis, marker_persisted, ..
			} => Some(json!({
				"diagnosis": diagnosis,
				"markerPersisted": marker_persisted,
			})),
			_ => None,
		}
	}
}
