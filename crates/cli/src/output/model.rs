use std::path::PathBuf;

use rbridge_protocol::{Status, StatusReason};
use serde::{Deserialize, Serialize};

/// Current schema version for command output.
pub const SCHEMA_VERSION: u32 = 1;

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub schema_version: u32,
	pub ok: bool,
	pub command: String,
	pub status: Status,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inputs: Option<CommandInputs>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub artifacts: Vec<Artifact>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub diagnostics: Vec<Diagnostic>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub config: Option<EffectiveConfig>,
	/// Plain rendering used by the text format instead of the JSON payload.
	#[serde(skip)]
	pub summary: Option<String>,
}

/// Inputs used for a command execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandInputs {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_dir: Option<PathBuf>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expression: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub request_id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_path: Option<PathBuf>,
	#[serde(flatten, skip_serializing_if = "Option::is_none")]
	pub extra: Option<serde_json::Value>,
}

/// Error information for failed commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: Status,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<StatusReason>,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

impl CommandError {
	/// `code` or `code/reason`, as shown to humans.
	pub fn label(&self) -> String {
		match self.reason {
			Some(reason) => format!("{}/{}", self.code, reason),
			None => self.code.to_string(),
		}
	}
}

/// Artifact produced by a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
	#[serde(rename = "type")]
	pub artifact_type: ArtifactType,
	pub path: PathBuf,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub size_bytes: Option<u64>,
}

impl Artifact {
	/// Describes `path`, reading its size when it exists.
	pub fn at(artifact_type: ArtifactType, path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let size_bytes = std::fs::metadata(&path).ok().map(|meta| meta.len());
		Self {
			artifact_type,
			path,
			size_bytes,
		}
	}
}

/// Artifact categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
	Result,
	Export,
	Marker,
}

/// Diagnostic message attached to a command result.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
	pub level: DiagnosticLevel,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
	Info,
	Warning,
}

/// Effective configuration used for command execution.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
	pub rpostback_bin: PathBuf,
	pub state_dir: PathBuf,
	pub rpc_timeout_ms: u64,
	pub wait_timeout_ms: u64,
	pub lock_wait_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub profile: Option<PathBuf>,
}

/// A command result with no payload data.
pub type EmptyResult = CommandResult<()>;
