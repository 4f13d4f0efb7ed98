use std::io::{self, Write};
use std::time::Instant;

use rbridge_protocol::Status;
use serde::Serialize;

use crate::output::format::OutputFormat;
use crate::output::model::{
	Artifact, CommandError, CommandInputs, CommandResult, Diagnostic, DiagnosticLevel, EffectiveConfig, SCHEMA_VERSION,
};

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	inputs: Option<CommandInputs>,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	duration_ms: Option<u64>,
	artifacts: Vec<Artifact>,
	diagnostics: Vec<Diagnostic>,
	config: Option<EffectiveConfig>,
	summary: Option<String>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			inputs: None,
			data: None,
			error: None,
			start_time: Instant::now(),
			duration_ms: None,
			artifacts: Vec::new(),
			diagnostics: Vec::new(),
			config: None,
			summary: None,
		}
	}

	pub fn inputs(mut self, inputs: CommandInputs) -> Self {
		self.inputs = Some(inputs);
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn summary(mut self, summary: impl Into<String>) -> Self {
		self.summary = Some(summary.into());
		self
	}

	pub fn command_error(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn artifact(mut self, artifact: Artifact) -> Self {
		self.artifacts.push(artifact);
		self
	}

	pub fn diagnostic_with_source(mut self, level: DiagnosticLevel, message: impl Into<String>, source: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
			source: Some(source.into()),
		});
		self
	}

	pub fn config(mut self, config: EffectiveConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn duration_ms(mut self, duration_ms: u64) -> Self {
		self.duration_ms = Some(duration_ms);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		let status = match &self.error {
			Some(error) => error.code,
			None if ok => Status::Ok,
			None => Status::InternalError,
		};
		let duration_ms = self.duration_ms.unwrap_or_else(|| self.start_time.elapsed().as_millis() as u64);

		CommandResult {
			schema_version: SCHEMA_VERSION,
			ok,
			command: self.command,
			status,
			inputs: self.inputs,
			data: self.data,
			error: self.error,
			duration_ms: Some(duration_ms),
			artifacts: self.artifacts,
			diagnostics: self.diagnostics,
			config: self.config,
			summary: self.summary,
		}
	}
}

/// Print a command result in the specified format.
///
/// Structured formats go to stdout. The text format writes the payload to
/// stdout and everything else (errors, diagnostics) to stderr.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Toon => {
			if let Ok(json_value) = serde_json::to_value(result) {
				println!("{}", toon::encode(&json_value, None));
			}
		}
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			print_result_text(result);
		}
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	let mut stdout = io::stdout().lock();
	let mut stderr = io::stderr().lock();

	if result.ok {
		if let Some(ref summary) = result.summary {
			let _ = writeln!(stdout, "{summary}");
		} else if let Some(ref data) = result.data {
			if let Ok(json) = serde_json::to_string_pretty(data) {
				let _ = writeln!(stdout, "{json}");
			}
		}
	} else if let Some(ref error) = result.error {
		let _ = writeln!(stderr, "Error [{}]: {}", error.label(), error.message);
		if let Some(ref details) = error.details {
			if let Ok(json) = serde_json::to_string_pretty(details) {
				let _ = writeln!(stderr, "Details: {json}");
			}
		}
	}

	for diag in &result.diagnostics {
		let prefix = match diag.level {
			DiagnosticLevel::Info => "info",
			DiagnosticLevel::Warning => "warning",
		};
		if let Some(ref source) = diag.source {
			let _ = writeln!(stderr, "[{prefix}:{source}] {}", diag.message);
		} else {
			let _ = writeln!(stderr, "[{prefix}] {}", diag.message);
		}
	}

	for artifact in &result.artifacts {
		let _ = writeln!(stderr, "Saved {:?}: {}", artifact.artifact_type, artifact.path.display());
	}
}
