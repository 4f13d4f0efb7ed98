mod create;
mod estimate;
mod eval;
mod export;
mod send;
mod session;

use std::path::PathBuf;

use rbridge::{Bridge, Note, NoteLevel, RpostbackTransport};
use serde::Serialize;
use tracing::debug;

use crate::cli::{Cli, Commands, SessionAction};
use crate::config::{self, ResolvedConfig};
use crate::error::{CliError, Result};
use crate::output::{CommandInputs, DiagnosticLevel, OutputFormat, ResultBuilder, print_result};

/// Everything a command needs besides its own arguments.
pub struct CommandContext {
	pub bridge: Bridge<RpostbackTransport>,
	pub config: ResolvedConfig,
	pub session_dir: Option<PathBuf>,
	pub format: OutputFormat,
}

impl CommandContext {
	pub fn inputs(&self) -> CommandInputs {
		CommandInputs {
			session_dir: self.session_dir.clone(),
			..CommandInputs::default()
		}
	}

	/// Envelope builder preloaded with inputs and effective config.
	pub fn builder<T: Serialize>(&self, command: &str, inputs: CommandInputs) -> ResultBuilder<T> {
		ResultBuilder::new(command).inputs(inputs).config(self.config.effective())
	}
}

/// Runs the command and prints its envelope. Returns the process exit code.
pub async fn dispatch(cli: Cli) -> i32 {
	let format = cli.format;
	let command = command_name(&cli.command);

	let config = match config::load(&cli.bridge) {
		Ok(config) => config,
		Err(err) => {
			let builder: ResultBuilder<()> = ResultBuilder::new(command);
			return emit(builder, Err(err), format);
		}
	};

	let ctx = CommandContext {
		bridge: Bridge::from_config(config.bridge.clone()),
		config,
		session_dir: cli.bridge.session_dir.clone(),
		format,
	};

	match cli.command {
		Commands::Eval(args) => eval::execute(&ctx, args).await,
		Commands::Export(args) => export::execute(&ctx, args).await,
		Commands::Create(args) => create::execute(&ctx, args).await,
		Commands::Send(args) => send::execute(&ctx, args).await,
		Commands::Estimate(args) => estimate::execute(&ctx, args).await,
		Commands::Session { action } => match action {
			SessionAction::Status => session::status(&ctx).await,
			SessionAction::ClearMarker => session::clear_marker(&ctx),
		},
	}
}

fn command_name(command: &Commands) -> &'static str {
	match command {
		Commands::Eval(_) => "eval",
		Commands::Export(_) => "export",
		Commands::Create(_) => "create",
		Commands::Send(_) => "send",
		Commands::Estimate(_) => "estimate",
		Commands::Session {
			action: SessionAction::Status,
		} => "session status",
		Commands::Session {
			action: SessionAction::ClearMarker,
		} => "session clear-marker",
	}
}

/// Attaches the outcome to `builder`, prints the envelope and returns the
/// exit code.
pub(crate) fn emit<T: Serialize>(builder: ResultBuilder<T>, outcome: Result<T>, format: OutputFormat) -> i32 {
	match outcome {
		Ok(data) => {
			print_result(&builder.data(data).build(), format);
			0
		}
		Err(err) => {
			debug!(target = "rbridge.cli", status = %err.status(), error = %err, "command failed");
			let mut builder = builder.command_error(err.to_command_error());
			for hint in err.hints() {
				builder = builder.diagnostic_with_source(DiagnosticLevel::Info, hint, "hint");
			}
			print_result(&builder.build(), format);
			err.exit_code()
		}
	}
}

pub(crate) fn with_notes<T: Serialize>(mut builder: ResultBuilder<T>, notes: &[Note]) -> ResultBuilder<T> {
	for note in notes {
		let level = match note.level {
			NoteLevel::Info => DiagnosticLevel::Info,
			NoteLevel::Warning => DiagnosticLevel::Warning,
		};
		builder = builder.diagnostic_with_source(level, note.message.clone(), note.source);
	}
	builder
}

pub(crate) fn with_program<T: Serialize>(builder: ResultBuilder<T>, program: &str, print_code: bool) -> ResultBuilder<T> {
	if print_code {
		builder.diagnostic_with_source(DiagnosticLevel::Info, program, "program")
	} else {
		builder
	}
}

/// Serde token of a unit enum, for text summaries.
pub(crate) fn token<T: Serialize>(value: &T) -> String {
	match serde_json::to_value(value) {
		Ok(serde_json::Value::String(s)) => s,
		Ok(other) => other.to_string(),
		Err(_) => String::from("?"),
	}
}

pub(crate) fn usage(message: impl Into<String>) -> CliError {
	CliError::Usage(message.into())
}
