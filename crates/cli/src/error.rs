use rbridge::BridgeError;
use rbridge_protocol::{Status, StatusReason};
use thiserror::Error;

use crate::output::CommandError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Bridge(#[from] BridgeError),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("{0}")]
	Usage(String),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	pub fn status(&self) -> Status {
		match self {
			CliError::Bridge(err) => err.status(),
			CliError::Config(_) | CliError::Usage(_) => Status::UsageError,
			CliError::Anyhow(_) => Status::InternalError,
		}
	}

	pub fn reason(&self) -> Option<StatusReason> {
		match self {
			CliError::Bridge(err) => err.reason(),
			_ => None,
		}
	}

	pub fn hints(&self) -> Vec<String> {
		match self {
			CliError::Bridge(err) => err.hints(),
			_ => Vec::new(),
		}
	}

	pub fn exit_code(&self) -> i32 {
		self.status().exit_code()
	}

	/// Convert this error to a CommandError for structured output
	pub fn to_command_error(&self) -> CommandError {
		let details = match self {
			CliError::Bridge(err) => err.details(),
			_ => None,
		};
		CommandError {
			code: self.status(),
			reason: self.reason(),
			message: self.to_string(),
			details,
		}
	}
}
