//! Status tokens reported to bridge callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level outcome token of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
	Ok,
	UsageError,
	NotFound,
	TransportError,
	RuntimeError,
	ParseError,
	Unknown,
	InternalError,
}

impl Status {
	pub fn as_str(self) -> &'static str {
		match self {
			Status::Ok => "ok",
			Status::UsageError => "usage_error",
			Status::NotFound => "not_found",
			Status::TransportError => "transport_error",
			Status::RuntimeError => "runtime_error",
			Status::ParseError => "parse_error",
			Status::Unknown => "unknown",
			Status::InternalError => "internal_error",
		}
	}

	/// Process exit code for this status.
	pub fn exit_code(self) -> i32 {
		match self {
			Status::Ok => 0,
			Status::UsageError => 2,
			Status::TransportError => 3,
			Status::RuntimeError => 4,
			Status::ParseError => 5,
			Status::Unknown => 6,
			Status::NotFound | Status::InternalError => 1,
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Sub-reason refining `transport_error` and `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
	SessionLockTimeout,
	SendFailed,
	SessionBusy,
	TimedOutNoResultTransportReady,
	TimedOutTransportUnavailable,
	PreviousTimeoutUnresolved,
}

impl StatusReason {
	pub fn as_str(self) -> &'static str {
		match self {
			StatusReason::SessionLockTimeout => "session_lock_timeout",
			StatusReason::SendFailed => "send_failed",
			StatusReason::SessionBusy => "session_busy",
			StatusReason::TimedOutNoResultTransportReady => "timed_out_no_result_transport_ready",
			StatusReason::TimedOutTransportUnavailable => "timed_out_transport_unavailable",
			StatusReason::PreviousTimeoutUnresolved => "previous_timeout_unresolved",
		}
	}

	/// Status token this reason belongs to.
	pub fn status(self) -> Status {
		match self {
			StatusReason::SessionLockTimeout | StatusReason::SendFailed | StatusReason::SessionBusy => Status::TransportError,
			StatusReason::TimedOutNoResultTransportReady
			| StatusReason::TimedOutTransportUnavailable
			| StatusReason::PreviousTimeoutUnresolved => Status::Unknown,
		}
	}
}

impl fmt::Display for StatusReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
