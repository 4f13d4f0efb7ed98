use std::time::Duration;

use serde::Serialize;

use crate::statement::isolate;

/// Code sent by recovery probes.
pub const PROBE_CODE: &str = "invisible(NULL)";

/// One console-input request. Built once per invocation and not modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub id: u64,
	pub code: String,
	pub isolate: bool,
	#[serde(with = "duration_secs")]
	pub send_timeout: Duration,
	#[serde(with = "duration_secs")]
	pub wait_timeout: Duration,
}

impl Request {
	pub fn new(id: u64, code: impl Into<String>, isolate: bool, send_timeout: Duration, wait_timeout: Duration) -> Self {
		Self {
			id,
			code: code.into(),
			isolate,
			send_timeout,
			wait_timeout,
		}
	}

	/// Cheapest possible round trip.
	pub fn probe(id: u64, send_timeout: Duration) -> Self {
		Self::new(id, PROBE_CODE, false, send_timeout, Duration::ZERO)
	}

	/// The code as it is placed in the envelope.
	pub fn payload(&self) -> String {
		if self.isolate { isolate(&self.code) } else { self.code.clone() }
	}
}

mod duration_secs {
	use std::time::Duration;

	use serde::Serializer;

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_f64(value.as_secs_f64())
	}
}
