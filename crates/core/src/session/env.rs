//! Pure resolution of the rpostback connection triple.

use serde::Serialize;

use super::probe::{ProcessProbe, live_pid};
use super::state_file::{KEY_PORT_TOKEN, KEY_SESSION_PID, KEY_STREAM, KeyValueFile};

/// `(stream, token, pid)` as handed to rpostback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEnv {
	pub stream: Option<String>,
	pub token: Option<String>,
	pub pid: Option<String>,
}

impl ConnectionEnv {
	/// Reads the triple from this process's environment.
	pub fn from_process() -> Self {
		let read = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
		Self {
			stream: read(KEY_STREAM),
			token: read(KEY_PORT_TOKEN),
			pid: read(KEY_SESSION_PID),
		}
	}

	pub fn from_snapshot(file: &KeyValueFile) -> Self {
		let read = |key: &str| file.non_empty(key).map(str::to_string);
		Self {
			stream: read(KEY_STREAM),
			token: read(KEY_PORT_TOKEN),
			pid: read(KEY_SESSION_PID),
		}
	}

	pub fn is_complete(&self) -> bool {
		self.stream.is_some() && self.token.is_some() && self.pid.is_some()
	}

	/// Variables to export to the rpostback child.
	pub fn to_vars(&self) -> Vec<(&'static str, String)> {
		[(KEY_STREAM, &self.stream), (KEY_PORT_TOKEN, &self.token), (KEY_SESSION_PID, &self.pid)]
			.into_iter()
			.filter_map(|(key, value)| value.clone().map(|v| (key, v)))
			.collect()
	}

	/// Fills empty fields from `other`; returns `true` if anything changed.
	fn fill_gaps_from(&mut self, other: &ConnectionEnv) -> bool {
		let mut filled = false;
		for (slot, value) in [
			(&mut self.stream, &other.stream),
			(&mut self.token, &other.token),
			(&mut self.pid, &other.pid),
		] {
			if slot.is_none() && value.is_some() {
				*slot = value.clone();
				filled = true;
			}
		}
		filled
	}
}

/// Which step produced the resolved triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSource {
	/// The caller's own environment, verified against a live rsession.
	Caller,
	/// The session snapshot, verified against a live rsession.
	Snapshot,
	/// Gaps filled from an unverified snapshot.
	StaleSnapshot,
	/// Nothing could be verified or filled.
	Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEnv {
	pub env: ConnectionEnv,
	pub source: EnvSource,
	/// The stream id came from the pid registry.
	pub stream_inferred: bool,
}

impl ResolvedEnv {
	pub fn is_possibly_stale(&self) -> bool {
		matches!(self.source, EnvSource::StaleSnapshot | EnvSource::Unverified)
	}
}

/// Inputs to [`resolve_connection_env`].
#[derive(Debug, Clone, Copy)]
pub struct EnvResolutionInput<'a> {
	pub caller: &'a ConnectionEnv,
	pub snapshot: &'a ConnectionEnv,
}

/// Resolves the connection triple, applying each step only to fill what the
/// previous one left open.
pub fn resolve_connection_env(input: EnvResolutionInput<'_>, probe: &dyn ProcessProbe) -> ResolvedEnv {
	let caller = input.caller;
	let snapshot = input.snapshot;

	if caller.is_complete() && probe.is_alive(caller.pid.as_deref()) {
		return ResolvedEnv {
			env: caller.clone(),
			source: EnvSource::Caller,
			stream_inferred: false,
		};
	}

	let mut env = caller.clone();
	let source = if probe.is_alive(snapshot.pid.as_deref()) {
		env = ConnectionEnv {
			stream: snapshot.stream.clone().or(env.stream),
			token: snapshot.token.clone().or(env.token),
			pid: snapshot.pid.clone(),
		};
		EnvSource::Snapshot
	} else if env.fill_gaps_from(snapshot) {
		EnvSource::StaleSnapshot
	} else {
		EnvSource::Unverified
	};

	let mut stream_inferred = false;
	if env.stream.is_none() {
		if let Some(stream) = live_pid(probe, env.pid.as_deref()).and_then(|pid| probe.stream_for_pid(pid)) {
			env.stream = Some(stream);
			stream_inferred = true;
		}
	}

	ResolvedEnv {
		env,
		source,
		stream_inferred,
	}
}

#[cfg(test)]
mod tests {
	use super::super::probe::fake::FakeProbe;
	use super::*;

	fn triple(stream: Option<&str>, token: Option<&str>, pid: Option<&str>) -> ConnectionEnv {
		ConnectionEnv {
			stream: stream.map(str::to_string),
			token: token.map(str::to_string),
			pid: pid.map(str::to_string),
		}
	}

	#[test]
	fn live_caller_triple_is_never_overwritten() {
		let caller = triple(Some("live-stream"), Some("live-token"), Some("100"));
		let snapshot = triple(Some("snap-stream"), Some("snap-token"), Some("200"));
		let probe = FakeProbe::with_alive(&[100, 200]).register(100, "registry-stream");

		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &caller,
				snapshot: &snapshot,
			},
			&probe,
		);
		assert_eq!(resolved.source, EnvSource::Caller);
		assert_eq!(resolved.env, caller);
		assert!(!resolved.stream_inferred);
	}

	#[test]
	fn live_snapshot_replaces_dead_caller_values() {
		let caller = triple(Some("old-stream"), Some("old-token"), Some("100"));
		let snapshot = triple(Some("snap-stream"), Some("snap-token"), Some("200"));
		let probe = FakeProbe::with_alive(&[200]);

		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &caller,
				snapshot: &snapshot,
			},
			&probe,
		);
		assert_eq!(resolved.source, EnvSource::Snapshot);
		assert_eq!(resolved.env, snapshot);
	}

	#[test]
	fn dead_snapshot_only_fills_gaps_and_is_flagged_stale() {
		let caller = triple(None, Some("caller-token"), None);
		let snapshot = triple(Some("snap-stream"), Some("snap-token"), Some("300"));
		let probe = FakeProbe::default();

		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &caller,
				snapshot: &snapshot,
			},
			&probe,
		);
		assert_eq!(resolved.source, EnvSource::StaleSnapshot);
		assert!(resolved.is_possibly_stale());
		assert_eq!(resolved.env, triple(Some("snap-stream"), Some("caller-token"), Some("300")));
	}

	#[test]
	fn missing_stream_is_inferred_from_registry_for_live_pid() {
		let caller = ConnectionEnv::default();
		let snapshot = triple(None, Some("tok"), Some("400"));
		let probe = FakeProbe::with_alive(&[400]).register(400, "abc123");

		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &caller,
				snapshot: &snapshot,
			},
			&probe,
		);
		assert_eq!(resolved.source, EnvSource::Snapshot);
		assert_eq!(resolved.env.stream.as_deref(), Some("abc123"));
		assert!(resolved.stream_inferred);
	}

	#[test]
	fn dead_pid_never_triggers_registry_inference() {
		let caller = ConnectionEnv::default();
		let snapshot = triple(None, Some("tok"), Some("400"));
		let probe = FakeProbe::default().register(400, "abc123");

		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &caller,
				snapshot: &snapshot,
			},
			&probe,
		);
		assert_eq!(resolved.env.stream, None);
		assert!(!resolved.stream_inferred);
	}

	#[test]
	fn nothing_available_is_unverified() {
		let empty = ConnectionEnv::default();
		let resolved = resolve_connection_env(
			EnvResolutionInput {
				caller: &empty,
				snapshot: &empty,
			},
			&FakeProbe::default(),
		);
		assert_eq!(resolved.source, EnvSource::Unverified);
		assert!(resolved.env.to_vars().is_empty());
	}

	#[test]
	fn to_vars_skips_missing_fields() {
		let env = triple(Some("s"), None, Some("9"));
		assert_eq!(env.to_vars(), vec![(KEY_STREAM, "s".to_string()), (KEY_SESSION_PID, "9".to_string())]);
	}
}
