use std::fmt::Write as _;

use rbridge::SessionStatus;
use serde::Serialize;

use super::{CommandContext, emit, token};
use crate::output::{Artifact, ArtifactType, DiagnosticLevel, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearMarkerData {
	pub session_id: String,
	pub cleared: bool,
}

pub async fn status(ctx: &CommandContext) -> i32 {
	let mut builder: ResultBuilder<SessionStatus> = ctx.builder("session status", ctx.inputs());
	let outcome = ctx.bridge.status(ctx.session_dir.as_deref()).await;
	if let Ok(status) = &outcome {
		builder = builder.summary(render_status(status));
		if status.session.live_env.is_possibly_stale() {
			builder = builder.diagnostic_with_source(
				DiagnosticLevel::Warning,
				"connection environment could not be verified against a live rsession",
				"session",
			);
		}
		if status.marker.is_some() {
			builder = builder.artifact(Artifact::at(ArtifactType::Marker, &status.marker_path));
		}
	}
	emit(builder, outcome.map_err(Into::into), ctx.format)
}

pub fn clear_marker(ctx: &CommandContext) -> i32 {
	let mut builder: ResultBuilder<ClearMarkerData> = ctx.builder("session clear-marker", ctx.inputs());
	let outcome = ctx.bridge.clear_marker(ctx.session_dir.as_deref());
	if let Ok((session_id, cleared)) = &outcome {
		builder = builder.summary(if *cleared {
			format!("cleared timeout marker for {session_id}")
		} else {
			format!("no timeout marker for {session_id}")
		});
	}
	let outcome = outcome.map(|(session_id, cleared)| ClearMarkerData { session_id, cleared });
	emit(builder, outcome.map_err(Into::into), ctx.format)
}

fn render_status(status: &SessionStatus) -> String {
	let session = &status.session;
	let env = &session.live_env;
	let mut out = String::new();
	let _ = writeln!(out, "session:   {} ({})", session.session_id, token(&session.selected_by));
	let _ = writeln!(out, "directory: {}", session.directory.display());
	let _ = writeln!(
		out,
		"pid:       {} ({})",
		session.process_id.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
		token(&session.pid_state)
	);
	let _ = writeln!(out, "busy:      {}", session.busy);
	let _ = writeln!(out, "abend:     {}", session.abend);
	let _ = writeln!(
		out,
		"stream:    {}{}",
		env.env.stream.as_deref().unwrap_or("-"),
		if env.stream_inferred { " (from pid registry)" } else { "" }
	);
	let _ = writeln!(out, "env from:  {}", token(&env.source));
	let _ = writeln!(
		out,
		"lock:      {}{}",
		status.lock_path.display(),
		if status.lock_held_elsewhere { " (held)" } else { "" }
	);
	match &status.marker {
		Some(marker) => {
			let _ = write!(
				out,
				"marker:    {} ({}{})",
				status.marker_path.display(),
				marker.reason,
				if status.marker_expired { ", expired" } else { "" }
			);
		}
		None => {
			let _ = write!(out, "marker:    none");
		}
	}
	out
}
