//! Result artifact markers written by the session.
//!
//! The artifact is an opaque text file. Three shapes are recognised:
//! `__ERROR__:<message>` for a runtime failure, `__SYNTAX_ERROR__` followed by
//! parser output for a pre-execution failure, and anything else non-empty as
//! the literal success payload.

use serde::{Deserialize, Serialize};

/// Prefix marking a runtime error message.
pub const ERROR_MARKER: &str = "__ERROR__:";

/// First line of a parse-failure artifact.
pub const SYNTAX_ERROR_MARKER: &str = "__SYNTAX_ERROR__";

/// Observed state of an artifact path at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "content", rename_all = "snake_case")]
pub enum ArtifactState {
	Absent,
	EmptyPresent,
	Populated(String),
}

/// Classified content of a populated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ArtifactContent {
	/// Literal success payload, format opaque to the bridge.
	Value(String),
	/// Runtime error message (suffix after [`ERROR_MARKER`]).
	Error(String),
	/// Parser output following [`SYNTAX_ERROR_MARKER`].
	SyntaxError(String),
}

impl ArtifactContent {
	/// Classifies raw artifact text.
	pub fn classify(raw: &str) -> Self {
		if let Some(message) = raw.strip_prefix(ERROR_MARKER) {
			return ArtifactContent::Error(message.trim_end_matches(['\r', '\n']).to_string());
		}

		if let Some(rest) = raw.strip_prefix(SYNTAX_ERROR_MARKER) {
			return ArtifactContent::SyntaxError(rest.trim_matches(['\r', '\n']).to_string());
		}

		ArtifactContent::Value(raw.to_string())
	}

	/// Renders the parse-failure payload written into a requested result file.
	pub fn syntax_error_payload(detail: &str, snippet: Option<&str>) -> String {
		let mut payload = format!("{SYNTAX_ERROR_MARKER}\n{detail}");
		if let Some(snippet) = snippet.filter(|s| !s.is_empty()) {
			payload.push('\n');
			payload.push_str(snippet);
			payload.push('\n');
		}
		payload
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_marker_yields_exact_message() {
		assert_eq!(
			ArtifactContent::classify("__ERROR__:object not found"),
			ArtifactContent::Error("object not found".into())
		);
	}

	#[test]
	fn error_marker_drops_trailing_newline_from_write_lines() {
		assert_eq!(
			ArtifactContent::classify("__ERROR__:object 'x' not found\n"),
			ArtifactContent::Error("object 'x' not found".into())
		);
	}

	#[test]
	fn syntax_marker_keeps_detail() {
		let raw = "__SYNTAX_ERROR__\n<text>:2:3: unexpected ')'\n";
		assert_eq!(
			ArtifactContent::classify(raw),
			ArtifactContent::SyntaxError("<text>:2:3: unexpected ')'".into())
		);
	}

	#[test]
	fn other_content_is_verbatim_value() {
		assert_eq!(ArtifactContent::classify("2\n"), ArtifactContent::Value("2\n".into()));
		assert_eq!(
			ArtifactContent::classify("list(error = \"__ERROR__:x\")"),
			ArtifactContent::Value("list(error = \"__ERROR__:x\")".into())
		);
	}

	#[test]
	fn syntax_payload_appends_snippet_when_present() {
		let payload = ArtifactContent::syntax_error_payload("bad", Some(">>    1: x <-"));
		assert_eq!(payload, "__SYNTAX_ERROR__\nbad\n>>    1: x <-\n");
		assert_eq!(ArtifactContent::syntax_error_payload("bad", None), "__SYNTAX_ERROR__\nbad");
	}
}
