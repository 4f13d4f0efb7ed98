//! Classification of raw `rpostback` output.
//!
//! The bridge exit code is unreliable, so the outcome is read from the text it
//! prints. Structured parsing runs first: any line (or the whole blob) that
//! parses as a JSON object with a non-null `error` or a `result` member decides
//! the outcome. Only when nothing parses, and the blob still looks like a
//! truncated or malformed envelope (it starts with `{`), does the ordered
//! [`RESPONSE_RULES`] table apply, first match wins. Errors are checked before
//! results so an error message that happens to mention "result" never reads as
//! success. Plain text is never an envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a response says about the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
	/// The session rejected the request.
	Error,
	/// The session acknowledged the request.
	Result,
	/// Neither indicator was found.
	NoEnvelope,
}

/// One fallback pattern rule.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRule {
	pub name: &'static str,
	pub needle: &'static str,
	pub kind: ResponseKind,
}

/// Fallback substring rules, evaluated in order.
pub const RESPONSE_RULES: &[ResponseRule] = &[
	ResponseRule {
		name: "quoted_error_key",
		needle: "\"error\":",
		kind: ResponseKind::Error,
	},
	ResponseRule {
		name: "quoted_result_key",
		needle: "\"result\":",
		kind: ResponseKind::Result,
	},
];

/// Result of classifying one response blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseClassification {
	pub kind: ResponseKind,
	/// `json` for structured matches, the rule name for pattern matches, `none` otherwise.
	pub matched_by: String,
	/// Error message extracted from the response, when there is one.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// Classifies the combined stdout+stderr of one bridge call.
pub fn classify_response(text: &str) -> ResponseClassification {
	if let Some(classification) = classify_structured(text) {
		return classification;
	}

	let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
	if !compact.starts_with('{') {
		return no_envelope();
	}

	for rule in RESPONSE_RULES {
		if compact.contains(rule.needle) {
			let message = match rule.kind {
				ResponseKind::Error => Some(text.trim().to_string()),
				_ => None,
			};
			return ResponseClassification {
				kind: rule.kind,
				matched_by: rule.name.to_string(),
				message,
			};
		}
	}

	no_envelope()
}

fn no_envelope() -> ResponseClassification {
	ResponseClassification {
		kind: ResponseKind::NoEnvelope,
		matched_by: "none".to_string(),
		message: None,
	}
}

fn classify_structured(text: &str) -> Option<ResponseClassification> {
	let whole = std::iter::once(text.trim());
	let candidates = whole.chain(text.lines().map(str::trim)).filter(|line| line.starts_with('{'));

	let mut saw_result = false;
	for candidate in candidates {
		let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) else {
			continue;
		};

		match map.get("error") {
			Some(Value::Null) | None => {}
			Some(error) => {
				return Some(ResponseClassification {
					kind: ResponseKind::Error,
					matched_by: "json".to_string(),
					message: Some(error_message(error)),
				});
			}
		}

		if map.contains_key("result") {
			saw_result = true;
		}
	}

	saw_result.then(|| ResponseClassification {
		kind: ResponseKind::Result,
		matched_by: "json".to_string(),
		message: None,
	})
}

fn error_message(error: &Value) -> String {
	match error {
		Value::String(s) => s.clone(),
		Value::Object(map) => map
			.get("message")
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| error.to_string()),
		other => other.to_string(),
	}
}
