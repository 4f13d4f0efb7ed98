use rbridge_protocol::{Status, StatusReason};
use serde_json::json;

use super::*;

#[test]
fn success_envelope_has_ok_status() {
	let result = ResultBuilder::new("eval").data(json!({ "value": "2" })).duration_ms(5).build();
	let value = serde_json::to_value(&result).unwrap();
	assert_eq!(value["schemaVersion"], 1);
	assert_eq!(value["ok"], true);
	assert_eq!(value["status"], "ok");
	assert_eq!(value["data"]["value"], "2");
	assert!(value.get("error").is_none());
	assert!(value.get("summary").is_none());
}

#[test]
fn error_envelope_carries_code_and_reason() {
	let result: EmptyResult = ResultBuilder::new("eval")
		.command_error(CommandError {
			code: Status::Unknown,
			reason: Some(StatusReason::TimedOutNoResultTransportReady),
			message: "no result within 8s".into(),
			details: None,
		})
		.diagnostic_with_source(DiagnosticLevel::Warning, "session still computing", "diagnose")
		.build();
	let value = serde_json::to_value(&result).unwrap();
	assert_eq!(value["ok"], false);
	assert_eq!(value["status"], "unknown");
	assert_eq!(value["error"]["code"], "unknown");
	assert_eq!(value["error"]["reason"], "timed_out_no_result_transport_ready");
	assert_eq!(value["diagnostics"][0]["source"], "diagnose");
	assert_eq!(result.error.unwrap().label(), "unknown/timed_out_no_result_transport_ready");
}

#[test]
fn missing_data_without_error_is_not_ok() {
	let result: EmptyResult = ResultBuilder::new("eval").build();
	assert!(!result.ok);
	assert_eq!(result.status, Status::InternalError);
}
