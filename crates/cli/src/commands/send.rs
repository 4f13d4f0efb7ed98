use rbridge::{SendResult, SendSpec};
use serde_json::json;

use super::{CommandContext, emit, with_notes, with_program};
use crate::cli::SendArgs;
use crate::output::{CommandInputs, ResultBuilder};

pub async fn execute(ctx: &CommandContext, args: SendArgs) -> i32 {
	let inputs = CommandInputs {
		expression: Some(args.code.clone()),
		request_id: Some(args.id),
		extra: Some(json!({ "isolate": args.isolate })),
		..ctx.inputs()
	};
	let mut builder: ResultBuilder<SendResult> = ctx.builder("send", inputs);

	let spec = SendSpec {
		session_dir: ctx.session_dir.clone(),
		request_id: args.id,
		code: args.code.clone(),
		isolate: args.isolate,
		skip_syntax_check: args.skip_syntax_check,
	};

	let outcome = ctx.bridge.send(spec).await;
	if let Ok(result) = &outcome {
		builder = with_notes(builder, &result.notes);
		builder = with_program(builder, &result.program, args.print_code);
		builder = builder.summary(format!("sent to {} ({})", result.session_id, result.report.outcome.as_str()));
	}
	emit(builder, outcome.map_err(Into::into), ctx.format)
}
