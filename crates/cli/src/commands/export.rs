use rbridge::{Action, EvalSpec, StatementOptions};
use serde_json::json;

use super::CommandContext;
use super::eval::run_spec;
use crate::cli::ExportArgs;
use crate::output::CommandInputs;

pub async fn execute(ctx: &CommandContext, args: ExportArgs) -> i32 {
	let inputs = CommandInputs {
		expression: Some(args.expr.clone()),
		request_id: Some(args.id),
		output_path: args.out.clone(),
		extra: Some(json!({
			"isolate": !args.no_isolate,
			"captureOutput": args.capture_output,
		})),
		..ctx.inputs()
	};

	let spec = EvalSpec {
		session_dir: ctx.session_dir.clone(),
		request_id: args.id,
		action: Action::Export(args.expr.clone()),
		options: StatementOptions {
			isolate: !args.no_isolate,
			capture_output: args.capture_output,
			..StatementOptions::default()
		},
		out: args.out.clone(),
		skip_syntax_check: args.skip_syntax_check,
		..EvalSpec::default()
	};

	run_spec(ctx, "export", inputs, spec, args.print_code).await
}
