use rbridge::{Action, Binding, EvalResult, EvalSpec, StatementOptions};
use serde_json::json;

use super::eval::run_spec;
use super::{CommandContext, emit};
use crate::cli::CreateArgs;
use crate::output::{CommandInputs, ResultBuilder};

pub async fn execute(ctx: &CommandContext, args: CreateArgs) -> i32 {
	let inputs = CommandInputs {
		expression: Some(args.bindings.join("; ")),
		request_id: Some(args.id),
		output_path: args.out.clone(),
		extra: Some(json!({
			"isolate": !args.no_isolate,
			"leakCheck": args.leak_check,
		})),
		..ctx.inputs()
	};

	let bindings = match args.bindings.iter().map(|spec| Binding::parse(spec)).collect::<rbridge::Result<Vec<_>>>() {
		Ok(bindings) => bindings,
		Err(err) => {
			let builder: ResultBuilder<EvalResult> = ctx.builder("create", inputs);
			return emit(builder, Err(err.into()), ctx.format);
		}
	};

	let spec = EvalSpec {
		session_dir: ctx.session_dir.clone(),
		request_id: args.id,
		action: Action::Create(bindings),
		options: StatementOptions {
			isolate: !args.no_isolate,
			leak_check: args.leak_check,
			..StatementOptions::default()
		},
		out: args.out.clone(),
		skip_syntax_check: args.skip_syntax_check,
		..EvalSpec::default()
	};

	run_spec(ctx, "create", inputs, spec, args.print_code).await
}
