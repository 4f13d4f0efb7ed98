use anyhow::Context as _;
use rbridge::{Action, EvalSpec, StatementOptions, estimate_expression};
use serde::Serialize;

use super::{CommandContext, emit, usage, with_notes};
use crate::cli::EstimateArgs;
use crate::error::Result;
use crate::output::{CommandInputs, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateData {
	pub session_id: String,
	pub expression: String,
	pub seconds: f64,
}

pub async fn execute(ctx: &CommandContext, args: EstimateArgs) -> i32 {
	let inputs = CommandInputs {
		expression: Some(args.expr.clone()),
		request_id: Some(args.id),
		..ctx.inputs()
	};
	let builder: ResultBuilder<EstimateData> = ctx.builder("estimate", inputs);
	let (builder, outcome) = run(ctx, &args, builder).await;
	emit(builder, outcome, ctx.format)
}

async fn run(
	ctx: &CommandContext,
	args: &EstimateArgs,
	mut builder: ResultBuilder<EstimateData>,
) -> (ResultBuilder<EstimateData>, Result<EstimateData>) {
	let Some(expr) = estimate_expression(&args.expr) else {
		return (builder, Err(usage("estimate needs a non-empty, single-line expression")));
	};

	let spec = EvalSpec {
		session_dir: ctx.session_dir.clone(),
		request_id: args.id,
		action: Action::Eval(expr),
		options: StatementOptions {
			isolate: true,
			..StatementOptions::default()
		},
		skip_syntax_check: args.skip_syntax_check,
		..EvalSpec::default()
	};

	let result = match ctx.bridge.eval(spec).await {
		Ok(result) => result,
		Err(err) => return (builder, Err(err.into())),
	};
	builder = with_notes(builder, &result.notes);

	let seconds = result
		.value
		.trim()
		.parse::<f64>()
		.with_context(|| format!("session returned a non-numeric estimate: {:?}", result.value));
	match seconds {
		Ok(seconds) => {
			builder = builder.summary(format_seconds(seconds));
			let data = EstimateData {
				session_id: result.session_id,
				expression: args.expr.trim().to_string(),
				seconds,
			};
			(builder, Ok(data))
		}
		Err(err) => (builder, Err(err.into())),
	}
}

fn format_seconds(seconds: f64) -> String {
	if seconds.fract() == 0.0 {
		format!("{seconds:.0}")
	} else {
		seconds.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn whole_seconds_print_without_fraction() {
		assert_eq!(format_seconds(12.0), "12");
		assert_eq!(format_seconds(12.5), "12.5");
	}
}
