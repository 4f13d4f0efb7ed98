use rbridge::{Action, AllowList, EvalResult, EvalSpec, StatementOptions};
use serde_json::json;

use super::{CommandContext, emit, with_notes, with_program};
use crate::cli::EvalArgs;
use crate::output::{Artifact, ArtifactType, CommandInputs, ResultBuilder};

pub async fn execute(ctx: &CommandContext, args: EvalArgs) -> i32 {
	let inputs = CommandInputs {
		expression: Some(args.expr.clone()),
		request_id: Some(args.id),
		output_path: args.out.clone(),
		extra: Some(json!({
			"isolate": !args.no_isolate,
			"captureOutput": args.capture_output,
			"benchmark": args.benchmark.is_some(),
			"leakCheck": args.leak_check,
		})),
		..ctx.inputs()
	};

	let spec = EvalSpec {
		session_dir: ctx.session_dir.clone(),
		request_id: args.id,
		action: Action::Eval(args.expr.clone()),
		options: StatementOptions {
			isolate: !args.no_isolate,
			capture_output: args.capture_output,
			benchmark: args.benchmark.map(Into::into),
			leak_check: args.leak_check,
		},
		out: args.out.clone(),
		allow: AllowList {
			added: args.allow_add.clone(),
			removed: args.allow_remove.clone(),
		},
		skip_syntax_check: args.skip_syntax_check,
	};

	run_spec(ctx, "eval", inputs, spec, args.print_code).await
}

/// Runs an artifact-producing spec and prints its envelope.
///
/// The text summary is the export path when one was written, the artifact
/// value otherwise.
pub(super) async fn run_spec(ctx: &CommandContext, command: &str, inputs: CommandInputs, spec: EvalSpec, print_code: bool) -> i32 {
	let mut builder: ResultBuilder<EvalResult> = ctx.builder(command, inputs);
	let out = spec.out.clone();

	let outcome = ctx.bridge.eval(spec).await;
	match &outcome {
		Ok(result) => {
			builder = with_notes(builder, &result.notes);
			builder = with_program(builder, &result.program, print_code);
			match &result.export {
				Some(export) => {
					builder = builder
						.summary(export.display().to_string())
						.artifact(Artifact::at(ArtifactType::Export, export));
				}
				None => builder = builder.summary(result.value.clone()),
			}
			if result.artifact_kept {
				builder = builder.artifact(Artifact::at(ArtifactType::Result, &result.artifact));
			}
		}
		Err(_) => {
			if let Some(out) = out.as_ref().filter(|path| path.is_file()) {
				builder = builder.artifact(Artifact::at(ArtifactType::Result, out));
			}
		}
	}
	emit(builder, outcome.map_err(Into::into), ctx.format)
}
