use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rbridge::BenchmarkUnit;

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "rbridge")]
#[command(about = "Run R code in a live RStudio session and read the result back")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: text (default), json, ndjson, or toon
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	#[command(flatten)]
	pub bridge: BridgeArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Overrides for the layered configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
	/// Profile file (defaults to $RBRIDGE_CONFIG, then ~/.config/rbridge/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Target this session directory instead of auto-detecting one
	#[arg(long, global = true, value_name = "DIR")]
	pub session_dir: Option<PathBuf>,

	/// Directory scanned for `session-*` directories
	#[arg(long, global = true, value_name = "DIR")]
	pub sessions_root: Option<PathBuf>,

	/// Path to the rpostback binary
	#[arg(long, global = true, value_name = "PATH")]
	pub rpostback_bin: Option<PathBuf>,

	/// Directory holding lock files and timeout markers
	#[arg(long, global = true, value_name = "DIR")]
	pub state_dir: Option<PathBuf>,

	/// Hard timeout for one rpostback call, in seconds
	#[arg(long, global = true, value_name = "SECS")]
	pub rpc_timeout: Option<u64>,

	/// How long to wait for the result artifact, in seconds
	#[arg(long, global = true, value_name = "SECS")]
	pub wait_timeout: Option<u64>,

	/// How long to wait for the session lock, in seconds
	#[arg(long, global = true, value_name = "SECS")]
	pub lock_wait: Option<u64>,

	/// How long to probe a session after an earlier timeout, in seconds
	#[arg(long, global = true, value_name = "SECS")]
	pub recovery_window: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Evaluate an R expression in the session and print its value
	Eval(EvalArgs),
	/// Save an expression's value as xz-compressed RDS and print the file path
	Export(ExportArgs),
	/// Create new .GlobalEnv variables, refusing names that already exist
	Create(CreateArgs),
	/// Post R code to the session without waiting for a result
	Send(SendArgs),
	/// Estimate how many seconds exporting an object's value would take
	Estimate(EstimateArgs),
	/// Inspect or repair per-session bridge state
	Session {
		#[command(subcommand)]
		action: SessionAction,
	},
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
	/// R expression to evaluate
	pub expr: String,

	/// JSON-RPC request id
	#[arg(long, default_value_t = 1)]
	pub id: u64,

	/// Evaluate in .GlobalEnv instead of a scratch environment
	#[arg(long)]
	pub no_isolate: bool,

	/// Capture printed output, messages and warnings alongside the value
	#[arg(long)]
	pub capture_output: bool,

	/// Return elapsed time instead of the value
	#[arg(long, value_enum, num_args = 0..=1, default_missing_value = "seconds", value_name = "UNIT")]
	pub benchmark: Option<BenchmarkArg>,

	/// Report names the expression added to or removed from .GlobalEnv
	#[arg(long)]
	pub leak_check: bool,

	/// Name the expression may add to .GlobalEnv (repeatable)
	#[arg(long = "allow-add", value_name = "NAME")]
	pub allow_add: Vec<String>,

	/// Name the expression may remove from .GlobalEnv (repeatable)
	#[arg(long = "allow-remove", value_name = "NAME")]
	pub allow_remove: Vec<String>,

	/// Write the result here and keep the file
	#[arg(long, value_name = "FILE")]
	pub out: Option<PathBuf>,

	/// Skip the Rscript parse check
	#[arg(long)]
	pub skip_syntax_check: bool,

	/// Include the generated R program in the diagnostics
	#[arg(long)]
	pub print_code: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
	/// Single-line R expression whose value is saved
	pub expr: String,

	/// JSON-RPC request id
	#[arg(long, default_value_t = 1)]
	pub id: u64,

	/// Evaluate in .GlobalEnv instead of a scratch environment
	#[arg(long)]
	pub no_isolate: bool,

	/// Capture printed output, messages and warnings alongside the path
	#[arg(long)]
	pub capture_output: bool,

	/// Write the result here and keep the file; the RDS lands at FILE.rds
	#[arg(long, value_name = "FILE")]
	pub out: Option<PathBuf>,

	/// Skip the Rscript parse check
	#[arg(long)]
	pub skip_syntax_check: bool,

	/// Include the generated R program in the diagnostics
	#[arg(long)]
	pub print_code: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
	/// Variables to create, each written NAME:=EXPR
	#[arg(required = true, value_name = "NAME:=EXPR")]
	pub bindings: Vec<String>,

	/// JSON-RPC request id
	#[arg(long, default_value_t = 1)]
	pub id: u64,

	/// Evaluate the expressions in .GlobalEnv instead of a scratch environment
	#[arg(long)]
	pub no_isolate: bool,

	/// Report other names added to or removed from .GlobalEnv
	#[arg(long)]
	pub leak_check: bool,

	/// Write the result here and keep the file
	#[arg(long, value_name = "FILE")]
	pub out: Option<PathBuf>,

	/// Skip the Rscript parse check
	#[arg(long)]
	pub skip_syntax_check: bool,

	/// Include the generated R program in the diagnostics
	#[arg(long)]
	pub print_code: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
	/// R code to post
	pub code: String,

	/// JSON-RPC request id
	#[arg(long, default_value_t = 1)]
	pub id: u64,

	/// Wrap the code in a scratch environment
	#[arg(long)]
	pub isolate: bool,

	/// Skip the Rscript parse check
	#[arg(long)]
	pub skip_syntax_check: bool,

	/// Include the posted R program in the diagnostics
	#[arg(long)]
	pub print_code: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EstimateArgs {
	/// Single-line R expression whose value would be exported
	pub expr: String,

	/// JSON-RPC request id
	#[arg(long, default_value_t = 1)]
	pub id: u64,

	/// Skip the Rscript parse check
	#[arg(long)]
	pub skip_syntax_check: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SessionAction {
	/// Show the located session, its connection environment and bridge state
	Status,
	/// Delete the session's timeout marker
	ClearMarker,
}

/// Benchmark unit (CLI wrapper for rbridge::BenchmarkUnit)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum BenchmarkArg {
	#[default]
	Seconds,
	Ms,
}

impl From<BenchmarkArg> for BenchmarkUnit {
	fn from(unit: BenchmarkArg) -> Self {
		match unit {
			BenchmarkArg::Seconds => BenchmarkUnit::Seconds,
			BenchmarkArg::Ms => BenchmarkUnit::Ms,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn eval_flags_parse() {
		let cli = Cli::try_parse_from([
			"rbridge",
			"-vv",
			"--format",
			"json",
			"eval",
			"1+1",
			"--benchmark",
			"--allow-add",
			"model",
			"--session-dir",
			"/tmp/session-1",
		])
		.unwrap();
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.format, OutputFormat::Json);
		assert_eq!(cli.bridge.session_dir, Some(PathBuf::from("/tmp/session-1")));
		let Commands::Eval(args) = cli.command else {
			panic!("expected eval");
		};
		assert_eq!(args.expr, "1+1");
		assert_eq!(args.benchmark, Some(BenchmarkArg::Seconds));
		assert_eq!(args.allow_add, vec!["model".to_string()]);
		assert!(!args.no_isolate);
	}

	#[test]
	fn benchmark_accepts_unit() {
		let cli = Cli::try_parse_from(["rbridge", "eval", "x", "--benchmark", "ms"]).unwrap();
		let Commands::Eval(args) = cli.command else {
			panic!("expected eval");
		};
		assert_eq!(args.benchmark, Some(BenchmarkArg::Ms));
	}

	#[test]
	fn export_takes_one_expression_and_no_benchmark() {
		let cli = Cli::try_parse_from(["rbridge", "export", "mtcars", "--capture-output"]).unwrap();
		let Commands::Export(args) = cli.command else {
			panic!("expected export");
		};
		assert_eq!(args.expr, "mtcars");
		assert!(args.capture_output);

		assert!(Cli::try_parse_from(["rbridge", "export", "mtcars", "--benchmark"]).is_err());
		assert!(Cli::try_parse_from(["rbridge", "export", "a", "b"]).is_err());
	}

	#[test]
	fn create_collects_bindings() {
		let cli = Cli::try_parse_from(["rbridge", "create", "a:=1", "b:=a + 1", "--leak-check"]).unwrap();
		let Commands::Create(args) = cli.command else {
			panic!("expected create");
		};
		assert_eq!(args.bindings, vec!["a:=1".to_string(), "b:=a + 1".to_string()]);
		assert!(args.leak_check);

		assert!(Cli::try_parse_from(["rbridge", "create"]).is_err());
		assert!(Cli::try_parse_from(["rbridge", "create", "a:=1", "--capture-output"]).is_err());
	}

	#[test]
	fn format_accepts_every_renderer() {
		for (raw, expected) in [
			("text", OutputFormat::Text),
			("json", OutputFormat::Json),
			("ndjson", OutputFormat::Ndjson),
			("toon", OutputFormat::Toon),
		] {
			let cli = Cli::try_parse_from(["rbridge", "-f", raw, "session", "status"]).unwrap();
			assert_eq!(cli.format, expected);
		}
		assert!(Cli::try_parse_from(["rbridge", "-f", "yaml", "session", "status"]).is_err());
	}

	#[test]
	fn session_subcommands_parse() {
		let cli = Cli::try_parse_from(["rbridge", "session", "clear-marker"]).unwrap();
		assert!(matches!(
			cli.command,
			Commands::Session {
				action: SessionAction::ClearMarker
			}
		));
		assert_eq!(cli.format, OutputFormat::Text);
	}
}
