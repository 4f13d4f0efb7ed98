//! R programs sent to the session.
//!
//! Every program performs one [`Action`] and writes its outcome to the
//! result artifact using the artifact markers. Helper variables are named
//! `.rbridge_*` and live in the `local()` frame the whole program runs in.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rbridge_protocol::ERROR_MARKER;
use regex_lite::Regex;
use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Suffix of the namespace snapshot written next to the artifact.
pub const NAMESPACE_SIDECAR_SUFFIX: &str = ".ns";
/// Suffix of the RDS file an export writes next to the artifact.
pub const EXPORT_SUFFIX: &str = ".rds";
pub const NO_RESULT_MESSAGE: &str = "no result produced";

static R_NAME_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z.][A-Za-z0-9._]*$").expect("R_NAME_RE should compile"));
static INCOMPLETE_TAIL_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(<-|->|=)\s*$").expect("INCOMPLETE_TAIL_RE should compile"));

/// Wraps `code` so its assignments land in a scratch environment.
pub fn isolate(code: &str) -> String {
	format!("local({{\n{code}\n}}, envir = new.env(parent = .GlobalEnv))")
}

/// Double-quoted R string literal.
pub fn r_string(value: &str) -> String {
	let mut out = String::with_capacity(value.len() + 2);
	out.push('"');
	for ch in value.chars() {
		match ch {
			'\\' => out.push_str("\\\\"),
			'"' => out.push_str("\\\""),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\t' => out.push_str("\\t"),
			other => out.push(other),
		}
	}
	out.push('"');
	out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkUnit {
	Seconds,
	Ms,
}

impl BenchmarkUnit {
	fn factor(self) -> &'static str {
		match self {
			BenchmarkUnit::Seconds => "1",
			BenchmarkUnit::Ms => "1000",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementOptions {
	/// Evaluate in a scratch environment instead of `.GlobalEnv`.
	pub isolate: bool,
	pub capture_output: bool,
	pub benchmark: Option<BenchmarkUnit>,
	pub leak_check: bool,
}

/// One new `.GlobalEnv` variable, written `name:=expr` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
	pub name: String,
	pub expr: String,
}

impl Binding {
	pub fn parse(spec: &str) -> Result<Self> {
		let Some((name, expr)) = spec.split_once(":=") else {
			return Err(BridgeError::Usage(format!("create needs '<name>:=<expr>', got {spec:?}")));
		};
		let (name, expr) = (name.trim(), expr.trim());
		if name.is_empty() || expr.is_empty() {
			return Err(BridgeError::Usage("create needs a non-empty name and expression".into()));
		}
		if !R_NAME_RE.is_match(name) {
			return Err(BridgeError::Usage(format!("create name '{name}' is not a valid identifier")));
		}
		if INCOMPLETE_TAIL_RE.is_match(expr) {
			return Err(BridgeError::Usage(format!("create expression for '{name}' looks incomplete")));
		}
		Ok(Self {
			name: name.to_string(),
			expr: expr.to_string(),
		})
	}
}

/// What a program computes before writing the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	/// The value of one expression.
	Eval(String),
	/// Saves the value of an expression as xz-compressed RDS next to the
	/// artifact. The artifact holds the RDS path.
	Export(String),
	/// Assigns new `.GlobalEnv` variables, refusing names that already exist.
	/// The artifact holds the created names.
	Create(Vec<Binding>),
}

impl Default for Action {
	fn default() -> Self {
		Action::Eval(String::new())
	}
}

impl Action {
	pub fn name(&self) -> &'static str {
		match self {
			Action::Eval(_) => "eval",
			Action::Export(_) => "export",
			Action::Create(_) => "create",
		}
	}

	/// Names the program is expected to add to `.GlobalEnv`.
	pub fn created_names(&self) -> Vec<String> {
		match self {
			Action::Create(bindings) => bindings.iter().map(|b| b.name.clone()).collect(),
			_ => Vec::new(),
		}
	}

	fn is_blank(&self) -> bool {
		match self {
			Action::Eval(expr) | Action::Export(expr) => expr.trim().is_empty(),
			Action::Create(bindings) => bindings.is_empty(),
		}
	}

	/// Rejects combinations the generated program cannot honour.
	pub fn validate(&self, opts: &StatementOptions) -> Result<()> {
		if self.is_blank() {
			return Err(BridgeError::Usage(format!("{} needs a non-empty expression", self.name())));
		}
		if opts.benchmark.is_some() && !matches!(self, Action::Eval(_)) {
			return Err(BridgeError::Usage(format!("benchmark cannot be combined with {}", self.name())));
		}
		if let Action::Export(expr) = self {
			if expr.contains(['\n', '\r']) {
				return Err(BridgeError::Usage("export needs a single-line expression".into()));
			}
			if expr.contains("<-") || expr.contains("->") {
				return Err(BridgeError::Usage("export expression cannot contain an assignment".into()));
			}
		}
		if let Action::Create(bindings) = self {
			if let Some(bad) = bindings.iter().find(|b| !R_NAME_RE.is_match(&b.name)) {
				return Err(BridgeError::Usage(format!("create name '{}' is not a valid identifier", bad.name)));
			}
			let mut seen = HashSet::new();
			if let Some(dup) = bindings.iter().find(|b| !seen.insert(b.name.as_str())) {
				return Err(BridgeError::Usage(format!("create names '{}' more than once", dup.name)));
			}
		}
		Ok(())
	}
}

/// A generated program and the files it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalProgram {
	pub code: String,
	pub artifact: PathBuf,
	pub sidecar: Option<PathBuf>,
	pub export: Option<PathBuf>,
}

fn with_suffix(artifact: &Path, suffix: &str) -> PathBuf {
	let mut raw = artifact.as_os_str().to_os_string();
	raw.push(suffix);
	PathBuf::from(raw)
}

pub fn sidecar_path(artifact: &Path) -> PathBuf {
	with_suffix(artifact, NAMESPACE_SIDECAR_SUFFIX)
}

pub fn export_path(artifact: &Path) -> PathBuf {
	with_suffix(artifact, EXPORT_SUFFIX)
}

fn evaluate(expr: &str, opts: &StatementOptions) -> String {
	if opts.isolate {
		format!("({{\n{expr}\n}})")
	} else {
		format!("eval(quote({{\n{expr}\n}}), envir = .GlobalEnv)")
	}
}

fn action_core(action: &Action, artifact: &Path, opts: &StatementOptions) -> String {
	match action {
		Action::Eval(expr) => {
			let value = evaluate(expr, opts);
			match opts.benchmark {
				Some(unit) => format!(
					"{{\n.rbridge_t0 <- proc.time()[[\"elapsed\"]]\ninvisible({value})\n(proc.time()[[\"elapsed\"]] - .rbridge_t0) * {}\n}}",
					unit.factor()
				),
				None => value,
			}
		}
		Action::Export(expr) => format!(
			concat!(
				"{{\n",
				".rbridge_export <- {path}\n",
				"saveRDS({value}, file = .rbridge_export, compress = \"xz\")\n",
				"if (!file.exists(.rbridge_export)) stop(\"state export file was not created\")\n",
				".rbridge_export\n",
				"}}",
			),
			path = r_string(&export_path(artifact).to_string_lossy()),
			value = evaluate(expr, opts),
		),
		Action::Create(bindings) => {
			let names = bindings.iter().map(|b| r_string(&b.name)).collect::<Vec<_>>().join(", ");
			let mut core = format!(
				concat!(
					"{{\n",
					".rbridge_names <- c({names})\n",
					".rbridge_taken <- .rbridge_names[vapply(.rbridge_names, exists, logical(1), envir = .GlobalEnv, inherits = FALSE)]\n",
					"if (length(.rbridge_taken) > 0) stop(paste0(\"refusing to create \", paste0(\"'\", .rbridge_taken, \"'\", collapse = \", \"), \": already exists in .GlobalEnv\"))\n",
				),
				names = names
			);
			for binding in bindings {
				let _ = writeln!(
					core,
					"assign({}, {}, envir = .GlobalEnv)",
					r_string(&binding.name),
					evaluate(&binding.expr, opts)
				);
			}
			core.push_str(".rbridge_names\n}");
			core
		}
	}
}

/// Builds the program that performs `action` and writes the artifact.
///
/// The namespace sidecar, when requested, is written before the artifact so
/// it is complete by the time a poller sees the result.
pub fn build_program(action: &Action, artifact: &Path, opts: &StatementOptions) -> EvalProgram {
	let sidecar = opts.leak_check.then(|| sidecar_path(artifact));
	let export = matches!(action, Action::Export(_)).then(|| export_path(artifact));
	let core = action_core(action, artifact, opts);

	let mut code = String::new();
	let _ = writeln!(code, ".rbridge_out <- {}", r_string(&artifact.to_string_lossy()));
	if let Some(path) = &sidecar {
		let _ = writeln!(code, ".rbridge_ns_out <- {}", r_string(&path.to_string_lossy()));
		code.push_str(".rbridge_before <- ls(envir = .GlobalEnv, all.names = TRUE)\n");
	}
	code.push_str(".rbridge_stdout <- character(0)\n.rbridge_stderr <- character(0)\n");

	code.push_str(".rbridge_value <- tryCatch({\n");
	if opts.capture_output {
		let _ = write!(
			code,
			concat!(
				".rbridge_stdout <- capture.output({{\n",
				".rbridge_inner <- withCallingHandlers({core},\n",
				"message = function(m) {{\n",
				".rbridge_stderr <<- c(.rbridge_stderr, sub(\"\\n$\", \"\", conditionMessage(m)))\n",
				"invokeRestart(\"muffleMessage\")\n",
				"}},\n",
				"warning = function(w) {{\n",
				".rbridge_stderr <<- c(.rbridge_stderr, paste0(\"WARNING: \", conditionMessage(w)))\n",
				"invokeRestart(\"muffleWarning\")\n",
				"}})\n",
				"}}, type = \"output\")\n",
				".rbridge_inner\n",
			),
			core = core
		);
	} else {
		code.push_str(&core);
		code.push('\n');
	}
	code.push_str("}, error = function(e) e)\n");

	if sidecar.is_some() {
		code.push_str(
			"writeLines(c(\"#before\", .rbridge_before, \"#after\", ls(envir = .GlobalEnv, all.names = TRUE)), .rbridge_ns_out)\n",
		);
	}

	let streams = "stdout = .rbridge_stdout, stderr = .rbridge_stderr";
	let (on_error, on_null, on_value) = if opts.capture_output {
		(
			format!("dput(list(error = conditionMessage(.rbridge_value), {streams}), file = .rbridge_out)"),
			format!("dput(list(error = {}, {streams}), file = .rbridge_out)", r_string(NO_RESULT_MESSAGE)),
			format!("dput(list(result = .rbridge_value, {streams}), file = .rbridge_out)"),
		)
	} else {
		(
			format!("writeLines(paste0({}, conditionMessage(.rbridge_value)), .rbridge_out)", r_string(ERROR_MARKER)),
			format!("writeLines({}, .rbridge_out)", r_string(&format!("{ERROR_MARKER}{NO_RESULT_MESSAGE}"))),
			"dput(.rbridge_value, file = .rbridge_out)".to_string(),
		)
	};
	let _ = write!(
		code,
		"if (inherits(.rbridge_value, \"error\")) {{\n{on_error}\n}} else if (is.null(.rbridge_value)) {{\n{on_null}\n}} else {{\n{on_value}\n}}\ninvisible(NULL)"
	);

	EvalProgram {
		code,
		artifact: artifact.to_path_buf(),
		sidecar,
		export,
	}
}

/// Expression estimating export time in seconds for the value of `expr`.
///
/// Returns `None` for multi-line or empty input.
pub fn estimate_expression(expr: &str) -> Option<String> {
	let expr = expr.trim();
	if expr.is_empty() || expr.contains(['\n', '\r']) {
		return None;
	}
	Some(format!(
		"max(5, ceiling(0.5 * (as.numeric(object.size(({expr}))) / 1024^2) + 10))"
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn opts() -> StatementOptions {
		StatementOptions {
			isolate: true,
			..StatementOptions::default()
		}
	}

	#[test]
	fn r_string_escapes_specials() {
		assert_eq!(r_string("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
		assert_eq!(r_string("/tmp/x y.txt"), "\"/tmp/x y.txt\"");
	}

	#[test]
	fn isolated_eval_writes_markers() {
		let program = build_program(&Action::Eval("1+1".into()), Path::new("/tmp/out.txt"), &opts());
		assert!(program.code.starts_with(".rbridge_out <- \"/tmp/out.txt\"\n"));
		assert!(program.code.contains("({\n1+1\n})"));
		assert!(program.code.contains("writeLines(paste0(\"__ERROR__:\", conditionMessage(.rbridge_value)), .rbridge_out)"));
		assert!(program.code.contains("writeLines(\"__ERROR__:no result produced\", .rbridge_out)"));
		assert!(program.code.contains("dput(.rbridge_value, file = .rbridge_out)"));
		assert!(!program.code.contains("eval(quote("));
		assert_eq!(program.sidecar, None);
	}

	#[test]
	fn global_eval_targets_global_env() {
		let program = build_program(
			&Action::Eval("x <- 5; x".into()),
			Path::new("/tmp/out.txt"),
			&StatementOptions::default(),
		);
		assert!(program.code.contains("eval(quote({\nx <- 5; x\n}), envir = .GlobalEnv)"));
	}

	#[test]
	fn capture_output_dputs_list() {
		let program = build_program(
			&Action::Eval("print(1); 2".into()),
			Path::new("/tmp/out.txt"),
			&StatementOptions {
				capture_output: true,
				..opts()
			},
		);
		assert!(program.code.contains("capture.output({"));
		assert!(program.code.contains("paste0(\"WARNING: \", conditionMessage(w))"));
		assert!(program.code.contains("dput(list(result = .rbridge_value, stdout = .rbridge_stdout, stderr = .rbridge_stderr), file = .rbridge_out)"));
		assert!(!program.code.contains("__ERROR__"));
	}

	#[test]
	fn benchmark_scales_elapsed() {
		let program = build_program(
			&Action::Eval("Sys.sleep(0.1)".into()),
			Path::new("/tmp/out.txt"),
			&StatementOptions {
				benchmark: Some(BenchmarkUnit::Ms),
				..opts()
			},
		);
		assert!(program.code.contains(".rbridge_t0 <- proc.time()[[\"elapsed\"]]"));
		assert!(program.code.contains("* 1000"));
	}

	#[test]
	fn leak_check_writes_sidecar_before_artifact() {
		let program = build_program(
			&Action::Eval("1".into()),
			Path::new("/tmp/out.txt"),
			&StatementOptions {
				leak_check: true,
				..opts()
			},
		);
		assert_eq!(program.sidecar.as_deref(), Some(Path::new("/tmp/out.txt.ns")));
		let ns_at = program.code.find("\"#after\"").unwrap();
		let dput_at = program.code.find("dput(.rbridge_value").unwrap();
		assert!(ns_at < dput_at);
	}

	#[test]
	fn binding_parses_name_and_expression() {
		let binding = Binding::parse(" model := lm(y ~ x, data = df) ").unwrap();
		assert_eq!(binding.name, "model");
		assert_eq!(binding.expr, "lm(y ~ x, data = df)");
	}

	#[test]
	fn binding_rejects_malformed_specs() {
		for spec in ["model", ":=1", "model:=", "1abc:=2", "my-var:=3", "x:=y <-"] {
			let err = Binding::parse(spec).unwrap_err();
			assert!(matches!(err, BridgeError::Usage(_)), "{spec}: {err}");
		}
	}

	#[test]
	fn create_refuses_duplicate_names_before_building() {
		let action = Action::Create(vec![Binding::parse("a:=1").unwrap(), Binding::parse("a:=2").unwrap()]);
		let err = action.validate(&opts()).unwrap_err();
		assert_eq!(err.to_string(), "create names 'a' more than once");
	}

	#[test]
	fn benchmark_only_combines_with_eval() {
		let bench = StatementOptions {
			benchmark: Some(BenchmarkUnit::Seconds),
			..opts()
		};
		assert!(Action::Eval("1".into()).validate(&bench).is_ok());
		assert!(Action::Export("df".into()).validate(&bench).is_err());
		assert!(Action::Create(vec![Binding::parse("a:=1").unwrap()]).validate(&bench).is_err());
	}

	#[test]
	fn export_needs_single_line_without_assignment() {
		assert!(Action::Export("mtcars".into()).validate(&opts()).is_ok());
		assert!(Action::Export("a\nb".into()).validate(&opts()).is_err());
		assert!(Action::Export("x <- 1".into()).validate(&opts()).is_err());
		assert!(Action::Export("  ".into()).validate(&opts()).is_err());
	}

	#[test]
	fn export_saves_rds_next_to_artifact() {
		let program = build_program(&Action::Export("mtcars".into()), Path::new("/tmp/out.txt"), &opts());
		assert_eq!(program.export.as_deref(), Some(Path::new("/tmp/out.txt.rds")));
		assert!(program.code.contains(".rbridge_export <- \"/tmp/out.txt.rds\""));
		assert!(program.code.contains("saveRDS(({\nmtcars\n}), file = .rbridge_export, compress = \"xz\")"));
		assert!(program.code.contains("stop(\"state export file was not created\")"));
		assert!(program.code.contains("dput(.rbridge_value, file = .rbridge_out)"));
	}

	#[test]
	fn create_checks_every_name_before_assigning() {
		let action = Action::Create(vec![Binding::parse("a:=1").unwrap(), Binding::parse("b:=a + 1").unwrap()]);
		let program = build_program(&action, Path::new("/tmp/out.txt"), &opts());
		let check_at = program.code.find("exists, logical(1), envir = .GlobalEnv, inherits = FALSE").unwrap();
		let assign_a = program.code.find("assign(\"a\", ({\n1\n}), envir = .GlobalEnv)").unwrap();
		let assign_b = program.code.find("assign(\"b\", ({\na + 1\n}), envir = .GlobalEnv)").unwrap();
		assert!(check_at < assign_a && assign_a < assign_b);
		assert!(program.code.contains(".rbridge_names <- c(\"a\", \"b\")"));
		assert!(program.code.contains("already exists in .GlobalEnv"));
		assert_eq!(program.export, None);
		assert_eq!(action.created_names(), vec!["a".to_string(), "b".to_string()]);
	}

	#[test]
	fn estimate_requires_single_line() {
		assert_eq!(
			estimate_expression(" df ").as_deref(),
			Some("max(5, ceiling(0.5 * (as.numeric(object.size((df))) / 1024^2) + 10))")
		);
		assert_eq!(estimate_expression("a\nb"), None);
		assert_eq!(estimate_expression("  "), None);
	}
}
