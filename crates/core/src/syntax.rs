//! Parse check of generated programs before anything is sent.

use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rbridge_runtime::{BoundedCommand, CommandOutcome};
use regex_lite::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::statement::r_string;

static PARSE_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(\d+):(\d+):").expect("PARSE_LOCATION_RE should compile"));

const SNIPPET_CONTEXT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxVerdict {
	Valid,
	Invalid { detail: String, snippet: Option<String> },
	/// No checker is available; the program was not checked.
	Skipped { reason: String },
}

#[async_trait]
pub trait SyntaxChecker: Send + Sync {
	async fn check(&self, code: &str) -> Result<SyntaxVerdict>;
}

/// Checks code with `Rscript -e 'parse(file = ...)'`.
#[derive(Debug, Clone)]
pub struct RscriptChecker {
	rscript: String,
	timeout: Duration,
}

impl RscriptChecker {
	pub fn new(rscript: impl Into<String>, timeout: Duration) -> Self {
		Self {
			rscript: rscript.into(),
			timeout,
		}
	}

	fn resolve(&self) -> Option<PathBuf> {
		which::which(&self.rscript).ok()
	}
}

#[async_trait]
impl SyntaxChecker for RscriptChecker {
	async fn check(&self, code: &str) -> Result<SyntaxVerdict> {
		let Some(rscript) = self.resolve() else {
			warn!(target = "rbridge.syntax", rscript = %self.rscript, "Rscript not found; skipping parse check");
			return Ok(SyntaxVerdict::Skipped {
				reason: format!("{} not found on PATH", self.rscript),
			});
		};

		let mut file = tempfile::Builder::new()
			.prefix("rbridge_check_")
			.suffix(".R")
			.tempfile()?;
		file.write_all(code.as_bytes())?;
		file.flush()?;

		let expr = format!("parse(file = {})", r_string(&file.path().to_string_lossy()));
		let outcome = BoundedCommand::new(&rscript, self.timeout).arg("-e").arg(expr).run().await?;
		match outcome {
			CommandOutcome::Exited { code: Some(0), .. } => Ok(SyntaxVerdict::Valid),
			CommandOutcome::Exited { output, .. } => {
				debug!(target = "rbridge.syntax", "parse check failed");
				let snippet = parse_error_line(&output).and_then(|line| error_snippet(code, line, SNIPPET_CONTEXT));
				Ok(SyntaxVerdict::Invalid {
					detail: output.trim_end().to_string(),
					snippet,
				})
			}
			CommandOutcome::TimedOut { .. } => Ok(SyntaxVerdict::Skipped {
				reason: format!("parse check exceeded {:?}", self.timeout),
			}),
		}
	}
}

/// First `:<line>:<col>:` location in parser output.
pub fn parse_error_line(output: &str) -> Option<usize> {
	output
		.lines()
		.find_map(|line| PARSE_LOCATION_RE.captures(line))
		.and_then(|caps| caps.get(1))
		.and_then(|m| m.as_str().parse().ok())
}

/// Lines around `line_no` (1-based), the offending one marked `>>`.
pub fn error_snippet(code: &str, line_no: usize, context: usize) -> Option<String> {
	let lines: Vec<&str> = code.lines().collect();
	if line_no == 0 || lines.is_empty() {
		return None;
	}
	let start = line_no.saturating_sub(context).max(1);
	let end = (line_no + context).min(lines.len());
	if start > end {
		return None;
	}

	let mut block = vec!["R snippet around parse error:".to_string()];
	for idx in start..=end {
		let marker = if idx == line_no { ">>" } else { "  " };
		block.push(format!("{marker} {idx:4}: {}", lines[idx - 1]));
	}
	Some(block.join("\n"))
}
