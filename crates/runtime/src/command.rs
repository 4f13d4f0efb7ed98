//! Run one child process under a hard wall-clock bound.
//!
//! On expiry the child's process group receives `SIGTERM`, then `SIGKILL`
//! once the grace period passes. The exit status is reported but callers are
//! expected to judge the outcome from the captured text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::{ProcessError, Result};

/// Grace period between `SIGTERM` and `SIGKILL`.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// How a bounded run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
	/// The child exited on its own.
	Exited {
		code: Option<i32>,
		output: String,
		elapsed: Duration,
	},
	/// The bound elapsed and the child was terminated.
	TimedOut { output: String, elapsed: Duration },
}

/// Builder for a bounded child process invocation.
#[derive(Debug, Clone)]
pub struct BoundedCommand {
	program: PathBuf,
	args: Vec<String>,
	envs: Vec<(String, String)>,
	timeout: Duration,
	kill_grace: Duration,
}

impl BoundedCommand {
	pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
		Self {
			program: program.as_ref().to_path_buf(),
			args: Vec::new(),
			envs: Vec::new(),
			timeout,
			kill_grace: DEFAULT_KILL_GRACE,
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.envs.push((key.into(), value.into()));
		self
	}

	pub fn kill_grace(mut self, grace: Duration) -> Self {
		self.kill_grace = grace;
		self
	}

	/// Spawns the child and waits for it within the bound.
	pub async fn run(&self) -> Result<CommandOutcome> {
		let mut cmd = std::process::Command::new(&self.program);
		cmd.args(&self.args)
			.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());

		#[cfg(unix)]
		std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

		let mut cmd = tokio::process::Command::from(cmd);
		cmd.kill_on_drop(true);

		let started = Instant::now();
		let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
			program: self.program.clone(),
			source,
		})?;

		let mut stdout = child.stdout.take();
		let mut stderr = child.stderr.take();
		let mut out_buf = Vec::new();
		let mut err_buf = Vec::new();

		let waited = tokio::time::timeout(self.timeout, async {
			let read_out = async {
				if let Some(pipe) = stdout.as_mut() {
					let _ = pipe.read_to_end(&mut out_buf).await;
				}
			};
			let read_err = async {
				if let Some(pipe) = stderr.as_mut() {
					let _ = pipe.read_to_end(&mut err_buf).await;
				}
			};
			let (_, _, status) = tokio::join!(read_out, read_err, child.wait());
			status
		})
		.await;

		match waited {
			Ok(status) => {
				let status = status?;
				let output = combine(&out_buf, &err_buf);
				debug!(
					target = "rbridge.runtime",
					program = %self.program.display(),
					code = ?status.code(),
					elapsed_ms = started.elapsed().as_millis() as u64,
					"child exited"
				);
				Ok(CommandOutcome::Exited {
					code: status.code(),
					output,
					elapsed: started.elapsed(),
				})
			}
			Err(_) => {
				warn!(
					target = "rbridge.runtime",
					program = %self.program.display(),
					timeout_ms = self.timeout.as_millis() as u64,
					"child exceeded hard timeout; terminating"
				);
				terminate(&mut child, self.kill_grace).await;
				Ok(CommandOutcome::TimedOut {
					output: combine(&out_buf, &err_buf),
					elapsed: started.elapsed(),
				})
			}
		}
	}
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
	let mut output = String::from_utf8_lossy(stdout).into_owned();
	output.push_str(&String::from_utf8_lossy(stderr));
	output
}

async fn terminate(child: &mut Child, grace: Duration) {
	let pid = child.id();

	#[cfg(unix)]
	if let Some(pid) = pid {
		signal_group(pid, libc::SIGTERM);
	}
	#[cfg(not(unix))]
	let _ = child.start_kill();

	if tokio::time::timeout(grace, child.wait()).await.is_ok() {
		return;
	}

	#[cfg(unix)]
	if let Some(pid) = pid {
		signal_group(pid, libc::SIGKILL);
	}
	let _ = child.kill().await;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
	let Ok(pgid) = libc::pid_t::try_from(pid) else {
		return;
	};
	// SAFETY: the child was spawned as leader of its own process group.
	let rc = unsafe { libc::kill(-pgid, signal) };
	if rc != 0 {
		debug!(
			target = "rbridge.runtime",
			pid,
			signal,
			error = %std::io::Error::last_os_error(),
			"signal delivery failed"
		);
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;

	#[tokio::test]
	async fn captures_stdout_then_stderr() {
		let outcome = BoundedCommand::new("/bin/sh", Duration::from_secs(5))
			.args(["-c", "printf out; printf err >&2; exit 3"])
			.run()
			.await
			.unwrap();
		match outcome {
			CommandOutcome::Exited { code, output, .. } => {
				assert_eq!(code, Some(3));
				assert_eq!(output, "outerr");
			}
			other => panic!("unexpected outcome: {other:?}"),
		}
	}

	#[tokio::test]
	async fn passes_environment_to_child() {
		let outcome = BoundedCommand::new("/bin/sh", Duration::from_secs(5))
			.args(["-c", "printf \"$RBRIDGE_TEST_VALUE\""])
			.env("RBRIDGE_TEST_VALUE", "stream-42")
			.run()
			.await
			.unwrap();
		assert!(matches!(outcome, CommandOutcome::Exited { ref output, .. } if output == "stream-42"));
	}

	#[tokio::test]
	async fn hard_timeout_terminates_child_group() {
		let started = Instant::now();
		let outcome = BoundedCommand::new("/bin/sh", Duration::from_millis(300))
			.args(["-c", "printf partial; sleep 30"])
			.kill_grace(Duration::from_millis(500))
			.run()
			.await
			.unwrap();
		assert!(matches!(outcome, CommandOutcome::TimedOut { .. }));
		assert!(started.elapsed() < Duration::from_secs(10));
	}

	#[tokio::test]
	async fn missing_program_is_spawn_error() {
		let err = BoundedCommand::new("/nonexistent/rpostback", Duration::from_secs(1))
			.run()
			.await
			.unwrap_err();
		assert!(matches!(err, ProcessError::Spawn { .. }));
	}
}
