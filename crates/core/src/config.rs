//! Resolved settings for one bridge invocation.
//!
//! Layering (file, environment, flags) is done by the CLI; this module only
//! carries the final values and their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RPOSTBACK_BIN: &str = "/usr/lib/rstudio-server/bin/rpostback";
pub const DEFAULT_RSESSION_PROGRAM: &str = "/usr/lib/rstudio-server/bin/rsession";
pub const DEFAULT_PID_REGISTRY_DIR: &str = "/var/run/rstudio-server/rstudio-rsession";
pub const DEFAULT_RSCRIPT: &str = "Rscript";

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_SYNTAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Relative to the home directory.
const SESSIONS_ROOT: &str = ".local/share/rstudio/sessions/active";
const RPOSTBACK_LOG: &str = ".local/share/rstudio/log/rpostback.log";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
	pub rpostback_bin: PathBuf,
	pub rpostback_log: PathBuf,
	pub sessions_root: PathBuf,
	pub pid_registry_dir: PathBuf,
	pub rsession_program: String,
	pub rscript: String,
	/// Lock files and timeout markers live here.
	pub state_dir: PathBuf,
	/// Temporary result artifacts are created here.
	pub artifact_dir: PathBuf,
	pub rpc_timeout: Duration,
	pub wait_timeout: Duration,
	pub poll_interval: Duration,
	pub lock_wait: Duration,
	pub recovery_window: Duration,
	pub probe_interval: Duration,
	pub marker_ttl: Duration,
	pub syntax_timeout: Duration,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
		Self::with_home(&home)
	}
}

impl BridgeConfig {
	/// Defaults with RStudio's per-user paths rooted at `home`.
	pub fn with_home(home: &Path) -> Self {
		let tmp = std::env::temp_dir();
		Self {
			rpostback_bin: PathBuf::from(DEFAULT_RPOSTBACK_BIN),
			rpostback_log: home.join(RPOSTBACK_LOG),
			sessions_root: home.join(SESSIONS_ROOT),
			pid_registry_dir: PathBuf::from(DEFAULT_PID_REGISTRY_DIR),
			rsession_program: DEFAULT_RSESSION_PROGRAM.to_string(),
			rscript: DEFAULT_RSCRIPT.to_string(),
			state_dir: tmp.clone(),
			artifact_dir: tmp,
			rpc_timeout: DEFAULT_RPC_TIMEOUT,
			wait_timeout: DEFAULT_WAIT_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
			lock_wait: DEFAULT_LOCK_WAIT,
			recovery_window: DEFAULT_RECOVERY_WINDOW,
			probe_interval: DEFAULT_PROBE_INTERVAL,
			marker_ttl: DEFAULT_MARKER_TTL,
			syntax_timeout: DEFAULT_SYNTAX_TIMEOUT,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn home_relative_paths() {
		let cfg = BridgeConfig::with_home(Path::new("/home/analyst"));
		assert_eq!(cfg.sessions_root, PathBuf::from("/home/analyst/.local/share/rstudio/sessions/active"));
		assert_eq!(cfg.rpostback_log, PathBuf::from("/home/analyst/.local/share/rstudio/log/rpostback.log"));
		assert_eq!(cfg.rpc_timeout, Duration::from_secs(12));
		assert_eq!(cfg.wait_timeout, Duration::from_secs(8));
	}
}
