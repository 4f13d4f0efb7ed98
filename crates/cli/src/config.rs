//! Layered configuration: defaults, profile file, environment, flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rbridge::BridgeConfig;
use serde::Deserialize;

use crate::cli::BridgeArgs;
use crate::error::{CliError, Result};
use crate::output::EffectiveConfig;

pub const CONFIG_ENV: &str = "RBRIDGE_CONFIG";
pub const RPOSTBACK_BIN_ENV: &str = "RPOSTBACK_BIN";
pub const RPC_TIMEOUT_ENV: &str = "RPC_TIMEOUT_SECONDS";
pub const STATE_DIR_ENV: &str = "RBRIDGE_STATE_DIR";
pub const SESSIONS_ROOT_ENV: &str = "RBRIDGE_SESSIONS_ROOT";

/// On-disk profile. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileConfig {
	#[serde(default)]
	pub rpostback_bin: Option<PathBuf>,
	#[serde(default)]
	pub rpostback_log: Option<PathBuf>,
	#[serde(default)]
	pub sessions_root: Option<PathBuf>,
	#[serde(default)]
	pub pid_registry_dir: Option<PathBuf>,
	#[serde(default)]
	pub rsession_program: Option<String>,
	#[serde(default)]
	pub rscript: Option<String>,
	#[serde(default)]
	pub state_dir: Option<PathBuf>,
	#[serde(default)]
	pub artifact_dir: Option<PathBuf>,
	#[serde(default)]
	pub rpc_timeout_seconds: Option<u64>,
	#[serde(default)]
	pub wait_timeout_seconds: Option<u64>,
	#[serde(default)]
	pub poll_interval_ms: Option<u64>,
	#[serde(default)]
	pub lock_wait_seconds: Option<u64>,
	#[serde(default)]
	pub recovery_window_seconds: Option<u64>,
	#[serde(default)]
	pub marker_ttl_seconds: Option<u64>,
}

impl ProfileConfig {
	/// Reads `path`; a missing file is an empty profile.
	pub fn load(path: &Path) -> Result<Self> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(err) => return Err(CliError::Config(format!("cannot read {}: {err}", path.display()))),
		};
		serde_json::from_str(&content).map_err(|err| CliError::Config(format!("invalid profile {}: {err}", path.display())))
	}
}

/// Environment variables that override the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
	pub config: Option<PathBuf>,
	pub rpostback_bin: Option<PathBuf>,
	pub rpc_timeout_seconds: Option<u64>,
	pub state_dir: Option<PathBuf>,
	pub sessions_root: Option<PathBuf>,
}

impl EnvOverrides {
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Empty values count as unset.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
		let rpc_timeout_seconds = match get(RPC_TIMEOUT_ENV) {
			Some(raw) => Some(parse_positive_secs(RPC_TIMEOUT_ENV, &raw)?),
			None => None,
		};
		Ok(Self {
			config: get(CONFIG_ENV).map(PathBuf::from),
			rpostback_bin: get(RPOSTBACK_BIN_ENV).map(PathBuf::from),
			rpc_timeout_seconds,
			state_dir: get(STATE_DIR_ENV).map(PathBuf::from),
			sessions_root: get(SESSIONS_ROOT_ENV).map(PathBuf::from),
		})
	}
}

fn parse_positive_secs(name: &str, raw: &str) -> Result<u64> {
	match raw.trim().parse::<u64>() {
		Ok(secs) if secs > 0 => Ok(secs),
		_ => Err(CliError::Config(format!("{name} must be a positive integer number of seconds, got {raw:?}"))),
	}
}

/// Fully layered configuration plus where the profile came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
	pub bridge: BridgeConfig,
	pub profile_path: Option<PathBuf>,
}

impl ResolvedConfig {
	pub fn effective(&self) -> EffectiveConfig {
		EffectiveConfig {
			rpostback_bin: self.bridge.rpostback_bin.clone(),
			state_dir: self.bridge.state_dir.clone(),
			rpc_timeout_ms: self.bridge.rpc_timeout.as_millis() as u64,
			wait_timeout_ms: self.bridge.wait_timeout.as_millis() as u64,
			lock_wait_ms: self.bridge.lock_wait.as_millis() as u64,
			profile: self.profile_path.clone(),
		}
	}
}

/// `--config`, then `$RBRIDGE_CONFIG`, then `~/.config/rbridge/config.json`.
pub fn profile_path(args: &BridgeArgs, env: &EnvOverrides) -> Option<PathBuf> {
	args.config
		.clone()
		.or_else(|| env.config.clone())
		.or_else(|| dirs::config_dir().map(|dir| dir.join("rbridge").join("config.json")))
}

pub fn load(args: &BridgeArgs) -> Result<ResolvedConfig> {
	let env = EnvOverrides::from_env()?;
	let profile_path = profile_path(args, &env);
	let profile = match &profile_path {
		Some(path) => ProfileConfig::load(path)?,
		None => ProfileConfig::default(),
	};
	let bridge = layer(BridgeConfig::default(), &profile, &env, args)?;
	Ok(ResolvedConfig {
		bridge,
		profile_path: profile_path.filter(|path| path.is_file()),
	})
}

/// Applies profile, environment and flags over `base`, lowest first.
pub fn layer(mut base: BridgeConfig, profile: &ProfileConfig, env: &EnvOverrides, args: &BridgeArgs) -> Result<BridgeConfig> {
	set(&mut base.rpostback_bin, profile.rpostback_bin.clone());
	set(&mut base.rpostback_log, profile.rpostback_log.clone());
	set(&mut base.sessions_root, profile.sessions_root.clone());
	set(&mut base.pid_registry_dir, profile.pid_registry_dir.clone());
	set(&mut base.rsession_program, profile.rsession_program.clone());
	set(&mut base.rscript, profile.rscript.clone());
	set(&mut base.state_dir, profile.state_dir.clone());
	set(&mut base.artifact_dir, profile.artifact_dir.clone());
	set(&mut base.rpc_timeout, profile.rpc_timeout_seconds.map(Duration::from_secs));
	set(&mut base.wait_timeout, profile.wait_timeout_seconds.map(Duration::from_secs));
	set(&mut base.poll_interval, profile.poll_interval_ms.map(Duration::from_millis));
	set(&mut base.lock_wait, profile.lock_wait_seconds.map(Duration::from_secs));
	set(&mut base.recovery_window, profile.recovery_window_seconds.map(Duration::from_secs));
	set(&mut base.marker_ttl, profile.marker_ttl_seconds.map(Duration::from_secs));

	set(&mut base.rpostback_bin, env.rpostback_bin.clone());
	set(&mut base.rpc_timeout, env.rpc_timeout_seconds.map(Duration::from_secs));
	set(&mut base.state_dir, env.state_dir.clone());
	set(&mut base.sessions_root, env.sessions_root.clone());

	set(&mut base.rpostback_bin, args.rpostback_bin.clone());
	set(&mut base.sessions_root, args.sessions_root.clone());
	set(&mut base.state_dir, args.state_dir.clone());
	set(&mut base.rpc_timeout, args.rpc_timeout.map(Duration::from_secs));
	set(&mut base.wait_timeout, args.wait_timeout.map(Duration::from_secs));
	set(&mut base.lock_wait, args.lock_wait.map(Duration::from_secs));
	set(&mut base.recovery_window, args.recovery_window.map(Duration::from_secs));

	if base.rpc_timeout.is_zero() {
		return Err(CliError::Config("rpc timeout must be at least one second".into()));
	}
	if base.wait_timeout.is_zero() {
		return Err(CliError::Config("wait timeout must be at least one second".into()));
	}
	if base.poll_interval.is_zero() {
		return Err(CliError::Config("poll interval must be positive".into()));
	}
	Ok(base)
}

fn set<T>(slot: &mut T, value: Option<T>) {
	if let Some(value) = value {
		*slot = value;
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn base() -> BridgeConfig {
		BridgeConfig::with_home(Path::new("/home/analyst"))
	}

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		move |key| map.get(key).cloned()
	}

	#[test]
	fn flags_beat_env_beat_profile() {
		let profile: ProfileConfig = serde_json::from_str(
			r#"{ "rpostbackBin": "/profile/rpostback", "rpcTimeoutSeconds": 20, "waitTimeoutSeconds": 15, "stateDir": "/profile/state" }"#,
		)
		.unwrap();
		let env = EnvOverrides::from_lookup(lookup(&[(RPOSTBACK_BIN_ENV, "/env/rpostback"), (RPC_TIMEOUT_ENV, "25")])).unwrap();
		let args = BridgeArgs {
			rpc_timeout: Some(3),
			..BridgeArgs::default()
		};

		let cfg = layer(base(), &profile, &env, &args).unwrap();
		assert_eq!(cfg.rpostback_bin, PathBuf::from("/env/rpostback"));
		assert_eq!(cfg.rpc_timeout, Duration::from_secs(3));
		assert_eq!(cfg.wait_timeout, Duration::from_secs(15));
		assert_eq!(cfg.state_dir, PathBuf::from("/profile/state"));
		assert_eq!(cfg.lock_wait, Duration::from_secs(30));
	}

	#[test]
	fn bad_rpc_timeout_env_is_rejected() {
		for raw in ["0", "-1", "soon"] {
			let err = EnvOverrides::from_lookup(lookup(&[(RPC_TIMEOUT_ENV, raw)])).unwrap_err();
			assert!(matches!(err, CliError::Config(_)), "{raw}");
		}
		let env = EnvOverrides::from_lookup(lookup(&[(RPC_TIMEOUT_ENV, "  ")])).unwrap();
		assert_eq!(env.rpc_timeout_seconds, None);
	}

	#[test]
	fn missing_profile_is_empty() {
		let dir = tempfile::tempdir().unwrap();
		let profile = ProfileConfig::load(&dir.path().join("absent.json")).unwrap();
		assert!(profile.rpostback_bin.is_none());
	}

	#[test]
	fn unknown_profile_field_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		fs::write(&path, r#"{ "rpcTimeout": 5 }"#).unwrap();
		assert!(matches!(ProfileConfig::load(&path), Err(CliError::Config(_))));
	}

	#[test]
	fn zero_wait_timeout_flag_is_rejected() {
		let args = BridgeArgs {
			wait_timeout: Some(0),
			..BridgeArgs::default()
		};
		let err = layer(base(), &ProfileConfig::default(), &EnvOverrides::default(), &args).unwrap_err();
		assert!(matches!(err, CliError::Config(_)));
	}
}
