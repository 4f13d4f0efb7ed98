//! Readers for the `key="value"` files RStudio leaves in a session directory.

use std::io;
use std::path::Path;

pub const PERSISTENT_STATE_FILE: &str = "session-persistent-state";
pub const ENVIRONMENT_FILE: &str = "suspended-session-data/environment_vars";

pub const KEY_CLIENT_ID: &str = "active-client-id";
pub const KEY_ABEND: &str = "abend";
pub const KEY_STREAM: &str = "RSTUDIO_SESSION_STREAM";
pub const KEY_PORT_TOKEN: &str = "RS_PORT_TOKEN";
pub const KEY_SESSION_PID: &str = "RSTUDIO_SESSION_PID";

/// RStudio has shipped both spellings of the properties directory.
const EXECUTING_FLAG_PATHS: &[&str] = &["properites/executing", "properties/executing"];

/// Parsed `key="value"` lines, first occurrence of a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueFile {
	entries: Vec<(String, String)>,
}

impl KeyValueFile {
	pub fn parse(text: &str) -> Self {
		let entries = text.lines().filter_map(parse_line).collect();
		Self { entries }
	}

	/// Reads and parses `path`; a missing file is `Ok(None)`.
	pub fn load(path: &Path) -> io::Result<Option<Self>> {
		match std::fs::read_to_string(path) {
			Ok(text) => Ok(Some(Self::parse(&text))),
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err),
		}
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}

	/// Like [`get`](Self::get) but treats an empty value as absent.
	pub fn non_empty(&self, key: &str) -> Option<&str> {
		self.get(key).filter(|v| !v.is_empty())
	}
}

fn parse_line(line: &str) -> Option<(String, String)> {
	let (key, rest) = line.split_once('=')?;
	if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.') {
		return None;
	}
	let value = rest.strip_prefix('"')?.strip_suffix('"')?;
	Some((key.to_string(), value.to_string()))
}

/// Returns `true` when the session reports an R computation in progress.
pub fn read_busy_flag(session_dir: &Path) -> bool {
	EXECUTING_FLAG_PATHS
		.iter()
		.map(|rel| session_dir.join(rel))
		.find(|path| path.is_file())
		.and_then(|path| std::fs::read_to_string(path).ok())
		.is_some_and(|content| content.trim() == "1")
}

/// Returns `true` when the persistent state records an abnormal end.
pub fn read_abend_flag(session_dir: &Path) -> bool {
	KeyValueFile::load(&session_dir.join(PERSISTENT_STATE_FILE))
		.ok()
		.flatten()
		.and_then(|file| file.get(KEY_ABEND).map(|v| v.trim() == "1"))
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn parses_quoted_values_and_skips_noise() {
		let file = KeyValueFile::parse(
			"active-client-id=\"abc-123\"\nabend=\"0\"\n# comment\nbroken=unquoted\nRS_PORT_TOKEN=\"tok=\"en\"\"\n",
		);
		assert_eq!(file.get(KEY_CLIENT_ID), Some("abc-123"));
		assert_eq!(file.get(KEY_ABEND), Some("0"));
		assert_eq!(file.get("broken"), None);
		assert_eq!(file.get(KEY_PORT_TOKEN), Some("tok=\"en\""));
	}

	#[test]
	fn first_occurrence_wins() {
		let file = KeyValueFile::parse("k=\"first\"\nk=\"second\"\n");
		assert_eq!(file.get("k"), Some("first"));
	}

	#[test]
	fn empty_value_is_not_non_empty() {
		let file = KeyValueFile::parse("RSTUDIO_SESSION_STREAM=\"\"\n");
		assert_eq!(file.get(KEY_STREAM), Some(""));
		assert_eq!(file.non_empty(KEY_STREAM), None);
	}

	#[test]
	fn busy_flag_prefers_misspelled_directory() {
		let dir = TempDir::new().unwrap();
		assert!(!read_busy_flag(dir.path()));

		std::fs::create_dir_all(dir.path().join("properties")).unwrap();
		std::fs::write(dir.path().join("properties/executing"), "1").unwrap();
		assert!(read_busy_flag(dir.path()));

		std::fs::create_dir_all(dir.path().join("properites")).unwrap();
		std::fs::write(dir.path().join("properites/executing"), "0\n").unwrap();
		assert!(!read_busy_flag(dir.path()));
	}

	#[test]
	fn abend_flag_reads_persistent_state() {
		let dir = TempDir::new().unwrap();
		assert!(!read_abend_flag(dir.path()));
		std::fs::write(dir.path().join(PERSISTENT_STATE_FILE), "abend=\"1\"\n").unwrap();
		assert!(read_abend_flag(dir.path()));
	}
}
