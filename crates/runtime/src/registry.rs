//! rsession pid registry lookups.
//!
//! RStudio Server keeps one `<stream>.pid` file per running session under a
//! registry directory; the file body is the rsession pid.

use std::path::Path;

use tracing::debug;

/// Finds the stream id whose registry file records `pid`.
///
/// Files are visited in sorted path order; unreadable entries are skipped.
pub fn infer_stream_from_pid(registry_dir: &Path, pid: u32) -> Option<String> {
	let entries = match std::fs::read_dir(registry_dir) {
		Ok(entries) => entries,
		Err(err) => {
			debug!(target = "rbridge.runtime", dir = %registry_dir.display(), error = %err, "pid registry unreadable");
			return None;
		}
	};

	let mut pid_files: Vec<_> = entries
		.filter_map(|entry| entry.ok().map(|e| e.path()))
		.filter(|path| path.extension().is_some_and(|ext| ext == "pid"))
		.collect();
	pid_files.sort();

	let wanted = pid.to_string();
	pid_files.into_iter().find_map(|path| {
		let content = std::fs::read_to_string(&path).ok()?;
		if content.trim() == wanted {
			path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
		} else {
			None
		}
	})
}
