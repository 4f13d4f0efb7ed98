//! Session-scoped advisory lock.
//!
//! One `flock`ed file per session under the state directory. The lock is held
//! for the lifetime of [`LockHandle`] and released when it drops, including on
//! early returns and panics. The kernel drops it if the process dies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{BridgeError, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maps a session id onto a string usable in file names.
pub fn safe_session_key(session_id: &str) -> String {
	let key: String = session_id
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
		.collect();
	if key.is_empty() { "_".to_string() } else { key }
}

/// `<state_dir>/rbridge-<key><suffix>`.
pub fn session_state_path(state_dir: &Path, session_id: &str, suffix: &str) -> PathBuf {
	state_dir.join(format!("rbridge-{}{suffix}", safe_session_key(session_id)))
}

pub fn lock_path(state_dir: &Path, session_id: &str) -> PathBuf {
	session_state_path(state_dir, session_id, ".lock")
}

/// Held session lock.
#[derive(Debug)]
pub struct LockHandle {
	path: PathBuf,
	file: File,
	held: bool,
}

impl LockHandle {
	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn is_held(&self) -> bool {
		self.held
	}

	/// Releases early; dropping does the same.
	pub fn release(mut self) {
		self.unlock();
	}

	fn unlock(&mut self) {
		if !self.held {
			return;
		}
		if let Err(err) = unlock_file(&self.file) {
			debug!(target = "rbridge.lock", path = %self.path.display(), error = %err, "unlock failed; closing descriptor");
		}
		self.held = false;
		debug!(target = "rbridge.lock", path = %self.path.display(), "lock released");
	}
}

impl Drop for LockHandle {
	fn drop(&mut self) {
		self.unlock();
	}
}

/// Acquires the exclusive lock for `session_id`, waiting at most `wait`.
pub async fn acquire(state_dir: &Path, session_id: &str, wait: Duration) -> Result<LockHandle> {
	std::fs::create_dir_all(state_dir)?;
	let path = lock_path(state_dir, session_id);
	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(false)
		.open(&path)?;

	let started = Instant::now();
	let mut announced = false;
	loop {
		if try_lock_exclusive(&file)? {
			debug!(
				target = "rbridge.lock",
				path = %path.display(),
				waited_ms = started.elapsed().as_millis() as u64,
				"lock acquired"
			);
			return Ok(LockHandle { path, file, held: true });
		}

		let waited = started.elapsed();
		if waited >= wait {
			return Err(BridgeError::LockTimeout {
				session_id: session_id.to_string(),
				path,
				waited,
			});
		}
		if !announced {
			info!(target = "rbridge.lock", path = %path.display(), "session lock busy; waiting");
			announced = true;
		}
		tokio::time::sleep(LOCK_POLL_INTERVAL.min(wait - waited)).await;
	}
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
	use std::os::unix::io::AsRawFd;

	// SAFETY: the descriptor is owned by `file` and stays open for the call.
	let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
	if rc == 0 {
		return Ok(true);
	}
	let err = io::Error::last_os_error();
	if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
		return Ok(false);
	}
	Err(err)
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
	use std::os::unix::io::AsRawFd;

	// SAFETY: as above.
	let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
	if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
	Err(io::Error::new(io::ErrorKind::Unsupported, "session locks require a unix host"))
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
	Ok(())
}

#[cfg(all(test, unix))]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn session_keys_are_filesystem_safe() {
		assert_eq!(safe_session_key("session-abc_1.2"), "session-abc_1.2");
		assert_eq!(safe_session_key("a/b c:d"), "a_b_c_d");
		assert_eq!(safe_session_key(""), "_");
		assert_eq!(
			lock_path(Path::new("/tmp"), "session-x"),
			PathBuf::from("/tmp/rbridge-session-x.lock")
		);
	}

	#[tokio::test]
	async fn second_holder_times_out_while_first_holds() {
		let dir = TempDir::new().unwrap();
		let first = acquire(dir.path(), "session-1", Duration::from_secs(1)).await.unwrap();
		assert!(first.is_held());

		let err = acquire(dir.path(), "session-1", Duration::from_millis(300)).await.unwrap_err();
		match err {
			BridgeError::LockTimeout { session_id, waited, .. } => {
				assert_eq!(session_id, "session-1");
				assert!(waited >= Duration::from_millis(300));
			}
			other => panic!("unexpected error: {other:?}"),
		}

		drop(first);
		let again = acquire(dir.path(), "session-1", Duration::from_millis(300)).await.unwrap();
		assert!(again.is_held());
	}

	#[tokio::test]
	async fn different_sessions_do_not_contend() {
		let dir = TempDir::new().unwrap();
		let _a = acquire(dir.path(), "session-a", Duration::from_millis(100)).await.unwrap();
		let b = acquire(dir.path(), "session-b", Duration::from_millis(100)).await.unwrap();
		assert!(b.is_held());
	}

	#[tokio::test]
	async fn waiter_proceeds_after_release() {
		let dir = TempDir::new().unwrap();
		let first = acquire(dir.path(), "session-w", Duration::from_secs(1)).await.unwrap();

		let state_dir = dir.path().to_path_buf();
		let waiter = tokio::spawn(async move { acquire(&state_dir, "session-w", Duration::from_secs(5)).await });
		tokio::time::sleep(Duration::from_millis(250)).await;
		first.release();

		let second = waiter.await.unwrap().unwrap();
		assert!(second.is_held());
	}
}
