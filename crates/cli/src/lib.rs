//! Command-line front end for the `rbridge` request lifecycle.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;

/// Single-threaded runtime driving one invocation.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
	tokio::runtime::Builder::new_current_thread().enable_all().build()
}

#[cfg(test)]
mod tests {
	use tokio::runtime::RuntimeFlavor;

	#[test]
	fn invocation_runtime_is_single_threaded() {
		let rt = super::runtime().unwrap();
		assert_eq!(rt.handle().runtime_flavor(), RuntimeFlavor::CurrentThread);
	}
}
