//! Session discovery and connection resolution.

mod descriptor;
mod env;
mod locator;
mod probe;
pub mod state_file;

pub use descriptor::SessionDescriptor;
pub use env::{ConnectionEnv, EnvResolutionInput, EnvSource, ResolvedEnv, resolve_connection_env};
pub use locator::{LocatedSession, Selection, SessionLocator};
pub use probe::{ProcessProbe, SystemProbe, live_pid};

#[cfg(test)]
pub(crate) use probe::fake::FakeProbe;
