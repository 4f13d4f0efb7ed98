//! Process-level plumbing shared by the bridge core and CLI.
//!
//! Everything here talks to the operating system: pid liveness and command
//! line matching, the rsession pid registry, and running a child process under
//! a hard wall-clock bound.

mod command;
mod error;
mod process;
mod registry;

pub use command::{BoundedCommand, CommandOutcome, DEFAULT_KILL_GRACE};
pub use error::{ProcessError, Result};
pub use process::{PidState, parse_pid, pid_is_alive, process_command_line, process_matches};
pub use registry::infer_stream_from_pid;
