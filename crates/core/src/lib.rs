//! Run code in a live RStudio session over `rpostback` and read the result
//! back, with honest success, failure and unknown outcomes.
//!
//! One [`Bridge`] call handles one request end to end:
//!
//! 1. locate the session directory and resolve `(stream, token, pid)`
//! 2. take the session lock
//! 3. settle any earlier unresolved timeout with a no-op probe
//! 4. send once under a hard timeout and classify the bridge's response
//! 5. poll the result artifact, diagnosing a timeout when it stays empty

pub mod config;
pub mod diagnose;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod namespace;
pub mod poller;
pub mod recovery;
pub mod request;
pub mod session;
pub mod statement;
pub mod syntax;
pub mod transport;

pub use config::BridgeConfig;
pub use diagnose::{Diagnosis, TimeoutCause, TimeoutFacts, diagnose};
pub use error::{BridgeError, Result};
pub use lifecycle::{Bridge, EvalResult, EvalSpec, Note, NoteLevel, SendResult, SendSpec, SessionStatus};
pub use lock::LockHandle;
pub use namespace::{AllowList, NamespaceDiff};
pub use recovery::{MarkerStore, RecoveryVerdict, TimeoutMarker};
pub use request::Request;
pub use session::{ConnectionEnv, EnvSource, SessionDescriptor};
pub use statement::{Action, BenchmarkUnit, Binding, StatementOptions, estimate_expression};
pub use transport::{RpostbackTransport, SendOutcome, SendReport, Transport};
