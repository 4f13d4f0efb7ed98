//! Wire types for the rpostback console bridge.
//!
//! This crate contains the shapes of data exchanged with a live RStudio
//! session: the JSON-RPC envelope handed to `rpostback`, the text markers the
//! session writes into result artifacts, the classification of raw bridge
//! responses, and the status tokens reported to callers.
//!
//! Types in this crate are:
//! * Pure data plus the parsing needed to recognise them on the wire
//! * Free of filesystem and process access
//!
//! Session discovery, locking and polling live in `rbridge`.

pub mod artifact;
pub mod envelope;
pub mod response;
pub mod status;

pub use artifact::*;
pub use envelope::*;
pub use response::*;
pub use status::*;
