//! The session & event ledger: an append-only `Event` log, scoped state
//! folded from `state_change` events, and the invocation tree the resume
//! engine and runners read back out of it.
//!
//! This crate has no knowledge of `Runnable`s or how they execute; it only
//! owns the ledger and its derived projections. `gridloom-engine` is the
//! only consumer that mutates a `Session` through anything but `append`.

pub mod session;
pub mod store;
pub mod tree;

pub use session::{Session, SessionStatus};
pub use store::{InMemorySessionStore, JsonlSessionStore, SessionStore, Snapshot};
pub use tree::{CallRecord, InvocationNode, InvocationState, InvocationTree};
