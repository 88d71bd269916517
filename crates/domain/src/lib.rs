//! Shared event, state, and schema types for the gridloom agent runtime.
//!
//! This crate has no async runtime dependency and no knowledge of any
//! particular model provider; it defines the vocabulary every other
//! gridloom crate builds on: the ledger `Event` type, scoped state,
//! messages/tools as seen by a model adapter, JSON Schema validation, and
//! the shared `Error` type.

pub mod config;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod message;
pub mod schema;
pub mod state;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
pub use event::{Event, EventId, HandoffOrigin, InvocationEndReason, InvocationId, InvocationKind, ToolOutcome};
pub use fingerprint::{compute_fingerprint, Fingerprint, RunnableShape};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use schema::Schema;
pub use state::{Scope, StateChangeSource};
pub use stream::{BoxStream, ModelStepResult, StreamEvent, Usage};
pub use tool::{ToolCall, ToolDefinition};
