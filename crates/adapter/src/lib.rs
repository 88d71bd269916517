//! The `ModelAdapter` contract (§6.1) and the in-tree `ScriptedAdapter`
//! used by every engine test and the CLI demo. Real vendor transports
//! (OpenAI/Gemini/Claude wire protocols) are out of scope — the engine
//! treats a `ModelAdapter` as opaque and routes only by `ModelConfig`'s
//! `provider` tag.

pub mod registry;
pub mod scripted;
pub mod traits;

pub use registry::AdapterRegistry;
pub use scripted::{ScriptedAdapter, ScriptedStep};
pub use traits::{CancelSignal, ModelAdapter, ModelConfig, RenderContext, ToolChoice};
