use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;
use crate::tool::ToolCall;

/// A boxed async stream, used for model adapter streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted by a `ModelAdapter` while it is mid-step, before it has
/// assembled a complete `ModelStepResult`. Provider-agnostic: adapters
/// translate their own wire deltas into this shape. These are distinct
/// from the ledger's `AssistantDelta`/`ThoughtDelta`, which is what the
/// agent loop re-emits on the session's live stream once it has wrapped
/// each one with invocation/agent identity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "thought_token")]
    ThoughtToken { text: String },

    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data, for adapters that stream
    /// arguments as raw JSON fragments rather than one complete blob.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a single model step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// What a `ModelAdapter::step` call returns once the step is fully
/// assembled: the ledger-ready events it wants appended, any tool calls
/// the agent loop must now process, and whether this step ends the
/// invocation's model-calling phase outright (e.g. a refusal or a
/// plain-text final answer with no tool calls).
#[derive(Debug, Clone)]
pub struct ModelStepResult {
    pub step_events: Vec<Event>,
    pub tool_calls: Vec<ToolCall>,
    pub terminal: bool,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}
