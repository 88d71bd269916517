use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::{Scope, StateChangeSource};

pub type EventId = Uuid;
pub type InvocationId = Uuid;

/// One entry in a session's append-only ledger.
///
/// Every variant carries `id` and `created_at`. All variants except
/// `User`, `ToolInput`, and `StateChange` also carry `invocation_id` and
/// `agent_name`, since those three can occur before any invocation has
/// opened (the user message that starts a run) or outside invocation
/// scope entirely (externally injected input, direct state pokes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // ---- conversation ----
    System {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        text: String,
    },
    User {
        id: EventId,
        created_at: DateTime<Utc>,
        #[serde(default)]
        invocation_id: Option<InvocationId>,
        text: String,
    },
    Assistant {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structured_output: Option<Value>,
    },
    Thought {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        text: String,
    },
    /// Streaming-only. Never appended to the ledger; emitted on the live
    /// stream so consumers can render incremental assistant output.
    AssistantDelta {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        delta: String,
    },
    /// Streaming-only, mirrors `AssistantDelta` for chain-of-thought text.
    ThoughtDelta {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        delta: String,
    },

    // ---- tool lifecycle ----
    ToolCall {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        call_id: String,
        name: String,
        args: Value,
        #[serde(default)]
        yields: bool,
    },
    ToolYield {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        call_id: String,
        /// Args after `prepare`, awaiting externally-injected input.
        prepared_args: Value,
    },
    ToolInput {
        id: EventId,
        created_at: DateTime<Utc>,
        #[serde(default)]
        invocation_id: Option<InvocationId>,
        call_id: String,
        input: Value,
    },
    ToolResult {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        call_id: String,
        #[serde(flatten)]
        outcome: ToolOutcome,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
        #[serde(default)]
        timed_out: bool,
    },

    // ---- state ----
    StateChange {
        id: EventId,
        created_at: DateTime<Utc>,
        #[serde(default)]
        invocation_id: Option<InvocationId>,
        scope: Scope,
        source: StateChangeSource,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<Value>,
    },

    // ---- invocation boundaries ----
    InvocationStart {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_invocation_id: Option<InvocationId>,
        kind: InvocationKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handoff_origin: Option<HandoffOrigin>,
        fingerprint: String,
    },
    InvocationEnd {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        reason: InvocationEndReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handoff_target: Option<String>,
    },
    InvocationYield {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        pending_call_ids: Vec<String>,
        yield_index: u32,
        awaiting_input: bool,
    },
    InvocationResume {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        yield_index: u32,
    },

    // ---- model boundaries ----
    ModelStart {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        messages: Value,
        tools: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_schema: Option<Value>,
    },
    ModelEnd {
        id: EventId,
        created_at: DateTime<Utc>,
        invocation_id: InvocationId,
        agent_name: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completion_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl Event {
    pub fn id(&self) -> EventId {
        match self {
            Event::System { id, .. }
            | Event::User { id, .. }
            | Event::Assistant { id, .. }
            | Event::Thought { id, .. }
            | Event::AssistantDelta { id, .. }
            | Event::ThoughtDelta { id, .. }
            | Event::ToolCall { id, .. }
            | Event::ToolYield { id, .. }
            | Event::ToolInput { id, .. }
            | Event::ToolResult { id, .. }
            | Event::StateChange { id, .. }
            | Event::InvocationStart { id, .. }
            | Event::InvocationEnd { id, .. }
            | Event::InvocationYield { id, .. }
            | Event::InvocationResume { id, .. }
            | Event::ModelStart { id, .. }
            | Event::ModelEnd { id, .. } => *id,
        }
    }

    /// Invocation this event belongs to, if any. `User`/`ToolInput`/
    /// `StateChange` may be unbound (`None`).
    pub fn invocation_id(&self) -> Option<InvocationId> {
        match self {
            Event::User { invocation_id, .. } => *invocation_id,
            Event::ToolInput { invocation_id, .. } => *invocation_id,
            Event::StateChange { invocation_id, .. } => *invocation_id,
            Event::System { invocation_id, .. }
            | Event::Assistant { invocation_id, .. }
            | Event::Thought { invocation_id, .. }
            | Event::AssistantDelta { invocation_id, .. }
            | Event::ThoughtDelta { invocation_id, .. }
            | Event::ToolCall { invocation_id, .. }
            | Event::ToolYield { invocation_id, .. }
            | Event::ToolResult { invocation_id, .. }
            | Event::InvocationStart { invocation_id, .. }
            | Event::InvocationEnd { invocation_id, .. }
            | Event::InvocationYield { invocation_id, .. }
            | Event::InvocationResume { invocation_id, .. }
            | Event::ModelStart { invocation_id, .. }
            | Event::ModelEnd { invocation_id, .. } => Some(*invocation_id),
        }
    }

    /// True for the streaming-only delta variants that must never be
    /// appended to the persisted ledger.
    pub fn is_stream_only(&self) -> bool {
        matches!(self, Event::AssistantDelta { .. } | Event::ThoughtDelta { .. })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Event::System { created_at, .. }
            | Event::User { created_at, .. }
            | Event::Assistant { created_at, .. }
            | Event::Thought { created_at, .. }
            | Event::AssistantDelta { created_at, .. }
            | Event::ThoughtDelta { created_at, .. }
            | Event::ToolCall { created_at, .. }
            | Event::ToolYield { created_at, .. }
            | Event::ToolInput { created_at, .. }
            | Event::ToolResult { created_at, .. }
            | Event::StateChange { created_at, .. }
            | Event::InvocationStart { created_at, .. }
            | Event::InvocationEnd { created_at, .. }
            | Event::InvocationYield { created_at, .. }
            | Event::InvocationResume { created_at, .. }
            | Event::ModelStart { created_at, .. }
            | Event::ModelEnd { created_at, .. } => *created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum ToolOutcome {
    #[serde(rename = "ok")]
    Ok { result: Value },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Agent,
    Step,
    Sequence,
    Parallel,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationEndReason {
    Completed,
    Error,
    Aborted,
    Transferred,
    MaxSteps,
}

impl InvocationEndReason {
    pub fn is_terminal(&self) -> bool {
        true
    }
}

/// How an invocation came to exist relative to its parent, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandoffOrigin {
    Call {
        parent_invocation_id: InvocationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    Spawn {
        parent_invocation_id: InvocationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    Dispatch {
        parent_invocation_id: InvocationId,
    },
    Transfer {
        from_agent: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_roundtrips_through_json() {
        let ev = Event::ToolResult {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            invocation_id: Uuid::new_v4(),
            agent_name: "main".into(),
            call_id: "call-1".into(),
            outcome: ToolOutcome::Ok {
                result: serde_json::json!({"sum": 4}),
            },
            duration_ms: 12,
            retry_count: None,
            timed_out: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), ev.id());
        assert!(!back.is_stream_only());
    }

    #[test]
    fn user_event_invocation_id_is_optional() {
        let ev = Event::User {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            invocation_id: None,
            text: "hi".into(),
        };
        assert_eq!(ev.invocation_id(), None);
    }

    #[test]
    fn assistant_delta_is_stream_only() {
        let ev = Event::AssistantDelta {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            invocation_id: Uuid::new_v4(),
            agent_name: "main".into(),
            delta: "tok".into(),
        };
        assert!(ev.is_stream_only());
    }
}
