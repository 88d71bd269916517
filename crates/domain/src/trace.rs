use serde::Serialize;

/// Structured trace events emitted across the gridloom runtime, separate
/// from the persisted `Event` ledger: these are ambient observability
/// data, never replayed or folded into session state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    InvocationStarted {
        invocation_id: String,
        agent_name: String,
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_invocation_id: Option<String>,
    },
    InvocationEnded {
        invocation_id: String,
        agent_name: String,
        reason: String,
        duration_ms: u64,
    },
    ModelCallStarted {
        invocation_id: String,
        provider: String,
        model: String,
        streaming: bool,
    },
    ModelCallFinished {
        invocation_id: String,
        provider: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        finish_reason: Option<String>,
    },
    ToolDispatched {
        invocation_id: String,
        call_id: String,
        tool_name: String,
        yields: bool,
    },
    ToolFinished {
        invocation_id: String,
        call_id: String,
        tool_name: String,
        duration_ms: u64,
        is_error: bool,
        retry_count: Option<u32>,
    },
    ToolYieldRaised {
        invocation_id: String,
        call_id: String,
        tool_name: String,
    },
    ResumeAttempted {
        session_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionStatusChanged {
        session_id: String,
        from: String,
        to: String,
    },
    BranchSettled {
        parent_invocation_id: String,
        branch_index: usize,
        outcome: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "gridloom_event");
    }
}
