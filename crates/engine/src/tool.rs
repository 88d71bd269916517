//! The `Tool` trait and registry (§4.4, §6.4).
//!
//! Grounded on the teacher's `runtime::tools::ToolHandler` dispatch table
//! (name → handler) plus `runtime::approval.rs`'s `PendingApproval`
//! pattern for the yielding lifecycle, generalized into a first-class
//! trait every built-in in `gridloom-tools` implements.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use gridloom_domain::error::Result;
use gridloom_domain::event::InvocationId;
use gridloom_domain::tool::ToolDefinition;
use gridloom_session::Session;

use crate::runnable::Runnable;

/// Context handed to every `Tool` lifecycle method.
#[derive(Clone)]
pub struct ToolContext {
    pub session: Session,
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
    /// Populated only on the resume path for a yielding tool: the
    /// externally-injected `tool_input`, re-validated against
    /// `yield_schema` before `execute` is called.
    pub input: Option<Value>,
    /// `call`/`spawn`/`dispatch` (§4.9), absent only in tests that build
    /// a bare `ToolContext` without a running invocation behind it.
    pub orchestration: Option<Arc<crate::orchestration::OrchestrationHandle>>,
}

/// A control signal recording that a tool delegated to a sub-agent which
/// itself yielded — propagated upward as "delegate-yield" (§4.4).
#[derive(Debug, Clone)]
pub struct YieldSignal {
    pub invocation_id: InvocationId,
    pub pending_call_ids: Vec<String>,
}

/// What a tool's `execute`/`finalize` can produce, generalizing the
/// in-band sentinel values a duck-typed implementation would otherwise
/// need (§9: "back-channel control signals from tools").
#[derive(Clone)]
pub enum ToolOutcomeValue {
    Value(Value),
    Transfer(Arc<Runnable>),
    Yield(YieldSignal),
}

impl ToolOutcomeValue {
    pub fn value(v: impl Into<Value>) -> Self {
        ToolOutcomeValue::Value(v.into())
    }
}

/// A concrete tool implementation. `prepare`/`finalize` default to a
/// no-op (`None` preserves the current args/result); `execute` is the
/// only method every tool must provide. Tools that declare a
/// `yield_schema` on their definition participate in the yielding
/// lifecycle (§6.4): the agent loop emits `tool_yield` and suspends
/// before ever calling `execute`, then calls it again on resume with
/// `ctx.input` populated.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn prepare(&self, _ctx: &ToolContext) -> Option<Value> {
        None
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue>;

    async fn finalize(&self, _ctx: &ToolContext, _result: &ToolOutcomeValue) -> Option<ToolOutcomeValue> {
        None
    }

    /// Errors this tool considers transient and worth retrying, used by
    /// the retry wrapper in `tool_exec`. Defaults to "never retry".
    fn is_retryable(&self, _error: &gridloom_domain::error::Error) -> bool {
        false
    }
}

/// Name → tool lookup, handed to the context renderer (for tool
/// descriptors) and the tool executor (for dispatch).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                parameters: serde_json::json!({"type": "object"}),
                yield_schema: None,
            }
        }

        async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
            Ok(ToolOutcomeValue::Value(ctx.args.clone()))
        }
    }

    #[test]
    fn registry_round_trips_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.definitions().len(), 1);
    }
}
