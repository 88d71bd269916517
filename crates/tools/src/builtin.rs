//! Concrete [`gridloom_engine::Tool`] implementations demonstrating the
//! contract (§6.4): a couple of trivial non-yielding tools, an
//! exec-like background-process tool pair built directly on
//! [`crate::exec`]/[`crate::process`], and a yielding approval tool.

use std::sync::Arc;

use serde_json::Value;

use gridloom_domain::error::Result;
use gridloom_domain::tool::ToolDefinition;
use gridloom_engine::{Tool, ToolContext, ToolOutcomeValue};

use crate::exec::{exec, ExecRequest};
use crate::manager::ProcessManager;
use crate::process::{handle_process, ProcessRequest};

/// Echoes its input back verbatim. The simplest possible tool: no
/// schema constraints, no side effects.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo the given value back unchanged.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "value": {} },
                "required": ["value"]
            }),
            yield_schema: None,
        }
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
        Ok(ToolOutcomeValue::Value(ctx.args["value"].clone()))
    }
}

/// Adds two numbers. Exercises argument-schema validation with a
/// minimal, deterministic handler — the tool-contract equivalent of a
/// "hello world".
pub struct MathTool;

#[async_trait::async_trait]
impl Tool for MathTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "math.add".into(),
            description: "Add two numbers and return their sum.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }),
            yield_schema: None,
        }
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
        let a = ctx.args["a"].as_f64().unwrap_or(0.0);
        let b = ctx.args["b"].as_f64().unwrap_or(0.0);
        Ok(ToolOutcomeValue::Value(serde_json::json!(a + b)))
    }
}

/// Runs a shell command, foreground or auto-backgrounded past
/// `yield_ms`, exactly as [`exec::exec`] does. Sessions it starts are
/// tracked by the shared [`ProcessManager`] and managed through
/// [`ProcessTool`].
pub struct ExecTool {
    manager: Arc<ProcessManager>,
}

impl ExecTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command. Runs in the foreground until it finishes or \
                yield_ms elapses, whichever first; past that it keeps running in the \
                background and returns a session_id to poll via the process tool."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "background": { "type": "boolean" },
                    "yield_ms": { "type": "integer" },
                    "timeout_sec": { "type": "integer" },
                    "workdir": { "type": "string" }
                },
                "required": ["command"]
            }),
            yield_schema: None,
        }
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
        let req: ExecRequest = serde_json::from_value(ctx.args.clone())
            .map_err(|e| gridloom_domain::error::Error::InvalidArguments {
                tool: ctx.tool_name.clone(),
                message: e.to_string(),
            })?;
        let response = exec(&self.manager, req).await;
        Ok(ToolOutcomeValue::Value(serde_json::to_value(response).unwrap_or(Value::Null)))
    }
}

/// Manages sessions started by [`ExecTool`]: list/poll/log/write/kill/
/// clear/remove, exactly as [`process::handle_process`] does.
pub struct ProcessTool {
    manager: Arc<ProcessManager>,
}

impl ProcessTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Tool for ProcessTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "process".into(),
            description: "Inspect or control a background session started by exec: list, \
                poll, log, write to stdin, kill, clear finished sessions, or remove one."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"] },
                    "session_id": { "type": "string" },
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" },
                    "tail_lines": { "type": "integer" },
                    "data": { "type": "string" },
                    "eof": { "type": "boolean" }
                },
                "required": ["action"]
            }),
            yield_schema: None,
        }
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
        let req: ProcessRequest = serde_json::from_value(ctx.args.clone())
            .map_err(|e| gridloom_domain::error::Error::InvalidArguments {
                tool: ctx.tool_name.clone(),
                message: e.to_string(),
            })?;
        let response = handle_process(&self.manager, req).await;
        Ok(ToolOutcomeValue::Value(serde_json::to_value(response).unwrap_or(Value::Null)))
    }
}

/// A minimal yielding tool (§6.4): declares a `yield_schema`, so the
/// agent loop emits `tool_yield` and suspends instead of calling
/// `execute` directly. Once a host resolves the pending call with a
/// `tool_input` matching the schema, `execute` runs with `ctx.input`
/// populated and simply returns it — this tool has no logic of its own
/// beyond gating on an external decision, generalized from the
/// teacher's single hardcoded "dangerous exec command" approval gate.
pub struct ApprovalTool;

#[async_trait::async_trait]
impl Tool for ApprovalTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "request_approval".into(),
            description: "Ask an external reviewer to approve or reject a proposed action. \
                Suspends the run until the decision is injected."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "summary": { "type": "string" } },
                "required": ["summary"]
            }),
            yield_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "approved": { "type": "boolean" },
                    "reason": { "type": "string" }
                },
                "required": ["approved"]
            })),
        }
    }

    async fn execute(&self, ctx: &ToolContext) -> Result<ToolOutcomeValue> {
        Ok(ToolOutcomeValue::Value(ctx.input.clone().unwrap_or(Value::Null)))
    }
}

/// Registers every built-in tool this crate ships into `registry`,
/// wiring [`ExecTool`]/[`ProcessTool`] onto a shared `manager`.
pub fn register_all(registry: &mut gridloom_engine::ToolRegistry, manager: Arc<ProcessManager>) {
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(MathTool));
    registry.register(Arc::new(ExecTool::new(manager.clone())));
    registry.register(Arc::new(ProcessTool::new(manager)));
    registry.register(Arc::new(ApprovalTool));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridloom_domain::event::InvocationId;
    use gridloom_session::Session;

    fn ctx(tool_name: &str, args: Value, input: Option<Value>) -> ToolContext {
        ToolContext {
            session: Session::new(),
            invocation_id: InvocationId::new_v4(),
            agent_name: "agent".into(),
            call_id: "c1".into(),
            tool_name: tool_name.into(),
            args,
            input,
            orchestration: None,
        }
    }

    #[tokio::test]
    async fn echo_returns_its_value_unchanged() {
        let tool = EchoTool;
        let out = tool.execute(&ctx("echo", serde_json::json!({"value": 42}), None)).await.unwrap();
        match out {
            ToolOutcomeValue::Value(v) => assert_eq!(v, serde_json::json!(42)),
            _ => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn math_add_sums_its_arguments() {
        let tool = MathTool;
        let out = tool
            .execute(&ctx("math.add", serde_json::json!({"a": 2, "b": 3}), None))
            .await
            .unwrap();
        match out {
            ToolOutcomeValue::Value(v) => assert_eq!(v, serde_json::json!(5.0)),
            _ => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn approval_tool_declares_a_yield_schema() {
        let tool = ApprovalTool;
        assert!(tool.definition().yields());
    }

    #[tokio::test]
    async fn approval_tool_returns_the_injected_input_on_resume() {
        let tool = ApprovalTool;
        let out = tool
            .execute(&ctx(
                "request_approval",
                serde_json::json!({"summary": "delete the staging bucket"}),
                Some(serde_json::json!({"approved": true})),
            ))
            .await
            .unwrap();
        match out {
            ToolOutcomeValue::Value(v) => assert_eq!(v, serde_json::json!({"approved": true})),
            _ => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn exec_tool_runs_a_foreground_command() {
        let manager = Arc::new(ProcessManager::new(crate::manager::ExecConfig::default()));
        let tool = ExecTool::new(manager);
        let out = tool
            .execute(&ctx("exec", serde_json::json!({"command": "echo hi", "yield_ms": 2000}), None))
            .await
            .unwrap();
        match out {
            ToolOutcomeValue::Value(v) => assert_eq!(v["status"], serde_json::json!("finished")),
            _ => panic!("expected a value"),
        }
    }
}
