//! Tool execution (§4.4): one call in, exactly one `tool_result` event
//! out, with validation, prepare/execute/finalize, timeout, retry, and
//! composed error recovery wrapped around `execute`.
//!
//! Grounded on the teacher's `runtime::tools` dispatch loop (name
//! lookup, JSON-schema arg validation, single try/catch around the
//! handler) plus `runtime::approval.rs` for the yield-then-resume half
//! of the lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use gridloom_domain::config::{RetryConfig, TimeoutConfig};
use gridloom_domain::error::Error;
use gridloom_domain::event::{Event, InvocationId, ToolOutcome};
use gridloom_domain::schema::Schema;
use gridloom_session::Session;

use crate::errors::{ComposedErrorHandler, ErrorCtx, ErrorPhase, Recovery};
use crate::hooks::{ComposedHooks, ToolHookCtx};
use crate::runnable::Runnable;
use crate::tool::{ToolContext, ToolOutcomeValue, ToolRegistry, YieldSignal};

/// A control signal that must propagate past this single call, up
/// through the agent loop and whatever composition invoked it.
pub enum ToolExecSignal {
    Transfer { target: Arc<Runnable>, from_agent: String },
    DelegateYield(YieldSignal),
}

pub struct ToolExecOutput {
    pub result_event: Event,
    pub signal: Option<ToolExecSignal>,
}

pub struct ToolExecEnv<'a> {
    pub registry: &'a ToolRegistry,
    pub hooks: &'a ComposedHooks,
    pub error_handler: &'a ComposedErrorHandler,
    pub retry: &'a RetryConfig,
    pub timeout: &'a TimeoutConfig,
    /// Threaded into every `ToolContext` this call builds, so a tool's
    /// `execute` can reach `call`/`spawn`/`dispatch` (§4.9). `None` only
    /// in tests that exercise `execute_tool_call` without a running
    /// invocation behind it.
    pub orchestration: Option<Arc<crate::orchestration::OrchestrationHandle>>,
}

/// Execute (or resume) a single tool call. `input` is `Some` only on the
/// resume path for a yielding tool, carrying the externally-injected
/// `tool_input` value.
pub async fn execute_tool_call(
    env: &ToolExecEnv<'_>,
    session: &Session,
    invocation_id: InvocationId,
    agent_name: &str,
    call_id: &str,
    tool_name: &str,
    args: Value,
    input: Option<Value>,
) -> ToolExecOutput {
    let started = std::time::Instant::now();
    let hook_ctx = ToolHookCtx {
        session: session.clone(),
        invocation_id,
        agent_name: agent_name.to_string(),
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        args: args.clone(),
    };

    if let Some(short_circuit) = env.hooks.before_tool.run_before(&hook_ctx).await {
        let final_value = env.hooks.after_tool.run_after(&hook_ctx, short_circuit).await;
        let mut output = finish(call_id, final_value, started, None, false);
        set_identity(&mut output.result_event, invocation_id, agent_name);
        return output;
    }

    let Some(tool) = env.registry.get(tool_name) else {
        let mut output = finish(
            call_id,
            ToolOutcomeValue::Value(Value::Null),
            started,
            Some(format!("unknown tool: {tool_name}")),
            false,
        );
        set_identity(&mut output.result_event, invocation_id, agent_name);
        return output;
    };

    let definition = tool.definition();
    if let Ok(schema) = Schema::new(definition.parameters.clone()) {
        if let Err(errors) = schema.validate(&args) {
            let mut output = finish(
                call_id,
                ToolOutcomeValue::Value(Value::Null),
                started,
                Some(format!("invalid arguments for {tool_name}: {}", errors.join("; "))),
                false,
            );
            set_identity(&mut output.result_event, invocation_id, agent_name);
            return output;
        }
    }

    let mut ctx = ToolContext {
        session: session.clone(),
        invocation_id,
        agent_name: agent_name.to_string(),
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        args,
        input,
        orchestration: env.orchestration.clone(),
    };

    if let Some(prepared) = tool.prepare(&ctx).await {
        ctx.args = prepared;
    }

    if definition.yields() {
        if let Some(input) = &ctx.input {
            if let Some(schema_doc) = &definition.yield_schema {
                if let Ok(schema) = Schema::new(schema_doc.clone()) {
                    if let Err(errors) = schema.validate(input) {
                        let mut output = finish(
                            call_id,
                            ToolOutcomeValue::Value(Value::Null),
                            started,
                            Some(format!("invalid yield input for {tool_name}: {}", errors.join("; "))),
                            false,
                        );
                        set_identity(&mut output.result_event, invocation_id, agent_name);
                        return output;
                    }
                }
            }
        }
    }

    let (mut outcome, timed_out, retry_count) = run_with_retry_and_timeout(env, &*tool, &ctx).await;

    if let Ok(ref value) = outcome {
        if let Some(replacement) = tool.finalize(&ctx, value).await {
            outcome = Ok(replacement);
        }
    }

    let mut output = match outcome {
        Ok(value) => {
            let final_value = env.hooks.after_tool.run_after(&hook_ctx, value).await;
            finish_with_signal(call_id, final_value, started, retry_count, timed_out)
        }
        Err(message) => ToolExecOutput {
            result_event: Event::ToolResult {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id,
                agent_name: agent_name.to_string(),
                call_id: call_id.to_string(),
                outcome: ToolOutcome::Error { message },
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count,
                timed_out,
            },
            signal: None,
        },
    };
    set_identity(&mut output.result_event, invocation_id, agent_name);
    output
}

/// `finish`/`finish_with_signal` build their `ToolResult` before the
/// caller's invocation/agent identity is known (they're shared with the
/// early-return error paths, which also lack it); patch it in once.
fn set_identity(event: &mut Event, invocation_id: InvocationId, agent_name: &str) {
    if let Event::ToolResult {
        invocation_id: iid,
        agent_name: name,
        ..
    } = event
    {
        *iid = invocation_id;
        *name = agent_name.to_string();
    }
}

async fn run_with_retry_and_timeout(
    env: &ToolExecEnv<'_>,
    tool: &dyn crate::tool::Tool,
    ctx: &ToolContext,
) -> (Result<ToolOutcomeValue, String>, bool, Option<u32>) {
    let mut attempt = 0u32;
    let mut timed_out = false;

    loop {
        let call_fut = tool.execute(ctx);
        let outcome = match env.timeout.tool_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call_fut).await {
                Ok(result) => result,
                Err(_) => {
                    timed_out = true;
                    Err(Error::Timeout(format!("tool {} timed out after {ms}ms", ctx.tool_name)))
                }
            },
            None => call_fut.await,
        };

        match outcome {
            Ok(value) => return (Ok(value), timed_out, if attempt > 0 { Some(attempt) } else { None }),
            Err(error) => {
                let error_ctx = ErrorCtx {
                    phase: ErrorPhase::Tool,
                    error: &error,
                    attempt,
                    tool_name: Some(&ctx.tool_name),
                };
                match env.error_handler.resolve(&error_ctx) {
                    Recovery::Retry { delay_ms } => {
                        if attempt + 1 >= env.retry.max_attempts.max(1) {
                            return (Err(error.to_string()), timed_out, Some(attempt));
                        }
                        tokio::time::sleep(crate::errors::backoff_duration(delay_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    Recovery::Fallback { result } => return (Ok(ToolOutcomeValue::Value(result)), timed_out, Some(attempt)),
                    Recovery::Skip => return (Err(error.to_string()), timed_out, Some(attempt)),
                    Recovery::Abort | Recovery::Throw => return (Err(error.to_string()), timed_out, Some(attempt)),
                    Recovery::Pass => return (Err(error.to_string()), timed_out, Some(attempt)),
                }
            }
        }
    }
}

fn finish(call_id: &str, value: ToolOutcomeValue, started: std::time::Instant, error: Option<String>, timed_out: bool) -> ToolExecOutput {
    if let Some(message) = error {
        return ToolExecOutput {
            result_event: Event::ToolResult {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: Uuid::nil(),
                agent_name: String::new(),
                call_id: call_id.to_string(),
                outcome: ToolOutcome::Error { message },
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count: None,
                timed_out,
            },
            signal: None,
        };
    }
    finish_with_signal(call_id, value, started, None, timed_out)
}

fn finish_with_signal(
    call_id: &str,
    value: ToolOutcomeValue,
    started: std::time::Instant,
    retry_count: Option<u32>,
    timed_out: bool,
) -> ToolExecOutput {
    let duration_ms = started.elapsed().as_millis() as u64;
    match value {
        ToolOutcomeValue::Value(v) => ToolExecOutput {
            result_event: Event::ToolResult {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: Uuid::nil(),
                agent_name: String::new(),
                call_id: call_id.to_string(),
                outcome: ToolOutcome::Ok { result: v },
                duration_ms,
                retry_count,
                timed_out,
            },
            signal: None,
        },
        ToolOutcomeValue::Transfer(target) => ToolExecOutput {
            result_event: Event::ToolResult {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: Uuid::nil(),
                agent_name: String::new(),
                call_id: call_id.to_string(),
                outcome: ToolOutcome::Ok {
                    result: serde_json::json!({"transferred_to": target.name()}),
                },
                duration_ms,
                retry_count,
                timed_out,
            },
            signal: Some(ToolExecSignal::Transfer {
                from_agent: String::new(),
                target,
            }),
        },
        ToolOutcomeValue::Yield(signal) => ToolExecOutput {
            result_event: Event::ToolResult {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: Uuid::nil(),
                agent_name: String::new(),
                call_id: call_id.to_string(),
                outcome: ToolOutcome::Ok {
                    result: serde_json::json!({"delegate_yielded": true}),
                },
                duration_ms,
                retry_count,
                timed_out,
            },
            signal: Some(ToolExecSignal::DelegateYield(signal)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ComposedHooks;
    use crate::tool::Tool;
    use gridloom_domain::tool::ToolDefinition;

    struct Add;

    #[async_trait::async_trait]
    impl Tool for Add {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "add".into(),
                description: "add two numbers".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
                yield_schema: None,
            }
        }

        async fn execute(&self, ctx: &ToolContext) -> gridloom_domain::error::Result<ToolOutcomeValue> {
            let a = ctx.args["a"].as_f64().unwrap_or(0.0);
            let b = ctx.args["b"].as_f64().unwrap_or(0.0);
            Ok(ToolOutcomeValue::Value(serde_json::json!(a + b)))
        }
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_result() {
        let registry = ToolRegistry::new();
        let hooks = ComposedHooks::default();
        let error_handler = ComposedErrorHandler::new();
        let retry = RetryConfig::default();
        let timeout = TimeoutConfig::default();
        let env = ToolExecEnv {
            registry: &registry,
            hooks: &hooks,
            error_handler: &error_handler,
            retry: &retry,
            timeout: &timeout,
            orchestration: None,
        };
        let session = Session::new();
        let output = execute_tool_call(
            &env,
            &session,
            Uuid::new_v4(),
            "agent",
            "c1",
            "nope",
            serde_json::json!({}),
            None,
        )
        .await;
        match output.result_event {
            Event::ToolResult { outcome: ToolOutcome::Error { message }, .. } => {
                assert!(message.contains("unknown tool"));
            }
            _ => panic!("expected error outcome"),
        }
    }

    #[tokio::test]
    async fn invalid_arguments_produce_error_without_executing() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Add));
        let hooks = ComposedHooks::default();
        let error_handler = ComposedErrorHandler::new();
        let retry = RetryConfig::default();
        let timeout = TimeoutConfig::default();
        let env = ToolExecEnv {
            registry: &registry,
            hooks: &hooks,
            error_handler: &error_handler,
            retry: &retry,
            timeout: &timeout,
            orchestration: None,
        };
        let session = Session::new();
        let output = execute_tool_call(
            &env,
            &session,
            Uuid::new_v4(),
            "agent",
            "c1",
            "add",
            serde_json::json!({"a": 1}),
            None,
        )
        .await;
        match output.result_event {
            Event::ToolResult { outcome: ToolOutcome::Error { message }, .. } => {
                assert!(message.contains("invalid arguments"));
            }
            _ => panic!("expected error outcome"),
        }
    }

    #[tokio::test]
    async fn valid_call_executes_and_returns_ok() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Add));
        let hooks = ComposedHooks::default();
        let error_handler = ComposedErrorHandler::new();
        let retry = RetryConfig::default();
        let timeout = TimeoutConfig::default();
        let env = ToolExecEnv {
            registry: &registry,
            hooks: &hooks,
            error_handler: &error_handler,
            retry: &retry,
            timeout: &timeout,
            orchestration: None,
        };
        let session = Session::new();
        let output = execute_tool_call(
            &env,
            &session,
            Uuid::new_v4(),
            "agent",
            "c1",
            "add",
            serde_json::json!({"a": 2, "b": 3}),
            None,
        )
        .await;
        match output.result_event {
            Event::ToolResult { outcome: ToolOutcome::Ok { result }, .. } => {
                assert_eq!(result, serde_json::json!(5.0));
            }
            _ => panic!("expected ok outcome"),
        }
    }
}
