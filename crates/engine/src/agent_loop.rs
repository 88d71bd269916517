//! The agent reasoning loop (§4.2): render context, call the model, act
//! on tool calls, repeat until the model stops calling tools or
//! `max_steps` is reached.
//!
//! Grounded on the teacher's `runtime::turn::run_turn` (render →
//! provider call → tool-call fan-out → re-render, bounded by
//! `MAX_TOOL_LOOPS`), generalized with the hook/error/yield machinery
//! the teacher's single-provider loop never needed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use gridloom_adapter::registry::AdapterRegistry;
use gridloom_domain::event::{Event, HandoffOrigin, InvocationEndReason, InvocationId, InvocationKind, ToolOutcome};
use gridloom_domain::stream::ModelStepResult;
use gridloom_domain::trace::TraceEvent;
use gridloom_session::Session;

use crate::cancel::CancelToken;
use crate::context::render_context;
use crate::errors::{ComposedErrorHandler, ErrorCtx, ErrorPhase, Recovery};
use crate::hooks::{AfterModelOutcome, AgentHookCtx, BeforeAgentOutcome, BeforeModelOutcome, ComposedHooks, EngineMiddleware};
use crate::outcome::Outcome;
use crate::runnable::{AgentDef, Runnable};
use crate::tool::{ToolContext, ToolRegistry};
use crate::tool_exec::{execute_tool_call, ToolExecEnv, ToolExecSignal};

/// How a call to [`run_agent`] should begin: a brand new invocation, or
/// continuing one that previously suspended on a yielding tool call.
pub enum AgentRunMode {
    Fresh {
        parent_invocation_id: Option<InvocationId>,
        handoff_origin: Option<HandoffOrigin>,
    },
    Resume {
        yield_index: u32,
    },
}

/// Everything the loop needs that is shared across every agent
/// invocation in a run, wired up once by the top-level `Runner`.
pub struct AgentLoopEnv<'a> {
    pub adapters: &'a AdapterRegistry,
    pub tools: &'a ToolRegistry,
    pub middleware: &'a EngineMiddleware,
    pub error_handler: &'a ComposedErrorHandler,
}

/// Owned counterpart to [`AgentLoopEnv`]: every field is `Clone`
/// (registries and middleware are themselves `Arc`-backed collections),
/// so this can be wrapped in an `Arc` and handed to a
/// [`crate::orchestration::OrchestrationHandle`] that outlives the
/// borrowed `&AgentLoopEnv` a single `run_agent` call has on the stack —
/// needed for `spawn` (§4.9), whose future must keep running after the
/// tool call that started it returns.
#[derive(Clone)]
pub struct AgentLoopEnvOwned {
    pub adapters: AdapterRegistry,
    pub tools: ToolRegistry,
    pub middleware: EngineMiddleware,
    pub error_handler: ComposedErrorHandler,
}

impl AgentLoopEnvOwned {
    pub fn from_env(env: &AgentLoopEnv<'_>) -> Self {
        Self {
            adapters: env.adapters.clone(),
            tools: env.tools.clone(),
            middleware: env.middleware.clone(),
            error_handler: env.error_handler.clone(),
        }
    }

    pub fn as_env(&self) -> AgentLoopEnv<'_> {
        AgentLoopEnv {
            adapters: &self.adapters,
            tools: &self.tools,
            middleware: &self.middleware,
            error_handler: &self.error_handler,
        }
    }
}

/// Run (or resume) one agent invocation to a terminal [`Outcome`].
pub async fn run_agent(
    env: &AgentLoopEnv<'_>,
    def: &AgentDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: AgentRunMode,
    cancel: &CancelToken,
) -> Outcome {
    let hooks = env.middleware.compose(&def.hooks);

    match mode {
        AgentRunMode::Fresh {
            parent_invocation_id,
            handoff_origin,
        } => {
            let fingerprint = Runnable::Agent(def.clone()).fingerprint();
            session.append(Event::InvocationStart {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                parent_invocation_id,
                kind: InvocationKind::Agent,
                handoff_origin,
                fingerprint: fingerprint.to_hex(),
            });
            TraceEvent::InvocationStarted {
                invocation_id: invocation_id.to_string(),
                agent_name: def.name.clone(),
                kind: "agent".into(),
                parent_invocation_id: parent_invocation_id.map(|id| id.to_string()),
            }
            .emit();
        }
        AgentRunMode::Resume { yield_index } => {
            match materialize_resumed_yields(env, def, session, invocation_id, depth, yield_index, cancel, &hooks).await {
                MaterializeResult::Continue => {}
                MaterializeResult::Return(outcome) => return outcome,
            }
        }
    }

    let agent_ctx = AgentHookCtx {
        session: session.clone(),
        invocation_id,
        agent_name: def.name.clone(),
        depth,
    };

    if let Some(outcome) = hooks.before_agent.run_before(&agent_ctx).await {
        return match outcome {
            BeforeAgentOutcome::ShortCircuitText(text) => {
                session.append(Event::Assistant {
                    id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    invocation_id,
                    agent_name: def.name.clone(),
                    text: text.clone(),
                    structured_output: None,
                });
                end_invocation(session, invocation_id, &def.name, InvocationEndReason::Completed, None);
                Outcome::Completed {
                    final_output: Some(Value::String(text)),
                }
            }
            BeforeAgentOutcome::Transfer(target) => {
                end_invocation(session, invocation_id, &def.name, InvocationEndReason::Transferred, Some(target.name().to_string()));
                Outcome::Transferred {
                    from_agent: def.name.clone(),
                    target,
                }
            }
        };
    }

    let owned_env = Arc::new(AgentLoopEnvOwned::from_env(env));
    let orchestration = Arc::new(crate::orchestration::OrchestrationHandle::new(
        owned_env.clone(),
        session.clone(),
        invocation_id,
        depth,
        def.limits,
        cancel.clone(),
    ));

    let tool_env = ToolExecEnv {
        registry: env.tools,
        hooks: &hooks,
        error_handler: env.error_handler,
        retry: &def.engine_config.retry,
        timeout: &def.engine_config.timeouts,
        orchestration: Some(orchestration.clone()),
    };

    let invocation_started = Instant::now();
    let mut step_num = 0u32;
    loop {
        if cancel.is_cancelled() {
            end_invocation(session, invocation_id, &def.name, InvocationEndReason::Aborted, None);
            return Outcome::Aborted;
        }
        if step_num >= def.engine_config.max_steps {
            end_invocation(session, invocation_id, &def.name, InvocationEndReason::MaxSteps, None);
            return Outcome::MaxSteps;
        }
        if invocation_started.elapsed().as_millis() as u64 > def.limits.max_duration_ms {
            end_invocation(session, invocation_id, &def.name, InvocationEndReason::Error, None);
            return Outcome::Error {
                message: format!("agent '{}' exceeded max_duration_ms ({})", def.name, def.limits.max_duration_ms),
                parse_error: None,
            };
        }

        let step_result = match run_model_step(env, def, session, invocation_id, &hooks, &agent_ctx, cancel).await {
            Ok(ModelOutcome::Step(result)) => result,
            Ok(ModelOutcome::Transfer(target)) => {
                end_invocation(session, invocation_id, &def.name, InvocationEndReason::Transferred, Some(target.name().to_string()));
                return Outcome::Transferred {
                    from_agent: def.name.clone(),
                    target,
                };
            }
            Err(Outcome::Aborted) => {
                end_invocation(session, invocation_id, &def.name, InvocationEndReason::Aborted, None);
                return Outcome::Aborted;
            }
            Err(outcome) => {
                end_invocation(session, invocation_id, &def.name, InvocationEndReason::Error, None);
                return outcome;
            }
        };

        hooks.on_step.fan_out(&agent_ctx, &step_result).await;

        let tagged = tag_tool_call_yields(step_result.step_events.clone(), env.tools);
        for event in &tagged {
            hooks.on_stream.fan_out(event).await;
        }
        session.append_all(tagged);

        if step_result.tool_calls.is_empty() {
            if step_result.terminal {
                break;
            }
            step_num += 1;
            continue;
        }

        let mut yielding_calls = Vec::new();
        let mut non_yielding_calls = Vec::new();
        for call in &step_result.tool_calls {
            match env.tools.get(&call.tool_name) {
                Some(tool) if tool.definition().yields() => yielding_calls.push((call.clone(), tool)),
                _ => non_yielding_calls.push(call.clone()),
            }
        }

        let mut pending_call_ids = Vec::new();

        for (call, tool) in &yielding_calls {
            let prep_ctx = ToolContext {
                session: session.clone(),
                invocation_id,
                agent_name: def.name.clone(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                args: call.arguments.clone(),
                input: None,
                orchestration: Some(orchestration.clone()),
            };
            let prepared_args = tool.prepare(&prep_ctx).await.unwrap_or_else(|| call.arguments.clone());
            let yield_event = Event::ToolYield {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                call_id: call.call_id.clone(),
                prepared_args,
            };
            hooks.on_stream.fan_out(&yield_event).await;
            session.append(yield_event);
            TraceEvent::ToolYieldRaised {
                invocation_id: invocation_id.to_string(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            }
            .emit();
            pending_call_ids.push(call.call_id.clone());
        }

        for call in &non_yielding_calls {
            TraceEvent::ToolDispatched {
                invocation_id: invocation_id.to_string(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                yields: false,
            }
            .emit();
            let output = execute_tool_call(
                &tool_env,
                session,
                invocation_id,
                &def.name,
                &call.call_id,
                &call.tool_name,
                call.arguments.clone(),
                None,
            )
            .await;
            TraceEvent::ToolFinished {
                invocation_id: invocation_id.to_string(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                duration_ms: tool_result_duration(&output.result_event),
                is_error: tool_result_is_error(&output.result_event),
                retry_count: tool_result_retry_count(&output.result_event),
            }
            .emit();
            hooks.on_stream.fan_out(&output.result_event).await;
            session.append(output.result_event);

            match output.signal {
                Some(ToolExecSignal::Transfer { target, .. }) => {
                    end_invocation(session, invocation_id, &def.name, InvocationEndReason::Transferred, Some(target.name().to_string()));
                    return Outcome::Transferred {
                        from_agent: def.name.clone(),
                        target,
                    };
                }
                Some(ToolExecSignal::DelegateYield(signal)) => {
                    pending_call_ids.extend(signal.pending_call_ids);
                }
                None => {}
            }
        }

        if !pending_call_ids.is_empty() {
            let yield_index = count_prior_yields(session, invocation_id);
            session.append(Event::InvocationYield {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                pending_call_ids: pending_call_ids.clone(),
                yield_index,
                awaiting_input: true,
            });
            return Outcome::Yielded { pending_call_ids };
        }

        if step_result.terminal {
            break;
        }
        step_num += 1;
    }

    finalize_agent(def, session, invocation_id, &agent_ctx, &hooks).await
}

/// What [`run_model_step`] resolves to: a usable step result, or a
/// transfer that must bubble straight out of the loop.
enum ModelOutcome {
    Step(ModelStepResult),
    Transfer(Arc<Runnable>),
}

/// One render→call→recover cycle, wrapping the raw adapter call with the
/// before/after hook pair and the composed error-recovery policy (§4.8's
/// model-phase default: `Throw`).
async fn run_model_step(
    env: &AgentLoopEnv<'_>,
    def: &AgentDef,
    session: &Session,
    invocation_id: InvocationId,
    hooks: &ComposedHooks,
    agent_ctx: &AgentHookCtx,
    cancel: &CancelToken,
) -> Result<ModelOutcome, Outcome> {
    if let Some(outcome) = hooks.before_model.run_before(agent_ctx).await {
        return match outcome {
            BeforeModelOutcome::StepResult(result) => apply_after_model(hooks.after_model.run_after(agent_ctx, result).await),
            BeforeModelOutcome::Transfer(target) => Ok(ModelOutcome::Transfer(target)),
        };
    }

    let Some(adapter) = env.adapters.get(&def.model_config.provider) else {
        return Err(Outcome::Error {
            message: format!("no adapter registered for provider {}", def.model_config.provider),
            parse_error: None,
        });
    };

    let render_ctx = render_context(session, invocation_id, def, env.tools);

    session.append(Event::ModelStart {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        invocation_id,
        agent_name: def.name.clone(),
        messages: serde_json::to_value(&render_ctx.messages).unwrap_or(Value::Null),
        tools: serde_json::to_value(&render_ctx.tools).unwrap_or(Value::Null),
        output_schema: render_ctx.output_schema.as_ref().map(|s| s.document().clone()),
    });
    TraceEvent::ModelCallStarted {
        invocation_id: invocation_id.to_string(),
        provider: def.model_config.provider.clone(),
        model: def.model_config.model.clone(),
        streaming: false,
    }
    .emit();

    let started = Instant::now();
    let mut attempt = 0u32;
    let step_result = loop {
        match adapter.step(&render_ctx, &def.model_config, cancel).await {
            Ok(result) => break result,
            Err(error) => {
                let error_ctx = ErrorCtx {
                    phase: ErrorPhase::Model,
                    error: &error,
                    attempt,
                    tool_name: None,
                };
                match env.error_handler.resolve(&error_ctx) {
                    Recovery::Retry { delay_ms } => {
                        if attempt + 1 >= def.engine_config.retry.max_attempts.max(1) {
                            return Err(Outcome::Error {
                                message: error.to_string(),
                                parse_error: None,
                            });
                        }
                        tokio::time::sleep(crate::errors::backoff_duration(delay_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    Recovery::Fallback { result } => {
                        break ModelStepResult {
                            step_events: Vec::new(),
                            tool_calls: Vec::new(),
                            terminal: true,
                            usage: None,
                            finish_reason: Some(format!("fallback:{result}")),
                        };
                    }
                    Recovery::Skip => {
                        break ModelStepResult {
                            step_events: Vec::new(),
                            tool_calls: Vec::new(),
                            terminal: true,
                            usage: None,
                            finish_reason: Some("skipped".into()),
                        };
                    }
                    Recovery::Abort => return Err(Outcome::Aborted),
                    Recovery::Throw | Recovery::Pass => {
                        return Err(Outcome::Error {
                            message: error.to_string(),
                            parse_error: None,
                        })
                    }
                }
            }
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    session.append(Event::ModelEnd {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        invocation_id,
        agent_name: def.name.clone(),
        duration_ms,
        prompt_tokens: step_result.usage.map(|u| u.prompt_tokens),
        completion_tokens: step_result.usage.map(|u| u.completion_tokens),
        finish_reason: step_result.finish_reason.clone(),
    });
    TraceEvent::ModelCallFinished {
        invocation_id: invocation_id.to_string(),
        provider: def.model_config.provider.clone(),
        model: def.model_config.model.clone(),
        duration_ms,
        prompt_tokens: step_result.usage.map(|u| u.prompt_tokens),
        completion_tokens: step_result.usage.map(|u| u.completion_tokens),
        finish_reason: step_result.finish_reason.clone(),
    }
    .emit();

    apply_after_model(hooks.after_model.run_after(agent_ctx, step_result).await)
}

fn apply_after_model(outcome: AfterModelOutcome) -> Result<ModelOutcome, Outcome> {
    match outcome {
        AfterModelOutcome::Result(result) => Ok(ModelOutcome::Step(result)),
        AfterModelOutcome::Transfer(target) => Ok(ModelOutcome::Transfer(target)),
    }
}

/// Stamp every `tool_call` event with whether its tool declares a
/// `yield_schema`, since the adapter itself has no notion of the tool
/// registry and always emits `yields: false`.
fn tag_tool_call_yields(events: Vec<Event>, tools: &ToolRegistry) -> Vec<Event> {
    events
        .into_iter()
        .map(|event| match event {
            Event::ToolCall {
                id,
                created_at,
                invocation_id,
                agent_name,
                call_id,
                name,
                args,
                ..
            } => {
                let yields = tools.get(&name).map(|t| t.definition().yields()).unwrap_or(false);
                Event::ToolCall {
                    id,
                    created_at,
                    invocation_id,
                    agent_name,
                    call_id,
                    name,
                    args,
                    yields,
                }
            }
            other => other,
        })
        .collect()
}

/// Number of `invocation_yield` events already recorded for this
/// invocation, used as the next `yield_index`.
fn count_prior_yields(session: &Session, invocation_id: InvocationId) -> u32 {
    session
        .events()
        .iter()
        .filter(|e| matches!(e, Event::InvocationYield { invocation_id: iid, .. } if *iid == invocation_id))
        .count() as u32
}

fn tool_result_duration(event: &Event) -> u64 {
    match event {
        Event::ToolResult { duration_ms, .. } => *duration_ms,
        _ => 0,
    }
}

fn tool_result_is_error(event: &Event) -> bool {
    matches!(event, Event::ToolResult { outcome: ToolOutcome::Error { .. }, .. })
}

fn tool_result_retry_count(event: &Event) -> Option<u32> {
    match event {
        Event::ToolResult { retry_count, .. } => *retry_count,
        _ => None,
    }
}

enum MaterializeResult {
    Continue,
    Return(Outcome),
}

/// On resume, re-run the yielding tool calls that were waiting on
/// external input (§4.2 step 2, §6.4's yield/resume contract): every
/// `pending_call_id` recorded on the invocation's last `invocation_yield`
/// must now have a matching `tool_input`, or the resume is rejected and
/// the invocation stays yielded.
async fn materialize_resumed_yields(
    env: &AgentLoopEnv<'_>,
    def: &AgentDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    yield_index: u32,
    cancel: &CancelToken,
    hooks: &ComposedHooks,
) -> MaterializeResult {
    let append_resume = |session: &Session| {
        session.append(Event::InvocationResume {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            invocation_id,
            agent_name: def.name.clone(),
            yield_index,
        });
    };

    let tree = gridloom_session::tree::InvocationTree::build(&session.events());
    let Some(node) = tree.get(invocation_id) else {
        append_resume(session);
        return MaterializeResult::Continue;
    };
    let pending = node.pending_call_ids.clone();
    if pending.is_empty() {
        append_resume(session);
        return MaterializeResult::Continue;
    }

    let mut unresolved = Vec::new();
    let mut resolved = Vec::new();
    for call_id in &pending {
        let record = node.calls.get(call_id);
        match record.and_then(|r| r.input.clone()) {
            Some(Event::ToolInput { input, .. }) => {
                let tool_name = record
                    .and_then(|r| r.call.as_ref())
                    .map(|c| match c {
                        Event::ToolCall { name, .. } => name.clone(),
                        _ => String::new(),
                    })
                    .unwrap_or_default();
                resolved.push((call_id.clone(), tool_name, input));
            }
            _ => unresolved.push(call_id.clone()),
        }
    }

    if !unresolved.is_empty() {
        TraceEvent::ResumeAttempted {
            session_id: session.session_id(),
            accepted: false,
            reason: Some(format!("missing tool_input for {unresolved:?}")),
        }
        .emit();
        return MaterializeResult::Return(Outcome::Yielded { pending_call_ids: unresolved });
    }

    append_resume(session);

    let owned_env = Arc::new(AgentLoopEnvOwned::from_env(env));
    let orchestration = Arc::new(crate::orchestration::OrchestrationHandle::new(
        owned_env,
        session.clone(),
        invocation_id,
        depth,
        def.limits,
        cancel.clone(),
    ));
    let tool_env = ToolExecEnv {
        registry: env.tools,
        hooks,
        error_handler: env.error_handler,
        retry: &def.engine_config.retry,
        timeout: &def.engine_config.timeouts,
        orchestration: Some(orchestration),
    };

    for (call_id, tool_name, input) in resolved {
        let args = node
            .calls
            .get(&call_id)
            .and_then(|r| r.call.as_ref())
            .map(|c| match c {
                Event::ToolCall { args, .. } => args.clone(),
                _ => Value::Null,
            })
            .unwrap_or(Value::Null);
        let output = execute_tool_call(&tool_env, session, invocation_id, &def.name, &call_id, &tool_name, args, Some(input)).await;
        hooks.on_stream.fan_out(&output.result_event).await;
        session.append(output.result_event);

        if let Some(ToolExecSignal::Transfer { target, .. }) = output.signal {
            end_invocation(session, invocation_id, &def.name, InvocationEndReason::Transferred, Some(target.name().to_string()));
            return MaterializeResult::Return(Outcome::Transferred {
                from_agent: def.name.clone(),
                target,
            });
        }
    }

    TraceEvent::ResumeAttempted {
        session_id: session.session_id(),
        accepted: true,
        reason: None,
    }
    .emit();
    MaterializeResult::Continue
}

/// After the loop breaks on a terminal step: run `after_agent`, validate
/// against the output schema if declared, write `output_key` state, and
/// close the invocation.
async fn finalize_agent(def: &AgentDef, session: &Session, invocation_id: InvocationId, agent_ctx: &AgentHookCtx, hooks: &ComposedHooks) -> Outcome {
    let last_assistant = session.events().into_iter().rev().find_map(|e| match e {
        Event::Assistant {
            invocation_id: iid,
            text,
            structured_output,
            ..
        } if iid == invocation_id => Some((text, structured_output)),
        _ => None,
    });

    let (text, structured_output) = last_assistant.unwrap_or((String::new(), None));
    let raw_output: Value = structured_output.clone().unwrap_or(Value::String(text.clone()));

    let after_value = hooks.after_agent.run_after(agent_ctx, Some(raw_output.clone())).await;
    let final_value = after_value.unwrap_or(raw_output);

    if let Some(schema) = &def.output_schema {
        if let Err(errors) = schema.validate(&final_value) {
            end_invocation(session, invocation_id, &def.name, InvocationEndReason::Error, None);
            let parse_error = gridloom_domain::error::OutputParseError {
                raw_output: text,
                expected_schema: schema.document().clone(),
                errors: errors.clone(),
                partial_value: Some(final_value),
                correction_attempts: 0,
            };
            return Outcome::Error {
                message: parse_error.to_string(),
                parse_error: Some(Box::new(parse_error)),
            };
        }
        if let Some(key) = &def.output_key {
            session.state_set(gridloom_domain::state::Scope::Session, key.clone(), final_value.clone());
        }
    }

    end_invocation(session, invocation_id, &def.name, InvocationEndReason::Completed, None);
    Outcome::Completed {
        final_output: Some(final_value),
    }
}

/// Dispatch a single [`Runnable`] node to its runner, the one entry
/// point every composite runner (and orchestration primitive) uses to
/// run a child without caring what kind of node it is.
pub async fn run_runnable(
    env: &AgentLoopEnv<'_>,
    runnable: &Runnable,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: crate::outcome::RunMode,
    cancel: &CancelToken,
) -> Outcome {
    match runnable {
        Runnable::Agent(def) => {
            let agent_mode = match mode {
                crate::outcome::RunMode::Fresh {
                    parent_invocation_id,
                    handoff_origin,
                } => AgentRunMode::Fresh {
                    parent_invocation_id,
                    handoff_origin,
                },
                crate::outcome::RunMode::Resume => AgentRunMode::Resume {
                    yield_index: count_prior_yields(session, invocation_id),
                },
            };
            run_agent(env, def, session, invocation_id, depth, agent_mode, cancel).await
        }
        Runnable::Step(def) => crate::step::run_step(env, def, session, invocation_id, depth, mode, cancel).await,
        Runnable::Sequence(def) => crate::sequence::run_sequence(env, def, session, invocation_id, depth, mode, cancel).await,
        Runnable::Parallel(def) => crate::parallel::run_parallel(env, def, session, invocation_id, depth, mode, cancel).await,
        Runnable::Loop(def) => crate::loop_runner::run_loop(env, def, session, invocation_id, depth, mode, cancel).await,
    }
}

fn end_invocation(session: &Session, invocation_id: InvocationId, agent_name: &str, reason: InvocationEndReason, handoff_target: Option<String>) {
    session.append(Event::InvocationEnd {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        invocation_id,
        agent_name: agent_name.to_string(),
        reason,
        handoff_target: handoff_target.clone(),
    });
    TraceEvent::InvocationEnded {
        invocation_id: invocation_id.to_string(),
        agent_name: agent_name.to_string(),
        reason: format!("{reason:?}"),
        duration_ms: 0,
    }
    .emit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EngineMiddleware;
    use crate::runnable::AgentDef;
    use crate::tool::{Tool, ToolOutcomeValue};
    use gridloom_adapter::scripted::{ScriptedAdapter, ScriptedStep};
    use gridloom_domain::tool::ToolDefinition;
    use std::sync::Arc as StdArc;

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

        async fn execute(&self, ctx: &ToolContext) -> gridloom_domain::error::Result<ToolOutcomeValue> {
            Ok(ToolOutcomeValue::Value(ctx.args.clone()))
        }
    }

    fn scripted_registry(scripts: Vec<ScriptedStep>) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        registry.register("scripted", StdArc::new(ScriptedAdapter::new(scripts)));
        registry
    }

    #[tokio::test]
    async fn terminal_text_step_completes_without_tool_calls() {
        let adapters = scripted_registry(vec![ScriptedStep::text("done")]);
        let tools = ToolRegistry::new();
        let middleware = EngineMiddleware::default();
        let error_handler = ComposedErrorHandler::new();
        let env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = AgentDef::new("writer", "scripted");
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        let cancel = CancelToken::new();

        let outcome = run_agent(
            &env,
            &def,
            &session,
            invocation_id,
            0,
            AgentRunMode::Fresh {
                parent_invocation_id: None,
                handoff_origin: None,
            },
            &cancel,
        )
        .await;

        assert!(outcome.is_completed());
        assert!(session.events().iter().any(|e| matches!(e, Event::InvocationEnd { reason: InvocationEndReason::Completed, .. })));
    }

    #[tokio::test]
    async fn tool_call_step_executes_then_terminates() {
        let adapters = scripted_registry(vec![
            ScriptedStep::tool_call("c1", "echo", serde_json::json!({"x": 1})),
            ScriptedStep::text("all done"),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(StdArc::new(Echo));
        let middleware = EngineMiddleware::default();
        let error_handler = ComposedErrorHandler::new();
        let env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = AgentDef::new("writer", "scripted").with_tools(vec!["echo".to_string()]);
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        let cancel = CancelToken::new();

        let outcome = run_agent(
            &env,
            &def,
            &session,
            invocation_id,
            0,
            AgentRunMode::Fresh {
                parent_invocation_id: None,
                handoff_origin: None,
            },
            &cancel,
        )
        .await;

        assert!(outcome.is_completed());
        let events = session.events();
        assert!(events.iter().any(|e| matches!(e, Event::ToolResult { outcome: ToolOutcome::Ok { .. }, .. })));
    }

    #[tokio::test]
    async fn unregistered_provider_errors_without_panicking() {
        let adapters = AdapterRegistry::new();
        let tools = ToolRegistry::new();
        let middleware = EngineMiddleware::default();
        let error_handler = ComposedErrorHandler::new();
        let env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = AgentDef::new("writer", "missing-provider");
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        let cancel = CancelToken::new();

        let outcome = run_agent(
            &env,
            &def,
            &session,
            invocation_id,
            0,
            AgentRunMode::Fresh {
                parent_invocation_id: None,
                handoff_origin: None,
            },
            &cancel,
        )
        .await;

        assert!(matches!(outcome, Outcome::Error { .. }));
    }
}
