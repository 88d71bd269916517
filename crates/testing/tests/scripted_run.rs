use std::sync::Arc;

use gridloom_adapter::ScriptedStep;
use gridloom_domain::error::Error as DomainError;
use gridloom_domain::event::{Event, InvocationEndReason, InvocationKind};
use gridloom_engine::cancel::CancelToken;
use gridloom_engine::outcome::{Outcome, RunMode};
use gridloom_engine::parallel::run_parallel;
use gridloom_engine::runnable::{LoopCtx, LoopDef, ParallelDef, StepContext, StepDef, StepSignal};
use gridloom_engine::{AgentDef, AgentLoopEnv};
use gridloom_session::SessionStatus;
use gridloom_testing::{assertions, fixtures, TestWorld};
use gridloom_tools::builtin::ApprovalTool;
use gridloom_tools::EchoTool;

#[tokio::test]
async fn agent_calls_a_tool_then_responds() {
    let world = TestWorld::new(vec![
        ScriptedStep::tool_call("c1", "echo", serde_json::json!({"value": "hi"})),
        ScriptedStep::text("done"),
    ])
    .with_tool(Arc::new(EchoTool));

    let agent = fixtures::scripted_agent("assistant", &["echo"]);
    let (result, _session) = world.run(agent).await;

    assertions::assert_completed(&result.outcome);
    assert_eq!(assertions::tool_call_names(&result.events), vec!["echo".to_string()]);
    assert_eq!(assertions::last_assistant_text(&result.events), Some("done".to_string()));
}

/// S1: a single turn with no tool calls completes in one model iteration.
#[tokio::test]
async fn linear_reasoning_completes_in_a_single_iteration() {
    let world = TestWorld::new(vec![ScriptedStep::text("Hello")]);
    let agent = fixtures::scripted_agent("assistant", &[]);
    let (result, session) = world.run(agent).await;

    assertions::assert_completed(&result.outcome);
    assert_eq!(assertions::last_assistant_text(&result.events), Some("Hello".to_string()));

    let events = session.events();
    let model_starts = events.iter().filter(|e| matches!(e, Event::ModelStart { .. })).count();
    let model_ends = events.iter().filter(|e| matches!(e, Event::ModelEnd { .. })).count();
    let ends = events
        .iter()
        .filter(|e| matches!(e, Event::InvocationEnd { reason: InvocationEndReason::Completed, .. }))
        .count();

    assert_eq!(model_starts, 1, "linear reasoning should take exactly one model iteration");
    assert_eq!(model_ends, 1);
    assert_eq!(ends, 1);
}

/// S3: resuming a yielded tool replays `invocation_resume` before the
/// re-materialized `tool_result`, not after.
#[tokio::test]
async fn resume_orders_invocation_resume_before_the_materialized_tool_result() {
    let world = TestWorld::new(vec![])
        .with_agent_script(
            "approver",
            vec![ScriptedStep::tool_call("c1", "request_approval", serde_json::json!({"summary": "spend $50"}))],
        )
        .with_tool(Arc::new(ApprovalTool));

    let agent = fixtures::scripted_agent("approver", &["request_approval"]);
    let (first, session) = world.run(agent.clone()).await;

    let pending = assertions::assert_yielded(&first.outcome);
    assert_eq!(pending, vec!["c1".to_string()]);
    assert_eq!(session.status(), SessionStatus::AwaitingInput);

    session.add_tool_input("c1", serde_json::json!({"approved": true}));
    world.push_steps("approver", vec![ScriptedStep::text("ok")]);

    let before_resume = session.events().len();
    let second = world.resume(agent, session.clone()).await.expect("resume against an unchanged composition succeeds");

    assertions::assert_completed(&second.outcome);
    assert_eq!(assertions::last_assistant_text(&session.events()), Some("ok".to_string()));

    let tail = &session.events()[before_resume..];
    assert!(matches!(tail.first(), Some(Event::InvocationResume { .. })), "expected invocation_resume first, got {:?}", tail.first());
    match tail.get(1) {
        Some(Event::ToolResult { call_id, .. }) => assert_eq!(call_id, "c1"),
        other => panic!("expected tool_result(c1) right after invocation_resume, got {other:?}"),
    }
}

struct Complete(serde_json::Value);
#[async_trait::async_trait]
impl gridloom_engine::runnable::StepFn for Complete {
    async fn call(&self, _ctx: &StepContext) -> StepSignal {
        StepSignal::Complete(self.0.clone(), None)
    }
}

struct Fail;
#[async_trait::async_trait]
impl gridloom_engine::runnable::StepFn for Fail {
    async fn call(&self, _ctx: &StepContext) -> StepSignal {
        StepSignal::Fail("branch unavailable".into())
    }
}

/// S4: `Parallel` with `min_successful` tolerates a failing branch as
/// long as enough others complete.
#[tokio::test]
async fn parallel_min_successful_tolerates_one_failing_branch() {
    let adapters = gridloom_adapter::registry::AdapterRegistry::new();
    let tools = gridloom_engine::ToolRegistry::new();
    let middleware = gridloom_engine::EngineMiddleware::default();
    let error_handler = gridloom_engine::ComposedErrorHandler::new();
    let env = AgentLoopEnv {
        adapters: &adapters,
        tools: &tools,
        middleware: &middleware,
        error_handler: &error_handler,
    };

    let children = vec![
        Arc::new(StepDef::new("a", Arc::new(Complete(serde_json::json!("a")))).build()),
        Arc::new(StepDef::new("b", Arc::new(Complete(serde_json::json!("b")))).build()),
        Arc::new(StepDef::new("c", Arc::new(Fail)).build()),
    ];
    let def = ParallelDef::new("root", children).with_min_successful(2);
    let session = gridloom_session::Session::new();
    let cancel = CancelToken::new();

    let outcome = run_parallel(
        &env,
        &def,
        &session,
        uuid::Uuid::new_v4(),
        0,
        RunMode::Fresh {
            parent_invocation_id: None,
            handoff_origin: None,
        },
        &cancel,
    )
    .await;

    assert!(outcome.is_completed(), "expected Completed with 2/3 branches succeeding, got {outcome:?}");
}

/// S5: a `Loop` keeps re-running its child until the predicate is
/// satisfied, completing with the last iteration's output.
#[tokio::test]
async fn loop_runs_until_assistant_text_contains_found() {
    let world = TestWorld::new(vec![]).with_agent_script(
        "searcher",
        vec![ScriptedStep::text("searching"), ScriptedStep::text("still searching"), ScriptedStep::text("FOUND it")],
    );
    let child = Arc::new(fixtures::scripted_agent("searcher", &[]));

    let while_fn = |ctx: &LoopCtx| match &ctx.last_outcome {
        None => true,
        Some(Outcome::Completed { final_output: Some(serde_json::Value::String(text)) }) => !text.contains("FOUND"),
        Some(_) => false,
    };
    let loop_def = LoopDef::new("search-loop", child, 10, Arc::new(while_fn)).build();

    let (result, session) = world.run(loop_def).await;

    assertions::assert_completed(&result.outcome);
    assert_eq!(assertions::last_assistant_text(&session.events()), Some("FOUND it".to_string()));

    let iterations = session
        .events()
        .iter()
        .filter(|e| matches!(e, Event::InvocationStart { kind: InvocationKind::Agent, .. }))
        .count();
    assert_eq!(iterations, 3, "expected exactly 3 iterations before the predicate stopped the loop");
}

/// S6: resuming against a composition whose structure has changed since
/// the session yielded fails closed rather than replaying against it.
#[tokio::test]
async fn resume_rejects_a_changed_composition_fingerprint() {
    let world = TestWorld::new(vec![]).with_agent_script(
        "approver",
        vec![ScriptedStep::tool_call("c1", "request_approval", serde_json::json!({"summary": "spend $50"}))],
    )
    .with_tool(Arc::new(ApprovalTool));

    let original = fixtures::scripted_agent("approver", &["request_approval"]);
    let (first, session) = world.run(original).await;
    assertions::assert_yielded(&first.outcome);

    // Renaming the root agent changes its fingerprint (§4.6: kind, name,
    // and ordered children, not model config or instructions) without
    // touching anything the running invocation itself depends on.
    let changed = AgentDef::new("approver-v2", "scripted")
        .with_model_config(gridloom_adapter::ModelConfig::new("scripted", "test"))
        .with_tools(vec!["request_approval".to_string()])
        .build();

    let result = world.resume(changed, session).await;
    assert!(matches!(result, Err(DomainError::StructureChanged { .. })), "expected StructureChanged, got {result:?}");
}
