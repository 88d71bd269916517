//! The resume engine (§4.6): validate a persisted session against the
//! `Runnable` composition it is about to be replayed onto, then dispatch
//! straight at the root's own invocation id in [`RunMode::Resume`].
//!
//! Grounded on the teacher's `runtime::approval.rs`, which re-validates a
//! pending approval's tool name against the live tool registry before
//! replaying it — generalized here into a fingerprint check against the
//! whole composition, since a resume can now be invalidated by any
//! structural change, not just a renamed tool.

use gridloom_domain::error::Error;
use gridloom_domain::event::{InvocationId, InvocationKind};
use gridloom_domain::trace::TraceEvent;
use gridloom_session::tree::{InvocationState, InvocationTree};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv};
use crate::cancel::CancelToken;
use crate::outcome::{Outcome, RunMode};
use crate::runnable::Runnable;

/// Validate a persisted session against the `Runnable` it is about to
/// be replayed onto, returning the root invocation id to resume at.
/// Shared by [`resume_run`] and [`crate::runner::Runner`], which both
/// need these checks to run before anything is dispatched or spawned.
pub(crate) fn validate_resume(root: &Runnable, session: &Session) -> Result<InvocationId, Error> {
    let tree = InvocationTree::build(&session.events());
    let root_id = match tree.root_id() {
        Some(id) => id,
        None => return Err(Error::Other("cannot resume a session with no recorded invocation".into())),
    };
    let root_node = tree.get(root_id).expect("root_id always resolves to a node");

    let current_fingerprint = root.fingerprint().to_hex();
    if root_node.fingerprint != current_fingerprint {
        TraceEvent::ResumeAttempted {
            session_id: session.session_id(),
            accepted: false,
            reason: Some("composition structure changed since this session was persisted".into()),
        }
        .emit();
        return Err(Error::StructureChanged {
            stored_fingerprint: root_node.fingerprint.clone(),
            current_fingerprint,
        });
    }

    let unresolved = unresolved_pending_calls(&tree);
    if !unresolved.is_empty() {
        TraceEvent::ResumeAttempted {
            session_id: session.session_id(),
            accepted: false,
            reason: Some(format!("{} pending call(s) have no matching tool_input", unresolved.len())),
        }
        .emit();
        return Err(Error::UnresolvedYield(unresolved));
    }

    if root_node.state != InvocationState::Yielded {
        TraceEvent::ResumeAttempted {
            session_id: session.session_id(),
            accepted: false,
            reason: Some("root invocation is not suspended".into()),
        }
        .emit();
        return Err(Error::Other("session has no suspended invocation to resume".into()));
    }

    TraceEvent::ResumeAttempted {
        session_id: session.session_id(),
        accepted: true,
        reason: None,
    }
    .emit();

    Ok(root_id)
}

/// Resume a session against `root`, the same composition it was
/// originally run with. Fails closed: any fingerprint mismatch or
/// dangling pending call is reported rather than silently skipped or
/// re-run.
pub async fn resume_run(env: &AgentLoopEnv<'_>, root: &Runnable, session: &Session, cancel: &CancelToken) -> Result<Outcome, Error> {
    let root_id = validate_resume(root, session)?;
    Ok(run_runnable(env, root, session, root_id, 0, RunMode::Resume, cancel).await)
}

/// Pending call ids from every yielded agent invocation that have no
/// corresponding `tool_input` event recorded yet. Composite runners
/// (sequence/parallel/loop) mirror their children's pending calls onto
/// their own node, but the actual `tool_input` resolution always lands
/// against the agent leaf that raised the call, so only agent-kind nodes
/// are checked here.
fn unresolved_pending_calls(tree: &InvocationTree) -> Vec<String> {
    let mut unresolved = Vec::new();
    for node in tree.yielded_nodes() {
        if node.kind != InvocationKind::Agent {
            continue;
        }
        for call_id in &node.pending_call_ids {
            let resolved = node.calls.get(call_id).and_then(|record| record.input.as_ref()).is_some();
            if !resolved {
                unresolved.push(call_id.clone());
            }
        }
    }
    unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ComposedErrorHandler;
    use crate::hooks::EngineMiddleware;
    use crate::runnable::{StepContext, StepDef, StepSignal};
    use crate::tool::ToolRegistry;
    use gridloom_adapter::registry::AdapterRegistry;
    use gridloom_domain::event::Event;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Respond;
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Respond {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            StepSignal::Respond("resumed".into())
        }
    }

    fn env() -> (AdapterRegistry, ToolRegistry, EngineMiddleware, ComposedErrorHandler) {
        (AdapterRegistry::new(), ToolRegistry::new(), EngineMiddleware::default(), ComposedErrorHandler::new())
    }

    #[tokio::test]
    async fn rejects_resume_when_the_composition_structure_changed() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = StepDef::new("step", Arc::new(Respond));
        let root = def.clone().build();
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        session.append(Event::InvocationStart {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "step".into(),
            parent_invocation_id: None,
            kind: gridloom_domain::event::InvocationKind::Step,
            handoff_origin: None,
            fingerprint: "stale-fingerprint".into(),
        });
        session.append(Event::InvocationYield {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "step".into(),
            pending_call_ids: vec![],
            yield_index: 0,
            awaiting_input: true,
        });
        let cancel = CancelToken::new();

        let result = resume_run(&loop_env, &root, &session, &cancel).await;
        assert!(matches!(result, Err(Error::StructureChanged { .. })));
    }

    #[tokio::test]
    async fn resumes_a_yielded_root_against_the_live_composition() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = StepDef::new("step", Arc::new(Respond));
        let root = def.clone().build();
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        session.append(Event::InvocationStart {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "step".into(),
            parent_invocation_id: None,
            kind: gridloom_domain::event::InvocationKind::Step,
            handoff_origin: None,
            fingerprint: root.fingerprint().to_hex(),
        });
        session.append(Event::InvocationYield {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "step".into(),
            pending_call_ids: vec![],
            yield_index: 0,
            awaiting_input: true,
        });
        let cancel = CancelToken::new();

        let outcome = resume_run(&loop_env, &root, &session, &cancel).await.expect("resume accepted");
        assert!(outcome.is_completed());
    }
}
