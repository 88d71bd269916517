//! The step runner (§4.5): a single user-supplied function whose return
//! signals map onto the same [`Outcome`] vocabulary every other runner
//! produces.
//!
//! Grounded on the teacher's ad-hoc handler dispatch in `runtime/mod.rs`
//! (a plain function called inline, with no invocation boundary of its
//! own) — generalized here into its own invocation kind so a step shows
//! up in the tree like everything else, except for the one case where it
//! hands off entirely to a child `Runnable`.

use chrono::Utc;
use uuid::Uuid;

use gridloom_domain::event::{Event, InvocationEndReason, InvocationId, InvocationKind};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv};
use crate::cancel::CancelToken;
use crate::outcome::{Outcome, RunMode};
use crate::runnable::{StepContext, StepDef, StepSignal};

/// Run (or resume) a single step. Steps have no internal suspension
/// point of their own: a resume simply re-invokes the function, except
/// when a prior run delegated to a child runnable, in which case the
/// child's own resume path takes over (found via the invocation tree,
/// since the delegate reused this very `invocation_id`).
pub async fn run_step(
    env: &AgentLoopEnv<'_>,
    def: &StepDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: RunMode,
    cancel: &CancelToken,
) -> Outcome {
    if let RunMode::Resume = mode {
        let tree = gridloom_session::tree::InvocationTree::build(&session.events());
        if let Some(node) = tree.get(invocation_id) {
            if node.kind != InvocationKind::Step {
                // A prior run delegated straight through to a child
                // runnable under this same invocation id. The resume
                // engine (§4.6) resolves the concrete child runnable from
                // the composition tree and resumes it directly rather
                // than routing back through here, since a bare `StepDef`
                // has no handle to that target to re-dispatch on.
                return Outcome::Error {
                    message: "step delegate resume must be driven by the resume engine with the delegate's own runnable".into(),
                    parse_error: None,
                };
            }
        }
    }

    if cancel.is_cancelled() {
        return Outcome::Aborted;
    }

    // Steps aren't attached to an `AgentDef`, so there's no declared
    // `AgentLimits` to inherit here; a bare step gets the documented
    // defaults rather than no limit at all.
    let owned_env = std::sync::Arc::new(crate::agent_loop::AgentLoopEnvOwned::from_env(env));
    let orchestration = std::sync::Arc::new(crate::orchestration::OrchestrationHandle::new(
        owned_env,
        session.clone(),
        invocation_id,
        depth,
        gridloom_domain::config::AgentLimits::default(),
        cancel.clone(),
    ));
    let ctx = StepContext {
        session: session.clone(),
        invocation_id,
        agent_name: def.name.clone(),
        orchestration,
    };

    let signal = def.func.call(&ctx).await;

    if let StepSignal::Transfer(target) = signal {
        // "Reuses this invocation's boundary" (§4.5): no invocation_start/
        // end of our own, the delegate's own boundary events use this id.
        let (parent_invocation_id, handoff_origin) = match mode {
            RunMode::Fresh {
                parent_invocation_id,
                handoff_origin,
            } => (parent_invocation_id, handoff_origin),
            RunMode::Resume => (None, None),
        };
        return run_runnable(
            env,
            &target,
            session,
            invocation_id,
            depth,
            RunMode::Fresh {
                parent_invocation_id,
                handoff_origin,
            },
            cancel,
        )
        .await;
    }

    if let RunMode::Fresh {
        parent_invocation_id,
        handoff_origin,
    } = mode
    {
        session.append(Event::InvocationStart {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            invocation_id,
            agent_name: def.name.clone(),
            parent_invocation_id,
            kind: InvocationKind::Step,
            handoff_origin,
            fingerprint: crate::runnable::Runnable::Step(def.clone()).fingerprint().to_hex(),
        });
    }

    let outcome = match signal {
        StepSignal::Skip => Outcome::Completed { final_output: None },
        StepSignal::Fail(message) => Outcome::Error { message, parse_error: None },
        StepSignal::Respond(text) => {
            session.append(Event::Assistant {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                text: text.clone(),
                structured_output: None,
            });
            Outcome::Completed {
                final_output: Some(serde_json::Value::String(text)),
            }
        }
        StepSignal::Complete(value, key) => {
            if let Some(key) = key {
                session.state_set(gridloom_domain::state::Scope::Session, key, value.clone());
            }
            Outcome::Completed { final_output: Some(value) }
        }
        StepSignal::Transfer(_) => unreachable!("handled above"),
    };

    let reason = match &outcome {
        Outcome::Completed { .. } => InvocationEndReason::Completed,
        Outcome::Error { .. } => InvocationEndReason::Error,
        Outcome::Aborted => InvocationEndReason::Aborted,
        Outcome::MaxSteps => InvocationEndReason::MaxSteps,
        Outcome::Transferred { .. } => InvocationEndReason::Transferred,
        Outcome::Yielded { .. } => InvocationEndReason::Completed,
    };
    session.append(Event::InvocationEnd {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        invocation_id,
        agent_name: def.name.clone(),
        reason,
        handoff_target: None,
    });

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Respond;
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Respond {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            StepSignal::Respond("hello".into())
        }
    }

    #[tokio::test]
    async fn respond_signal_completes_with_assistant_text() {
        let adapters = gridloom_adapter::registry::AdapterRegistry::new();
        let tools = crate::tool::ToolRegistry::new();
        let middleware = crate::hooks::EngineMiddleware::default();
        let error_handler = crate::errors::ComposedErrorHandler::new();
        let env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let def = StepDef::new("respond", Arc::new(Respond));
        let session = Session::new();
        let cancel = CancelToken::new();

        let outcome = run_step(
            &env,
            &def,
            &session,
            Uuid::new_v4(),
            0,
            RunMode::Fresh {
                parent_invocation_id: None,
                handoff_origin: None,
            },
            &cancel,
        )
        .await;

        assert!(outcome.is_completed());
        assert!(session.events().iter().any(|e| matches!(e, Event::Assistant { .. })));
    }
}
