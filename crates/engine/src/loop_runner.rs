//! The loop runner (§4.5): repeat a child runnable while a predicate
//! holds, each iteration getting its own fresh invocation.
//!
//! Grounded on the teacher's absence of any composition layer (see
//! [`crate::sequence`]'s header). A loop can suspend two different ways:
//! mid-iteration, if the child itself yields, or between iterations, if
//! `yields_between_iterations` is set — both leave the loop's own
//! invocation node `Yielded` in the tree, so resume only needs to tell
//! them apart by checking whether the last started child is itself still
//! open.

use uuid::Uuid;

use gridloom_domain::event::{Event, InvocationEndReason, InvocationId, InvocationKind};
use gridloom_session::tree::{InvocationState, InvocationTree};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv};
use crate::cancel::CancelToken;
use crate::outcome::{count_prior_yields, end_invocation, Outcome, RunMode};
use crate::runnable::{LoopCtx, LoopDef, Runnable};

pub async fn run_loop(
    env: &AgentLoopEnv<'_>,
    def: &LoopDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: RunMode,
    cancel: &CancelToken,
) -> Outcome {
    let mut existing_children: Vec<InvocationId> = Vec::new();
    let mut resume_last_child = false;
    let mut skip_yield_gate = false;

    if let RunMode::Resume = &mode {
        let tree = InvocationTree::build(&session.events());
        if let Some(node) = tree.get(invocation_id) {
            existing_children = node.children.clone();
            if node.state == InvocationState::Yielded {
                session.append(Event::InvocationResume {
                    id: Uuid::new_v4(),
                    created_at: chrono::Utc::now(),
                    invocation_id,
                    agent_name: def.name.clone(),
                    yield_index: node.yield_index,
                });
                match existing_children.last() {
                    Some(&last) if tree.get(last).map(|n| n.state) == Some(InvocationState::Yielded) => {
                        resume_last_child = true;
                    }
                    _ => skip_yield_gate = true,
                }
            }
        }
    }

    if let RunMode::Fresh {
        parent_invocation_id,
        handoff_origin,
    } = &mode
    {
        session.append(Event::InvocationStart {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: def.name.clone(),
            parent_invocation_id: *parent_invocation_id,
            kind: InvocationKind::Loop,
            handoff_origin: handoff_origin.clone(),
            fingerprint: Runnable::Loop(def.clone()).fingerprint().to_hex(),
        });
    }

    let mut iteration = existing_children.len() as u32;
    let mut last_outcome: Option<Outcome> = None;

    if resume_last_child {
        let child_id = *existing_children.last().unwrap();
        iteration = iteration.saturating_sub(1);
        let outcome = run_runnable(env, &def.child, session, child_id, depth + 1, RunMode::Resume, cancel).await;
        match outcome {
            Outcome::Completed { .. } => {
                last_outcome = Some(outcome);
                iteration += 1;
            }
            other => return other.propagate(session, invocation_id, &def.name),
        }
    }

    loop {
        if cancel.is_cancelled() {
            return Outcome::Aborted.propagate(session, invocation_id, &def.name);
        }

        if iteration >= def.max_iterations {
            return Outcome::MaxSteps.propagate(session, invocation_id, &def.name);
        }

        let ctx = LoopCtx {
            iteration,
            last_outcome: last_outcome.clone(),
        };
        if !def.while_fn.call(&ctx) {
            break;
        }

        if def.yields_between_iterations && iteration > 0 && !skip_yield_gate {
            let yield_index = count_prior_yields(session, invocation_id);
            session.append(Event::InvocationYield {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                pending_call_ids: vec![],
                yield_index,
                awaiting_input: true,
            });
            return Outcome::Yielded { pending_call_ids: vec![] };
        }
        skip_yield_gate = false;

        let child_id = Uuid::new_v4();
        let outcome = run_runnable(
            env,
            &def.child,
            session,
            child_id,
            depth + 1,
            RunMode::Fresh {
                parent_invocation_id: Some(invocation_id),
                handoff_origin: None,
            },
            cancel,
        )
        .await;

        match outcome {
            Outcome::Completed { .. } => {
                last_outcome = Some(outcome);
                iteration += 1;
            }
            other => return other.propagate(session, invocation_id, &def.name),
        }
    }

    let final_output = match last_outcome {
        Some(Outcome::Completed { final_output }) => final_output,
        _ => None,
    };
    end_invocation(session, invocation_id, &def.name, InvocationEndReason::Completed, None);
    Outcome::Completed { final_output }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ComposedErrorHandler;
    use crate::hooks::EngineMiddleware;
    use crate::runnable::{StepContext, StepDef, StepSignal};
    use crate::tool::ToolRegistry;
    use gridloom_adapter::registry::AdapterRegistry;
    use std::sync::{atomic::{AtomicU32, Ordering}, Arc};

    struct Counter(Arc<AtomicU32>);
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Counter {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            StepSignal::Complete(serde_json::json!(n), None)
        }
    }

    fn env() -> (AdapterRegistry, ToolRegistry, EngineMiddleware, ComposedErrorHandler) {
        (AdapterRegistry::new(), ToolRegistry::new(), EngineMiddleware::default(), ComposedErrorHandler::new())
    }

    #[tokio::test]
    async fn stops_when_max_iterations_reached() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let child = Arc::new(StepDef::new("tick", Arc::new(Counter(counter.clone()))).build());
        let def = LoopDef::new("root", child, 3, Arc::new(|_: &LoopCtx| true));
        let session = Session::new();
        let cancel = CancelToken::new();

        let outcome = run_loop(
            &loop_env,
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

        assert!(matches!(outcome, Outcome::MaxSteps));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn predicate_false_completes_with_last_output() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let child = Arc::new(StepDef::new("tick", Arc::new(Counter(counter.clone()))).build());
        let def = LoopDef::new("root", child, 10, Arc::new(|ctx: &LoopCtx| ctx.iteration < 2));
        let session = Session::new();
        let cancel = CancelToken::new();

        let outcome = run_loop(
            &loop_env,
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

        match outcome {
            Outcome::Completed { final_output } => assert_eq!(final_output, Some(serde_json::json!(2))),
            _ => panic!("expected completion"),
        }
    }
}
