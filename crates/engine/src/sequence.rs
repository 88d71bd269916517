//! The sequence runner (§4.5): run children in order on the same
//! session, stopping the moment one of them fails to complete.
//!
//! Grounded on the teacher's absence of any composition layer at all —
//! `runtime/turn.rs` only ever drives one agent. Built in the style of
//! [`crate::step::run_step`]: each child gets its own invocation under
//! this one, resumed by matching the tree's recorded children back onto
//! `def.children` by position.

use uuid::Uuid;

use gridloom_domain::event::{Event, InvocationEndReason, InvocationId, InvocationKind};
use gridloom_session::tree::{InvocationState, InvocationTree};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv};
use crate::cancel::CancelToken;
use crate::outcome::{end_invocation, Outcome, RunMode};
use crate::runnable::{Runnable, SequenceDef};

pub async fn run_sequence(
    env: &AgentLoopEnv<'_>,
    def: &SequenceDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: RunMode,
    cancel: &CancelToken,
) -> Outcome {
    let existing_children: Vec<InvocationId> = match &mode {
        RunMode::Resume => {
            let tree = InvocationTree::build(&session.events());
            tree.get(invocation_id).map(|n| n.children.clone()).unwrap_or_default()
        }
        RunMode::Fresh { .. } => Vec::new(),
    };

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
            kind: InvocationKind::Sequence,
            handoff_origin: handoff_origin.clone(),
            fingerprint: Runnable::Sequence(def.clone()).fingerprint().to_hex(),
        });
    }

    let mut last_output = None;
    for (i, child) in def.children.iter().enumerate() {
        if cancel.is_cancelled() {
            return Outcome::Aborted.propagate(session, invocation_id, &def.name);
        }

        let (child_mode, child_invocation_id) = match existing_children.get(i) {
            Some(&cid) => {
                let tree = InvocationTree::build(&session.events());
                match tree.get(cid).map(|n| n.state) {
                    Some(InvocationState::Completed) => continue,
                    _ => (RunMode::Resume, cid),
                }
            }
            None => (
                RunMode::Fresh {
                    parent_invocation_id: Some(invocation_id),
                    handoff_origin: None,
                },
                Uuid::new_v4(),
            ),
        };

        let outcome = run_runnable(env, child, session, child_invocation_id, depth + 1, child_mode, cancel).await;
        match outcome {
            Outcome::Completed { final_output } => last_output = final_output,
            other => return other.propagate(session, invocation_id, &def.name),
        }
    }

    end_invocation(session, invocation_id, &def.name, InvocationEndReason::Completed, None);
    Outcome::Completed { final_output: last_output }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ComposedErrorHandler;
    use crate::hooks::EngineMiddleware;
    use crate::runnable::{StepContext, StepDef, StepSignal};
    use crate::tool::ToolRegistry;
    use gridloom_adapter::registry::AdapterRegistry;
    use std::sync::Arc;

    struct Complete(serde_json::Value);
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Complete {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            StepSignal::Complete(self.0.clone(), None)
        }
    }

    struct Fail;
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Fail {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            StepSignal::Fail("nope".into())
        }
    }

    fn env() -> (AdapterRegistry, ToolRegistry, EngineMiddleware, ComposedErrorHandler) {
        (AdapterRegistry::new(), ToolRegistry::new(), EngineMiddleware::default(), ComposedErrorHandler::new())
    }

    #[tokio::test]
    async fn runs_children_in_order_and_completes_with_last_output() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let children = vec![
            Arc::new(StepDef::new("one", Arc::new(Complete(serde_json::json!(1)))).build()),
            Arc::new(StepDef::new("two", Arc::new(Complete(serde_json::json!(2)))).build()),
        ];
        let def = SequenceDef::new("root", children);
        let session = Session::new();
        let cancel = CancelToken::new();

        let outcome = run_sequence(
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

    #[tokio::test]
    async fn a_failing_child_stops_the_sequence() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let children = vec![
            Arc::new(StepDef::new("one", Arc::new(Fail)).build()),
            Arc::new(StepDef::new("two", Arc::new(Complete(serde_json::json!(2)))).build()),
        ];
        let def = SequenceDef::new("root", children);
        let session = Session::new();
        let cancel = CancelToken::new();
        let invocation_id = Uuid::new_v4();

        let outcome = run_sequence(
            &loop_env,
            &def,
            &session,
            invocation_id,
            0,
            RunMode::Fresh {
                parent_invocation_id: None,
                handoff_origin: None,
            },
            &cancel,
        )
        .await;

        assert!(matches!(outcome, Outcome::Error { .. }));
        let tree = InvocationTree::build(&session.events());
        assert_eq!(tree.get(invocation_id).unwrap().state, InvocationState::Error);
    }
}
