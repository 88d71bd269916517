//! The parallel runner (§4.3): run children concurrently, each on its
//! own isolated session clone, folding their tails back into the parent
//! ledger in branch-index order once every branch has settled.
//!
//! Grounded on the teacher's absence of any composition layer (see
//! [`crate::sequence`]'s header) and on `tool_exec.rs::run_with_retry_and_timeout`
//! for the `tokio::time::timeout` idiom reused here for `branch_timeout_ms`.
//! Branch concurrency uses `FuturesUnordered` rather than `join_all` so
//! `fail_fast` can react to the first branch error while siblings are
//! still running, cancelling the shared token they all observe.

use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use gridloom_domain::event::{Event, InvocationEndReason, InvocationId, InvocationKind};
use gridloom_domain::trace::TraceEvent;
use gridloom_session::tree::{InvocationState, InvocationTree};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv};
use crate::cancel::CancelToken;
use crate::outcome::{count_prior_yields, end_invocation, BranchOutcome, Outcome, RunMode};
use crate::runnable::{ParallelDef, Runnable};

pub async fn run_parallel(
    env: &AgentLoopEnv<'_>,
    def: &ParallelDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    mode: RunMode,
    cancel: &CancelToken,
) -> Outcome {
    match &mode {
        RunMode::Fresh {
            parent_invocation_id,
            handoff_origin,
        } => {
            session.append(Event::InvocationStart {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id,
                agent_name: def.name.clone(),
                parent_invocation_id: *parent_invocation_id,
                kind: InvocationKind::Parallel,
                handoff_origin: handoff_origin.clone(),
                fingerprint: Runnable::Parallel(def.clone()).fingerprint().to_hex(),
            });
            run_fresh(env, def, session, invocation_id, depth, cancel).await
        }
        RunMode::Resume => run_resume(env, def, session, invocation_id, depth, cancel).await,
    }
}

async fn run_fresh(
    env: &AgentLoopEnv<'_>,
    def: &ParallelDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    cancel: &CancelToken,
) -> Outcome {
    let baseline = session.event_count();
    let mut tasks = FuturesUnordered::new();

    for (index, child) in def.children.iter().enumerate() {
        let branch_session = session.clone_for_branch();
        let child_invocation_id = Uuid::new_v4();
        let child = child.clone();
        let cancel = cancel.clone();
        let branch_timeout_ms = def.branch_timeout_ms;
        let env_ref: &AgentLoopEnv<'_> = env;

        tasks.push(async move {
            let fresh_mode = RunMode::Fresh {
                parent_invocation_id: Some(invocation_id),
                handoff_origin: None,
            };
            let run_fut = run_runnable(env_ref, &child, &branch_session, child_invocation_id, depth + 1, fresh_mode, &cancel);
            let outcome = match branch_timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), run_fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => Outcome::Error {
                        message: format!("branch {index} timed out after {ms}ms"),
                        parse_error: None,
                    },
                },
                None => run_fut.await,
            };
            let tail = branch_session.tail_since(baseline);
            (
                index,
                BranchOutcome {
                    index,
                    invocation_id: child_invocation_id,
                    outcome,
                    tail_events: tail,
                },
            )
        });
    }

    let mut branches: Vec<Option<BranchOutcome>> = (0..def.children.len()).map(|_| None).collect();
    while let Some((index, branch)) = tasks.next().await {
        TraceEvent::BranchSettled {
            parent_invocation_id: invocation_id.to_string(),
            branch_index: index,
            outcome: outcome_label(&branch.outcome),
        }
        .emit();
        let errored = matches!(branch.outcome, Outcome::Error { .. });
        branches[index] = Some(branch);
        if def.fail_fast && errored {
            cancel.cancel();
        }
    }

    let branches: Vec<BranchOutcome> = branches.into_iter().map(|b| b.expect("every branch index settled")).collect();
    for branch in &branches {
        session.append_all(branch.tail_events.clone());
    }

    finalize_parallel(def, session, invocation_id, branches).await
}

async fn run_resume(
    env: &AgentLoopEnv<'_>,
    def: &ParallelDef,
    session: &Session,
    invocation_id: InvocationId,
    depth: u32,
    cancel: &CancelToken,
) -> Outcome {
    let tree = InvocationTree::build(&session.events());
    let node = match tree.get(invocation_id) {
        Some(node) => node,
        None => {
            return Outcome::Error {
                message: "parallel resume requested for an invocation with no recorded start".into(),
                parse_error: None,
            }
        }
    };
    let existing_children = node.children.clone();

    let mut tasks = FuturesUnordered::new();
    let mut settled: Vec<Option<BranchOutcome>> = (0..def.children.len()).map(|_| None).collect();

    for (index, &child_invocation_id) in existing_children.iter().enumerate() {
        let state = tree.get(child_invocation_id).map(|n| n.state);
        match state {
            Some(InvocationState::Yielded) => {
                let child = def.children[index].clone();
                let cancel = cancel.clone();
                let env_ref: &AgentLoopEnv<'_> = env;
                let session_ref = session.clone();
                tasks.push(async move {
                    let outcome = run_runnable(env_ref, &child, &session_ref, child_invocation_id, depth + 1, RunMode::Resume, &cancel).await;
                    (
                        index,
                        BranchOutcome {
                            index,
                            invocation_id: child_invocation_id,
                            outcome,
                            tail_events: Vec::new(),
                        },
                    )
                });
            }
            Some(terminal_state) => {
                settled[index] = Some(BranchOutcome {
                    index,
                    invocation_id: child_invocation_id,
                    outcome: outcome_from_terminal_state(terminal_state),
                    tail_events: Vec::new(),
                });
            }
            None => {}
        }
    }

    while let Some((index, branch)) = tasks.next().await {
        TraceEvent::BranchSettled {
            parent_invocation_id: invocation_id.to_string(),
            branch_index: index,
            outcome: outcome_label(&branch.outcome),
        }
        .emit();
        let errored = matches!(branch.outcome, Outcome::Error { .. });
        settled[index] = Some(branch);
        if def.fail_fast && errored {
            cancel.cancel();
        }
    }

    let branches: Vec<BranchOutcome> = settled.into_iter().map(|b| b.expect("every branch index resolved")).collect();
    finalize_parallel(def, session, invocation_id, branches).await
}

/// Reconstruct a best-effort `Outcome` for a branch that already settled
/// in a prior process run. The tree only preserves which terminal state
/// it reached, not its `final_output`/error text, so completed/aborted/
/// max-steps branches resolve with empty payloads here.
fn outcome_from_terminal_state(state: InvocationState) -> Outcome {
    match state {
        InvocationState::Completed => Outcome::Completed { final_output: None },
        InvocationState::Error => Outcome::Error {
            message: "branch failed in a prior run".into(),
            parse_error: None,
        },
        InvocationState::Aborted => Outcome::Aborted,
        InvocationState::MaxSteps => Outcome::MaxSteps,
        InvocationState::Transferred | InvocationState::Running | InvocationState::Yielded => Outcome::Completed { final_output: None },
    }
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Completed { .. } => "completed".into(),
        Outcome::Yielded { .. } => "yielded".into(),
        Outcome::Error { message, .. } => format!("error: {message}"),
        Outcome::Aborted => "aborted".into(),
        Outcome::MaxSteps => "max_steps".into(),
        Outcome::Transferred { .. } => "transferred".into(),
    }
}

async fn finalize_parallel(
    def: &ParallelDef,
    session: &Session,
    invocation_id: InvocationId,
    branches: Vec<BranchOutcome>,
) -> Outcome {
    let pending: Vec<String> = branches
        .iter()
        .filter_map(|b| match &b.outcome {
            Outcome::Yielded { pending_call_ids } => Some(pending_call_ids.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    if !pending.is_empty() {
        let yield_index = count_prior_yields(session, invocation_id);
        session.append(Event::InvocationYield {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: def.name.clone(),
            pending_call_ids: pending.clone(),
            yield_index,
            awaiting_input: true,
        });
        return Outcome::Yielded { pending_call_ids: pending };
    }

    if branches.iter().any(|b| matches!(b.outcome, Outcome::Aborted)) {
        return Outcome::Aborted.propagate(session, invocation_id, &def.name);
    }

    if def.fail_fast {
        if let Some(b) = branches.iter().find(|b| matches!(b.outcome, Outcome::Error { .. })) {
            let message = match &b.outcome {
                Outcome::Error { message, .. } => message.clone(),
                _ => unreachable!(),
            };
            return Outcome::Error {
                message: format!("branch {} failed: {message}", b.index),
                parse_error: None,
            }
            .propagate(session, invocation_id, &def.name);
        }
    }

    let succeeded = branches.iter().filter(|b| b.succeeded()).count();
    if let Some(min) = def.min_successful {
        if succeeded < min {
            let failures: Vec<String> = branches
                .iter()
                .filter(|b| !b.succeeded())
                .map(|b| match &b.outcome {
                    Outcome::Error { message, .. } => format!("branch {}: {message}", b.index),
                    other => format!("branch {}: {}", b.index, outcome_label(other)),
                })
                .collect();
            return Outcome::Error {
                message: format!("only {succeeded}/{min} branches required succeeded; {}", failures.join("; ")),
                parse_error: None,
            }
            .propagate(session, invocation_id, &def.name);
        }
    }

    if let Some(merge) = &def.merge {
        let events = merge.merge(&branches).await;
        session.append_all(events);
    }

    let final_output = branches
        .iter()
        .filter(|b| b.succeeded())
        .max_by_key(|b| b.index)
        .and_then(|b| match &b.outcome {
            Outcome::Completed { final_output } => final_output.clone(),
            _ => None,
        });

    end_invocation(session, invocation_id, &def.name, InvocationEndReason::Completed, None);
    Outcome::Completed { final_output }
}
