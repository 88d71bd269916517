//! The outcome every runner (agent/step/sequence/parallel/loop) resolves
//! to, used to propagate non-completion (yield/error/abort/transfer)
//! through a composition without unwinding via panics or sentinel
//! values embedded in `Event`s.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use gridloom_domain::error::OutputParseError;
use gridloom_domain::event::{Event, HandoffOrigin, InvocationEndReason, InvocationId};
use gridloom_session::Session;

use crate::runnable::Runnable;

/// How any runner (sequence/parallel/loop/step — agent leaves use the
/// more specific [`crate::agent_loop::AgentRunMode`]) should begin: a
/// brand new invocation, or continuing one whose boundary is already
/// open in the ledger (§4.6).
#[derive(Clone)]
pub enum RunMode {
    Fresh {
        parent_invocation_id: Option<InvocationId>,
        handoff_origin: Option<HandoffOrigin>,
    },
    Resume,
}

#[derive(Clone)]
pub enum Outcome {
    Completed { final_output: Option<Value> },
    Yielded { pending_call_ids: Vec<String> },
    /// `parse_error` is populated when this error originated from a
    /// structured-output schema failure (§7), carrying the raw output,
    /// expected schema, validation errors, best-effort partial value, and
    /// correction-attempt count rather than just a flattened message.
    Error {
        message: String,
        parse_error: Option<Box<OutputParseError>>,
    },
    Aborted,
    MaxSteps,
    Transferred { target: Arc<Runnable>, from_agent: String },
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed { final_output } => f.debug_struct("Completed").field("final_output", final_output).finish(),
            Outcome::Yielded { pending_call_ids } => f.debug_struct("Yielded").field("pending_call_ids", pending_call_ids).finish(),
            Outcome::Error { message, parse_error } => f
                .debug_struct("Error")
                .field("message", message)
                .field("parse_error", &parse_error.is_some())
                .finish(),
            Outcome::Aborted => write!(f, "Aborted"),
            Outcome::MaxSteps => write!(f, "MaxSteps"),
            Outcome::Transferred { from_agent, .. } => f.debug_struct("Transferred").field("from_agent", from_agent).field("target", &"<runnable>").finish(),
        }
    }
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    pub fn is_terminal_for_sequence(&self) -> bool {
        !matches!(self, Outcome::Completed { .. })
    }

    /// Mirror a non-completed child outcome onto this composite's own
    /// invocation boundary before returning it to the caller (§3.1: every
    /// `invocation_start` is eventually matched by `invocation_end`, or by
    /// `invocation_yield` while suspended). Shared by `sequence`/`parallel`/
    /// `loop_runner` so a yield/error/abort/transfer three levels deep in a
    /// composition shows up at every ancestor in the tree, not just the
    /// invocation that actually produced it.
    pub fn propagate(self, session: &Session, invocation_id: InvocationId, agent_name: &str) -> Outcome {
        match &self {
            Outcome::Completed { .. } => {}
            Outcome::Yielded { pending_call_ids } => {
                let yield_index = count_prior_yields(session, invocation_id);
                session.append(Event::InvocationYield {
                    id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    invocation_id,
                    agent_name: agent_name.to_string(),
                    pending_call_ids: pending_call_ids.clone(),
                    yield_index,
                    awaiting_input: true,
                });
            }
            Outcome::Error { .. } => end_invocation(session, invocation_id, agent_name, InvocationEndReason::Error, None),
            Outcome::Aborted => end_invocation(session, invocation_id, agent_name, InvocationEndReason::Aborted, None),
            Outcome::MaxSteps => end_invocation(session, invocation_id, agent_name, InvocationEndReason::MaxSteps, None),
            Outcome::Transferred { target, .. } => {
                end_invocation(session, invocation_id, agent_name, InvocationEndReason::Transferred, Some(target.name().to_string()))
            }
        }
        self
    }
}

/// Number of `invocation_yield` events already recorded for this
/// invocation — the next `yield_index`. Mirrors the private helper in
/// `agent_loop`; duplicated here since composite runners need it too and
/// neither module depends on the other.
pub(crate) fn count_prior_yields(session: &Session, invocation_id: InvocationId) -> u32 {
    session
        .events()
        .iter()
        .filter(|e| matches!(e, Event::InvocationYield { invocation_id: iid, .. } if *iid == invocation_id))
        .count() as u32
}

pub(crate) fn end_invocation(session: &Session, invocation_id: InvocationId, agent_name: &str, reason: InvocationEndReason, handoff_target: Option<String>) {
    session.append(Event::InvocationEnd {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        invocation_id,
        agent_name: agent_name.to_string(),
        reason,
        handoff_target,
    });
}

/// Per-branch result from a `Parallel` runner, fed to a [`crate::runnable::MergeFn`]
/// and to resume descriptor construction.
#[derive(Clone)]
pub struct BranchOutcome {
    pub index: usize,
    pub invocation_id: InvocationId,
    pub outcome: Outcome,
    /// Events appended to the branch's session clone past the shared
    /// baseline, folded back into the parent ledger on join (§4.3).
    pub tail_events: Vec<Event>,
}

impl BranchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }
}
