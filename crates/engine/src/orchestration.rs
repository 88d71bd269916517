//! Orchestration primitives (§4.8/§4.9): `call` and `spawn` let one
//! invocation start another as a first-class sub-invocation instead of
//! going through the model-driven tool-call path; `dispatch` is their
//! fire-and-forget cousin. Transfer is handled entirely by
//! [`Outcome::Transferred`] plus [`crate::runner::Runner`]'s top-level
//! loop, so there's no `transfer` function here.
//!
//! Grounded on the teacher's total absence of any sub-agent concept
//! (`runtime/mod.rs` drives exactly one `AgentConfig` per run) — these
//! are new, built in the style `run_runnable` already establishes:
//! `env`/`cancel` threaded explicitly rather than stashed behind a
//! context handle, since neither borrows past the lifetime of the call
//! tree they're invoked from.
//!
//! [`OrchestrationHandle`] is the piece that makes these reachable from a
//! running tool or step (§4.9: "exposed on tool and step contexts") —
//! `ToolContext`/`StepContext` each carry one. It cascades cancellation
//! by deriving every child token from the parent's with [`CancelToken::child`]
//! instead of minting an independent one, and enforces `AgentDef.limits`
//! (`max_depth`, `max_children_per_turn`) before starting a child.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use gridloom_domain::config::AgentLimits;
use gridloom_domain::error::Error;
use gridloom_domain::event::{HandoffOrigin, InvocationId};
use gridloom_session::Session;

use crate::agent_loop::{run_runnable, AgentLoopEnv, AgentLoopEnvOwned};
use crate::cancel::CancelToken;
use crate::outcome::{Outcome, RunMode};
use crate::runnable::Runnable;

/// Run `target` to completion on the same session, inline, as a child of
/// `parent_invocation_id`. Mirrors an ordinary function call: the caller
/// blocks until `target` finishes and gets its final output back, or an
/// error if it didn't complete. A `target` that yields is a caller
/// mistake — `call` has no way to suspend and resume later, only
/// [`spawn`] or a direct [`crate::runnable::Runnable`] child does.
pub async fn call(
    env: &AgentLoopEnv<'_>,
    target: &Runnable,
    session: &Session,
    parent_invocation_id: InvocationId,
    call_id: Option<String>,
    depth: u32,
    cancel: &CancelToken,
) -> Result<Value, Error> {
    let invocation_id = Uuid::new_v4();
    let mode = RunMode::Fresh {
        parent_invocation_id: Some(parent_invocation_id),
        handoff_origin: Some(HandoffOrigin::Call {
            parent_invocation_id,
            call_id,
        }),
    };

    match run_runnable(env, target, session, invocation_id, depth + 1, mode, cancel).await {
        Outcome::Completed { final_output } => Ok(final_output.unwrap_or(Value::Null)),
        Outcome::Yielded { .. } => Err(Error::Other(format!(
            "call to '{}' yielded; call requires its target to complete synchronously, use spawn for long-running work",
            target.name()
        ))),
        Outcome::Error { message, .. } => Err(Error::Other(format!("call to '{}' failed: {message}", target.name()))),
        Outcome::Aborted => Err(Error::Other(format!("call to '{}' was aborted", target.name()))),
        Outcome::MaxSteps => Err(Error::Other(format!("call to '{}' exceeded its step limit", target.name()))),
        Outcome::Transferred { target: to, .. } => Err(Error::Other(format!(
            "call to '{}' transferred to '{}'; transfer is only valid for the top-level run",
            target.name(),
            to.name()
        ))),
    }
}

/// A handle to an invocation started by [`spawn`]: a boxed future that
/// must be polled (via `.wait()`, or raced against other work) for the
/// spawned invocation to make progress, plus a token to cancel it.
/// There is no background OS task here — `spawn` models concurrent
/// *invocations* within the same run, not off-thread work. `'static`
/// since it owns its env/session/target rather than borrowing them, so
/// a tool's `execute` can return one without fighting the borrow
/// checker over its own short-lived `&ToolContext`.
pub struct SpawnHandle {
    pub invocation_id: InvocationId,
    cancel: CancelToken,
    future: Pin<Box<dyn Future<Output = Outcome> + Send>>,
}

impl SpawnHandle {
    pub async fn wait(self) -> Outcome {
        self.future.await
    }

    /// Cooperatively cancel the spawned invocation. Takes effect the
    /// next time it checks its token (model call boundaries, tool
    /// dispatch, loop iterations) — not a hard kill.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Start `target` as a sub-invocation of `parent_invocation_id`,
/// returning immediately with a handle the caller can `.wait()` on
/// alongside its own continued work. Runs on the same session as the
/// parent — safe since `Session::append` is internally synchronized —
/// so a spawned invocation's events interleave live with the parent's
/// rather than being folded back in afterward the way `Parallel`
/// branches are. `cancel` should be `parent_cancel.child()` so aborting
/// the parent cascades into the spawned child (§5).
pub fn spawn(env: Arc<AgentLoopEnvOwned>, target: Runnable, session: Session, parent_invocation_id: InvocationId, depth: u32, cancel: CancelToken) -> SpawnHandle {
    let invocation_id = Uuid::new_v4();
    let mode = RunMode::Fresh {
        parent_invocation_id: Some(parent_invocation_id),
        handoff_origin: Some(HandoffOrigin::Spawn {
            parent_invocation_id,
            call_id: None,
        }),
    };
    let handle_cancel = cancel.clone();
    let future = Box::pin(async move {
        let loop_env = env.as_env();
        run_runnable(&loop_env, &target, &session, invocation_id, depth + 1, mode, &cancel).await
    });
    SpawnHandle {
        invocation_id,
        cancel: handle_cancel,
        future,
    }
}

/// Bundles everything a running tool or step needs to start a
/// sub-invocation (§4.9), attached to `ToolContext`/`StepContext`.
/// Reachable only through `.call()`/`.spawn()`/`.dispatch()`, which
/// enforce `AgentDef.limits` before doing anything — `max_depth` against
/// the depth this handle was built at, `max_children_per_turn` against a
/// shared counter incremented on every attempt from this invocation.
pub struct OrchestrationHandle {
    env: Arc<AgentLoopEnvOwned>,
    session: Session,
    invocation_id: InvocationId,
    depth: u32,
    limits: AgentLimits,
    cancel: CancelToken,
    children_started: AtomicU32,
}

impl OrchestrationHandle {
    pub fn new(env: Arc<AgentLoopEnvOwned>, session: Session, invocation_id: InvocationId, depth: u32, limits: AgentLimits, cancel: CancelToken) -> Self {
        Self {
            env,
            session,
            invocation_id,
            depth,
            limits,
            cancel,
            children_started: AtomicU32::new(0),
        }
    }

    fn check_limits(&self) -> Result<(), Error> {
        if self.depth + 1 > self.limits.max_depth {
            return Err(Error::Other(format!(
                "max_depth {} exceeded: invocation at depth {} cannot start a child",
                self.limits.max_depth, self.depth
            )));
        }
        let started = self.children_started.fetch_add(1, Ordering::SeqCst) + 1;
        if started > self.limits.max_children_per_turn {
            return Err(Error::Other(format!(
                "max_children_per_turn {} exceeded by invocation {}",
                self.limits.max_children_per_turn, self.invocation_id
            )));
        }
        Ok(())
    }

    /// §4.9 `call`: synchronous sub-invocation on the same session.
    pub async fn call(&self, target: &Runnable, call_id: Option<String>) -> Result<Value, Error> {
        self.check_limits()?;
        let loop_env = self.env.as_env();
        call(&loop_env, target, &self.session, self.invocation_id, call_id, self.depth, &self.cancel).await
    }

    /// §4.9 `spawn`: concurrent sub-invocation, cancellable independently
    /// but cascaded from this invocation's own token.
    pub fn spawn(&self, target: Runnable) -> Result<SpawnHandle, Error> {
        self.check_limits()?;
        Ok(spawn(
            self.env.clone(),
            target,
            self.session.clone(),
            self.invocation_id,
            self.depth,
            self.cancel.child(),
        ))
    }

    /// §4.9 `dispatch`: fire-and-forget, errors logged only.
    pub async fn dispatch(&self, target: &Runnable) -> Result<(), Error> {
        self.check_limits()?;
        let loop_env = self.env.as_env();
        dispatch(&loop_env, target, &self.session, self.invocation_id, self.depth, &self.cancel.child()).await;
        Ok(())
    }
}

/// Start `target` and forget it: no handle, no propagation of its
/// outcome to the caller. A non-completion is only ever observable in
/// the session's own event ledger (the sub-invocation still gets its own
/// `invocation_start`/`invocation_end`) and through tracing — the caller
/// takes no action on it.
pub async fn dispatch(env: &AgentLoopEnv<'_>, target: &Runnable, session: &Session, parent_invocation_id: InvocationId, depth: u32, cancel: &CancelToken) {
    let invocation_id = Uuid::new_v4();
    let mode = RunMode::Fresh {
        parent_invocation_id: Some(parent_invocation_id),
        handoff_origin: Some(HandoffOrigin::Dispatch { parent_invocation_id }),
    };
    let outcome = run_runnable(env, target, session, invocation_id, depth + 1, mode, cancel).await;
    if let Outcome::Error { message, .. } = outcome {
        tracing::warn!(invocation = %target.name(), %message, "dispatched invocation failed");
    }
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

    struct Yields;
    #[async_trait::async_trait]
    impl crate::runnable::StepFn for Yields {
        async fn call(&self, _ctx: &StepContext) -> StepSignal {
            StepSignal::Skip
        }
    }

    fn env() -> (AdapterRegistry, ToolRegistry, EngineMiddleware, ComposedErrorHandler) {
        (AdapterRegistry::new(), ToolRegistry::new(), EngineMiddleware::default(), ComposedErrorHandler::new())
    }

    #[tokio::test]
    async fn call_returns_the_target_final_output() {
        let (adapters, tools, middleware, error_handler) = env();
        let loop_env = AgentLoopEnv {
            adapters: &adapters,
            tools: &tools,
            middleware: &middleware,
            error_handler: &error_handler,
        };
        let target = StepDef::new("child", Arc::new(Complete(serde_json::json!({"ok": true})))).build();
        let session = Session::new();
        let cancel = CancelToken::new();

        let result = call(&loop_env, &target, &session, Uuid::new_v4(), None, 0, &cancel).await;
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn spawn_handle_waits_for_the_child_to_finish() {
        let (adapters, tools, middleware, error_handler) = env();
        let owned_env = Arc::new(AgentLoopEnvOwned {
            adapters,
            tools,
            middleware,
            error_handler,
        });
        let target = StepDef::new("child", Arc::new(Yields)).build();
        let session = Session::new();

        let handle = spawn(owned_env, target, session, Uuid::new_v4(), 0, CancelToken::new());
        let outcome = handle.wait().await;
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn orchestration_handle_rejects_calls_past_max_depth() {
        let (adapters, tools, middleware, error_handler) = env();
        let owned_env = Arc::new(AgentLoopEnvOwned {
            adapters,
            tools,
            middleware,
            error_handler,
        });
        let target = StepDef::new("child", Arc::new(Complete(serde_json::json!(1)))).build();
        let session = Session::new();
        let limits = AgentLimits {
            max_depth: 1,
            max_children_per_turn: 5,
            max_duration_ms: 30_000,
        };
        let handle = OrchestrationHandle::new(owned_env, session, Uuid::new_v4(), 1, limits, CancelToken::new());

        let result = handle.call(&target, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn orchestration_handle_rejects_calls_past_max_children() {
        let (adapters, tools, middleware, error_handler) = env();
        let owned_env = Arc::new(AgentLoopEnvOwned {
            adapters,
            tools,
            middleware,
            error_handler,
        });
        let target = StepDef::new("child", Arc::new(Complete(serde_json::json!(1)))).build();
        let session = Session::new();
        let limits = AgentLimits {
            max_depth: 10,
            max_children_per_turn: 1,
            max_duration_ms: 30_000,
        };
        let handle = OrchestrationHandle::new(owned_env, session, Uuid::new_v4(), 0, limits, CancelToken::new());

        assert!(handle.call(&target, None).await.is_ok());
        assert!(handle.call(&target, None).await.is_err());
    }
}
