//! Middleware / hook composition (§4.7).
//!
//! Each hook kind is a small async trait so callers can either implement
//! it directly or wrap a closure with the `fn_*` helpers below. A
//! [`HookChain`] holds an ordered list per kind — composition order
//! matches §4.7: before-hooks run runner-level middleware first, then
//! agent-level (which, by convention, ends with the runnable's own
//! inline hook as its last entry); after-hooks run the exact reverse,
//! innermost (agent-level, ending with the runnable's own hook) first.
//!
//! Grounded on the teacher's hook-less `before_turn`/`after_turn`
//! ad-hoc call sites in `runtime/turn.rs`, generalized here into the
//! explicit composition the spec requires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use gridloom_domain::event::{Event, InvocationId};
use gridloom_domain::stream::ModelStepResult;
use gridloom_session::Session;

use crate::runnable::Runnable;
use crate::tool::ToolOutcomeValue;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Context visible to agent/model-level hooks.
#[derive(Clone)]
pub struct AgentHookCtx {
    pub session: Session,
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub depth: u32,
}

/// Context visible to tool-level hooks.
#[derive(Clone)]
pub struct ToolHookCtx {
    pub session: Session,
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
}

pub enum BeforeAgentOutcome {
    ShortCircuitText(String),
    Transfer(Arc<Runnable>),
}

pub enum BeforeModelOutcome {
    StepResult(ModelStepResult),
    Transfer(Arc<Runnable>),
}

pub enum AfterModelOutcome {
    Result(ModelStepResult),
    Transfer(Arc<Runnable>),
}

#[async_trait::async_trait]
pub trait BeforeAgentHook: Send + Sync {
    async fn call(&self, ctx: &AgentHookCtx) -> Option<BeforeAgentOutcome>;
}

#[async_trait::async_trait]
pub trait AfterAgentHook: Send + Sync {
    async fn call(&self, ctx: &AgentHookCtx, output: Option<Value>) -> Option<Value>;
}

#[async_trait::async_trait]
pub trait BeforeModelHook: Send + Sync {
    async fn call(&self, ctx: &AgentHookCtx) -> Option<BeforeModelOutcome>;
}

#[async_trait::async_trait]
pub trait AfterModelHook: Send + Sync {
    async fn call(&self, ctx: &AgentHookCtx, result: ModelStepResult) -> Option<AfterModelOutcome>;
}

#[async_trait::async_trait]
pub trait BeforeToolHook: Send + Sync {
    async fn call(&self, ctx: &ToolHookCtx) -> Option<ToolOutcomeValue>;
}

#[async_trait::async_trait]
pub trait AfterToolHook: Send + Sync {
    async fn call(&self, ctx: &ToolHookCtx, result: ToolOutcomeValue) -> Option<ToolOutcomeValue>;
}

/// Observation-only: fans out to every registered hook, no short-circuit.
#[async_trait::async_trait]
pub trait StreamHook: Send + Sync {
    async fn on_event(&self, event: &Event);
}

#[async_trait::async_trait]
pub trait StepHook: Send + Sync {
    async fn on_step(&self, ctx: &AgentHookCtx, step: &ModelStepResult);
}

/// An ordered list of hooks of one kind, composed according to §4.7.
/// `before_*` helpers short-circuit on the first non-`None`; `after_*`
/// helpers thread a value through every hook in reverse (innermost
/// first), preserving the current value whenever a hook returns `None`.
#[derive(Clone, Default)]
pub struct HookChain<H: ?Sized> {
    hooks: Vec<Arc<H>>,
}

impl<H: ?Sized> HookChain<H> {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn push(&mut self, hook: Arc<H>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl HookChain<dyn BeforeAgentHook> {
    pub async fn run_before(&self, ctx: &AgentHookCtx) -> Option<BeforeAgentOutcome> {
        for hook in &self.hooks {
            if let Some(outcome) = hook.call(ctx).await {
                return Some(outcome);
            }
        }
        None
    }
}

impl HookChain<dyn AfterAgentHook> {
    pub async fn run_after(&self, ctx: &AgentHookCtx, mut current: Option<Value>) -> Option<Value> {
        for hook in self.hooks.iter().rev() {
            if let Some(replacement) = hook.call(ctx, current.clone()).await {
                current = Some(replacement);
            }
        }
        current
    }
}

impl HookChain<dyn BeforeModelHook> {
    pub async fn run_before(&self, ctx: &AgentHookCtx) -> Option<BeforeModelOutcome> {
        for hook in &self.hooks {
            if let Some(outcome) = hook.call(ctx).await {
                return Some(outcome);
            }
        }
        None
    }
}

impl HookChain<dyn AfterModelHook> {
    pub async fn run_after(&self, ctx: &AgentHookCtx, mut current: ModelStepResult) -> AfterModelOutcome {
        for hook in self.hooks.iter().rev() {
            match hook.call(ctx, current.clone()).await {
                Some(AfterModelOutcome::Transfer(target)) => return AfterModelOutcome::Transfer(target),
                Some(AfterModelOutcome::Result(replacement)) => current = replacement,
                None => {}
            }
        }
        AfterModelOutcome::Result(current)
    }
}

impl HookChain<dyn BeforeToolHook> {
    pub async fn run_before(&self, ctx: &ToolHookCtx) -> Option<ToolOutcomeValue> {
        for hook in &self.hooks {
            if let Some(outcome) = hook.call(ctx).await {
                return Some(outcome);
            }
        }
        None
    }
}

impl HookChain<dyn AfterToolHook> {
    pub async fn run_after(&self, ctx: &ToolHookCtx, mut current: ToolOutcomeValue) -> ToolOutcomeValue {
        for hook in self.hooks.iter().rev() {
            if let Some(replacement) = hook.call(ctx, current.clone()).await {
                current = replacement;
            }
        }
        current
    }
}

impl HookChain<dyn StreamHook> {
    pub async fn fan_out(&self, event: &Event) {
        for hook in &self.hooks {
            hook.on_event(event).await;
        }
    }
}

impl HookChain<dyn StepHook> {
    pub async fn fan_out(&self, ctx: &AgentHookCtx, step: &ModelStepResult) {
        for hook in &self.hooks {
            hook.on_step(ctx, step).await;
        }
    }
}

/// The full set of hook chains visible to a single invocation: the
/// runner-level middleware stack concatenated with the agent's own
/// middleware/hook. Built fresh per invocation from `EngineMiddleware`
/// plus the `Runnable`'s declared hooks (see `runnable::AgentDef`).
#[derive(Clone, Default)]
pub struct ComposedHooks {
    pub before_agent: HookChain<dyn BeforeAgentHook>,
    pub after_agent: HookChain<dyn AfterAgentHook>,
    pub before_model: HookChain<dyn BeforeModelHook>,
    pub after_model: HookChain<dyn AfterModelHook>,
    pub before_tool: HookChain<dyn BeforeToolHook>,
    pub after_tool: HookChain<dyn AfterToolHook>,
    pub on_stream: HookChain<dyn StreamHook>,
    pub on_step: HookChain<dyn StepHook>,
}

/// Runner-wide middleware, registered once on the `Runner` and applied to
/// every invocation regardless of which agent is executing.
#[derive(Clone, Default)]
pub struct EngineMiddleware {
    pub before_agent: Vec<Arc<dyn BeforeAgentHook>>,
    pub after_agent: Vec<Arc<dyn AfterAgentHook>>,
    pub before_model: Vec<Arc<dyn BeforeModelHook>>,
    pub after_model: Vec<Arc<dyn AfterModelHook>>,
    pub before_tool: Vec<Arc<dyn BeforeToolHook>>,
    pub after_tool: Vec<Arc<dyn AfterToolHook>>,
    pub on_stream: Vec<Arc<dyn StreamHook>>,
    pub on_step: Vec<Arc<dyn StepHook>>,
}

impl EngineMiddleware {
    /// Compose this runner-level middleware with an agent's own
    /// declared hooks into the single chain an invocation consults.
    /// Order matches §4.7: runner-level first, then agent-level.
    pub fn compose(&self, agent_hooks: &crate::runnable::AgentHooks) -> ComposedHooks {
        let mut composed = ComposedHooks::default();
        for h in &self.before_agent {
            composed.before_agent.push(h.clone());
        }
        composed.before_agent.hooks.extend(agent_hooks.before_agent.iter().cloned());

        for h in &self.after_agent {
            composed.after_agent.push(h.clone());
        }
        composed.after_agent.hooks.extend(agent_hooks.after_agent.iter().cloned());

        for h in &self.before_model {
            composed.before_model.push(h.clone());
        }
        composed.before_model.hooks.extend(agent_hooks.before_model.iter().cloned());

        for h in &self.after_model {
            composed.after_model.push(h.clone());
        }
        composed.after_model.hooks.extend(agent_hooks.after_model.iter().cloned());

        for h in &self.before_tool {
            composed.before_tool.push(h.clone());
        }
        composed.before_tool.hooks.extend(agent_hooks.before_tool.iter().cloned());

        for h in &self.after_tool {
            composed.after_tool.push(h.clone());
        }
        composed.after_tool.hooks.extend(agent_hooks.after_tool.iter().cloned());

        for h in &self.on_stream {
            composed.on_stream.push(h.clone());
        }
        composed.on_stream.hooks.extend(agent_hooks.on_stream.iter().cloned());

        for h in &self.on_step {
            composed.on_step.push(h.clone());
        }
        composed.on_step.hooks.extend(agent_hooks.on_step.iter().cloned());

        composed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct AlwaysShortCircuit;
    #[async_trait::async_trait]
    impl BeforeAgentHook for AlwaysShortCircuit {
        async fn call(&self, _ctx: &AgentHookCtx) -> Option<BeforeAgentOutcome> {
            Some(BeforeAgentOutcome::ShortCircuitText("short".into()))
        }
    }

    struct NeverFires;
    #[async_trait::async_trait]
    impl BeforeAgentHook for NeverFires {
        async fn call(&self, _ctx: &AgentHookCtx) -> Option<BeforeAgentOutcome> {
            None
        }
    }

    fn ctx() -> AgentHookCtx {
        AgentHookCtx {
            session: Session::new(),
            invocation_id: Uuid::new_v4(),
            agent_name: "a".into(),
            depth: 0,
        }
    }

    #[tokio::test]
    async fn before_chain_short_circuits_on_first_hit() {
        let mut chain = HookChain::<dyn BeforeAgentHook>::new();
        chain.push(Arc::new(NeverFires));
        chain.push(Arc::new(AlwaysShortCircuit));
        let outcome = chain.run_before(&ctx()).await;
        assert!(matches!(outcome, Some(BeforeAgentOutcome::ShortCircuitText(t)) if t == "short"));
    }

    struct AppendSuffix(&'static str);
    #[async_trait::async_trait]
    impl AfterAgentHook for AppendSuffix {
        async fn call(&self, _ctx: &AgentHookCtx, output: Option<Value>) -> Option<Value> {
            let base = output.and_then(|v| v.as_str().map(|s| s.to_string())).unwrap_or_default();
            Some(Value::String(format!("{base}{}", self.0)))
        }
    }

    #[tokio::test]
    async fn after_chain_runs_innermost_first() {
        let mut chain = HookChain::<dyn AfterAgentHook>::new();
        chain.push(Arc::new(AppendSuffix("-outer")));
        chain.push(Arc::new(AppendSuffix("-inner")));
        let result = chain.run_after(&ctx(), Some(Value::String("base".into()))).await;
        assert_eq!(result, Some(Value::String("base-inner-outer".into())));
    }
}
