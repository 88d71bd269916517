//! The `Runnable` algebra (§3.4): five composition primitives addressed
//! by stable names, immutable once built, fingerprinted for resume
//! validation.
//!
//! Grounded on the teacher's `runtime::agent::AgentConfig` (fields
//! generalized here into `AgentDef`) and the absence of any composition
//! layer in the teacher — `Sequence`/`Parallel`/`Loop`/`Step` are new,
//! built in the teacher's config-struct-plus-builder style.

use std::sync::Arc;

use gridloom_adapter::traits::ModelConfig;
use gridloom_domain::config::{AgentLimits, EngineConfig, ToolPolicy};
use gridloom_domain::fingerprint::{compute_fingerprint, Fingerprint, RunnableShape};
use gridloom_domain::schema::Schema;

use crate::context::ContextRenderer;
use crate::hooks::{AfterAgentHook, AfterModelHook, AfterToolHook, BeforeAgentHook, BeforeModelHook, BeforeToolHook, StepHook, StreamHook};

/// A node in the composition tree. Always held behind `Arc` once built,
/// since hooks/tools/children capture shared references to it (transfer
/// targets, loop children, sequence children).
#[derive(Clone)]
pub enum Runnable {
    Agent(AgentDef),
    Step(StepDef),
    Sequence(SequenceDef),
    Parallel(ParallelDef),
    Loop(LoopDef),
}

impl Runnable {
    pub fn name(&self) -> &str {
        match self {
            Runnable::Agent(d) => &d.name,
            Runnable::Step(d) => &d.name,
            Runnable::Sequence(d) => &d.name,
            Runnable::Parallel(d) => &d.name,
            Runnable::Loop(d) => &d.name,
        }
    }

    pub fn shape(&self) -> RunnableShape {
        match self {
            Runnable::Agent(d) => RunnableShape::Agent { name: d.name.clone() },
            Runnable::Step(d) => RunnableShape::Step { name: d.name.clone() },
            Runnable::Sequence(d) => RunnableShape::Sequence {
                name: d.name.clone(),
                children: d.children.iter().map(|c| c.shape()).collect(),
            },
            Runnable::Parallel(d) => RunnableShape::Parallel {
                name: d.name.clone(),
                children: d.children.iter().map(|c| c.shape()).collect(),
            },
            Runnable::Loop(d) => RunnableShape::Loop {
                name: d.name.clone(),
                child: Box::new(d.child.shape()),
            },
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        compute_fingerprint(&self.shape())
    }
}

/// Hooks a single `Runnable` declares for itself; composed with
/// runner-level middleware by [`crate::hooks::EngineMiddleware::compose`].
/// By convention the *last* entry in each vector is treated as "this
/// runnable's own hook" for before/after ordering purposes (§4.7); a
/// caller wanting a single inline hook just pushes one entry.
#[derive(Clone, Default)]
pub struct AgentHooks {
    pub before_agent: Vec<Arc<dyn BeforeAgentHook>>,
    pub after_agent: Vec<Arc<dyn AfterAgentHook>>,
    pub before_model: Vec<Arc<dyn BeforeModelHook>>,
    pub after_model: Vec<Arc<dyn AfterModelHook>>,
    pub before_tool: Vec<Arc<dyn BeforeToolHook>>,
    pub after_tool: Vec<Arc<dyn AfterToolHook>>,
    pub on_stream: Vec<Arc<dyn StreamHook>>,
    pub on_step: Vec<Arc<dyn StepHook>>,
}

/// An LLM-backed reasoning agent (§4.2).
#[derive(Clone)]
pub struct AgentDef {
    pub name: String,
    pub adapter_id: String,
    pub model_config: ModelConfig,
    pub instructions: Option<String>,
    pub tools: Vec<String>,
    pub tool_policy: ToolPolicy,
    pub output_schema: Option<Schema>,
    pub output_key: Option<String>,
    pub engine_config: EngineConfig,
    pub limits: AgentLimits,
    pub context_renderers: Vec<Arc<dyn ContextRenderer>>,
    pub hooks: AgentHooks,
}

impl AgentDef {
    pub fn new(name: impl Into<String>, adapter_id: impl Into<String>) -> Self {
        let adapter_id = adapter_id.into();
        Self {
            name: name.into(),
            model_config: ModelConfig::new(adapter_id.clone(), "default"),
            adapter_id,
            instructions: None,
            tools: Vec::new(),
            tool_policy: ToolPolicy::default(),
            output_schema: None,
            output_key: None,
            engine_config: EngineConfig::default(),
            limits: AgentLimits::default(),
            context_renderers: Vec::new(),
            hooks: AgentHooks::default(),
        }
    }

    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = config;
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.tools = tools.into_iter().collect();
        self
    }

    pub fn with_tool_policy(mut self, policy: ToolPolicy) -> Self {
        self.tool_policy = policy;
        self
    }

    pub fn with_output_schema(mut self, schema: Schema, state_key: Option<String>) -> Self {
        self.output_schema = Some(schema);
        self.output_key = state_key;
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn with_context_renderer(mut self, renderer: Arc<dyn ContextRenderer>) -> Self {
        self.context_renderers.push(renderer);
        self
    }

    pub fn with_before_agent_hook(mut self, hook: Arc<dyn BeforeAgentHook>) -> Self {
        self.hooks.before_agent.push(hook);
        self
    }

    pub fn with_after_agent_hook(mut self, hook: Arc<dyn AfterAgentHook>) -> Self {
        self.hooks.after_agent.push(hook);
        self
    }

    pub fn build(self) -> Runnable {
        Runnable::Agent(self)
    }
}

/// Signals a [`StepFn`] can return to the step runner (§4.5).
pub enum StepSignal {
    Skip,
    Fail(String),
    Respond(String),
    Complete(serde_json::Value, Option<String>),
    Transfer(Arc<Runnable>),
}

/// Context visible to a step function: the session, invocation identity,
/// and the orchestration handle for `call`/`spawn`/`dispatch` (§4.9).
pub struct StepContext {
    pub session: gridloom_session::Session,
    pub invocation_id: gridloom_domain::event::InvocationId,
    pub agent_name: String,
    pub orchestration: Arc<crate::orchestration::OrchestrationHandle>,
}

#[async_trait::async_trait]
pub trait StepFn: Send + Sync {
    async fn call(&self, ctx: &StepContext) -> StepSignal;
}

/// A single deterministic step (§4.5).
#[derive(Clone)]
pub struct StepDef {
    pub name: String,
    pub func: Arc<dyn StepFn>,
}

impl StepDef {
    pub fn new(name: impl Into<String>, func: Arc<dyn StepFn>) -> Self {
        Self { name: name.into(), func }
    }

    pub fn build(self) -> Runnable {
        Runnable::Step(self)
    }
}

/// Run children in order on the same session (§4.5).
#[derive(Clone)]
pub struct SequenceDef {
    pub name: String,
    pub children: Vec<Arc<Runnable>>,
}

impl SequenceDef {
    pub fn new(name: impl Into<String>, children: Vec<Arc<Runnable>>) -> Self {
        Self { name: name.into(), children }
    }

    pub fn build(self) -> Runnable {
        Runnable::Sequence(self)
    }
}

/// Fold per-branch results into events appended to the parent session
/// after join (§4.3).
#[async_trait::async_trait]
pub trait MergeFn: Send + Sync {
    async fn merge(&self, branches: &[crate::outcome::BranchOutcome]) -> Vec<gridloom_domain::event::Event>;
}

/// Run children concurrently, each on its own session clone (§4.3).
#[derive(Clone)]
pub struct ParallelDef {
    pub name: String,
    pub children: Vec<Arc<Runnable>>,
    pub fail_fast: bool,
    pub branch_timeout_ms: Option<u64>,
    pub min_successful: Option<usize>,
    pub merge: Option<Arc<dyn MergeFn>>,
}

impl ParallelDef {
    pub fn new(name: impl Into<String>, children: Vec<Arc<Runnable>>) -> Self {
        Self {
            name: name.into(),
            children,
            fail_fast: false,
            branch_timeout_ms: None,
            min_successful: None,
            merge: None,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_branch_timeout_ms(mut self, ms: u64) -> Self {
        self.branch_timeout_ms = Some(ms);
        self
    }

    pub fn with_min_successful(mut self, n: usize) -> Self {
        self.min_successful = Some(n);
        self
    }

    pub fn with_merge(mut self, merge: Arc<dyn MergeFn>) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn build(self) -> Runnable {
        Runnable::Parallel(self)
    }
}

/// The state visible to a [`WhileFn`] predicate between iterations.
pub struct LoopCtx {
    pub iteration: u32,
    pub last_outcome: Option<crate::outcome::Outcome>,
}

pub trait WhileFn: Send + Sync {
    fn call(&self, ctx: &LoopCtx) -> bool;
}

impl<F> WhileFn for F
where
    F: Fn(&LoopCtx) -> bool + Send + Sync,
{
    fn call(&self, ctx: &LoopCtx) -> bool {
        self(ctx)
    }
}

/// Repeat a child runnable while a predicate holds (§4.5).
#[derive(Clone)]
pub struct LoopDef {
    pub name: String,
    pub child: Arc<Runnable>,
    pub max_iterations: u32,
    pub while_fn: Arc<dyn WhileFn>,
    pub yields_between_iterations: bool,
}

impl LoopDef {
    pub fn new(name: impl Into<String>, child: Arc<Runnable>, max_iterations: u32, while_fn: Arc<dyn WhileFn>) -> Self {
        Self {
            name: name.into(),
            child,
            max_iterations,
            while_fn,
            yields_between_iterations: false,
        }
    }

    pub fn with_yields_between_iterations(mut self, yields: bool) -> Self {
        self.yields_between_iterations = yields;
        self
    }

    pub fn build(self) -> Runnable {
        Runnable::Loop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_fingerprint_depends_only_on_name() {
        let a = AgentDef::new("writer", "scripted").build();
        let b = AgentDef::new("writer", "scripted").build();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn sequence_fingerprint_reflects_children() {
        let a = AgentDef::new("a", "scripted").build();
        let seq = SequenceDef::new("root", vec![Arc::new(a)]).build();
        assert_eq!(seq.name(), "root");
    }
}
