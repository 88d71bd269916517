//! [`TestWorld`]: the one-stop harness most tests reach for — a
//! `Runner` wired to a `ScriptedAdapter` and whatever built-in tools the
//! test needs, run to completion against a fresh or caller-supplied
//! session.

use std::sync::Arc;

use gridloom_adapter::{AdapterRegistry, ScriptedAdapter, ScriptedStep};
use gridloom_engine::{Runnable, RunOutcome, Runner, ToolRegistry};
use gridloom_session::Session;

/// Assembles the pieces a scripted run needs and drains it to
/// completion. Construct with [`TestWorld::new`], add tools, then call
/// [`TestWorld::run`]/[`TestWorld::resume`].
pub struct TestWorld {
    adapter: Arc<ScriptedAdapter>,
    tools: ToolRegistry,
}

impl TestWorld {
    /// A world whose `"scripted"` provider replays `default_steps` for
    /// any agent that doesn't have its own script (see
    /// [`ScriptedAdapter::with_agent_script`] via [`Self::with_agent_script`]).
    pub fn new(default_steps: Vec<ScriptedStep>) -> Self {
        Self {
            adapter: Arc::new(ScriptedAdapter::new(default_steps)),
            tools: ToolRegistry::new(),
        }
    }

    /// Give a specific agent its own step queue instead of sharing the
    /// default one.
    pub fn with_agent_script(self, agent_name: impl Into<String>, steps: Vec<ScriptedStep>) -> Self {
        // `ScriptedAdapter::with_agent_script` consumes `self`; rebuild
        // around the returned adapter since `TestWorld` hands out `Arc`s.
        let adapter = Arc::try_unwrap(self.adapter)
            .unwrap_or_else(|_| panic!("with_agent_script must run before the adapter is shared"))
            .with_agent_script(agent_name, steps);
        Self {
            adapter: Arc::new(adapter),
            tools: self.tools,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn gridloom_engine::Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Push more steps onto an agent's queue after the world is built —
    /// used to set up a yield/resume scenario's second run.
    pub fn push_steps(&self, agent_name: &str, steps: Vec<ScriptedStep>) {
        self.adapter.push_steps(agent_name, steps);
    }

    fn runner(&self) -> Runner {
        let mut adapters = AdapterRegistry::new();
        adapters.register("scripted", self.adapter.clone());
        Runner::builder().with_adapters(adapters).with_tools(self.tools.clone()).build()
    }

    /// Run `root` fresh on a brand-new session and drain it to
    /// completion.
    pub async fn run(&self, root: Runnable) -> (RunOutcome, Session) {
        let session = Session::new();
        let outcome = self.runner().run(root, session.clone()).await;
        (outcome, session)
    }

    /// Run `root` fresh on a caller-supplied session (useful when the
    /// test needs to seed state or a system message first).
    pub async fn run_on(&self, root: Runnable, session: Session) -> RunOutcome {
        self.runner().run(root, session).await
    }

    /// Resume a previously-yielded session against the same
    /// composition.
    pub async fn resume(&self, root: Runnable, session: Session) -> gridloom_domain::error::Result<RunOutcome> {
        self.runner().resume(root, session).await
    }
}
