//! Small, composable pieces for building a run without repeating the
//! same `AgentDef`/`Session` boilerplate in every test.

use std::sync::Arc;

use gridloom_adapter::{ModelConfig, ScriptedAdapter, ScriptedStep};
use gridloom_engine::{AgentDef, Runnable};
use gridloom_session::Session;

/// A single-agent [`Runnable`] wired to the `"scripted"` provider tag,
/// with whatever tool names `tools` names available for it to call.
pub fn scripted_agent(name: &str, tools: &[&str]) -> Runnable {
    AgentDef::new(name, "scripted")
        .with_model_config(ModelConfig::new("scripted", "test"))
        .with_tools(tools.iter().map(|t| t.to_string()))
        .build()
}

/// A [`ScriptedAdapter`] whose default queue replays `steps` for any
/// agent name that doesn't have its own script.
pub fn scripted_adapter(steps: Vec<ScriptedStep>) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(steps))
}

/// An empty in-memory session, the default starting point for a fresh
/// run.
pub fn fresh_session() -> Session {
    Session::new()
}
