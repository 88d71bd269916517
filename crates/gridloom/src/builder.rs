//! Wires a [`RuntimeConfig`] into a ready-to-use [`gridloom_engine::Runner`]
//! and a fresh [`gridloom_session::Session`] attached to the configured
//! store — the composition root every binary embedding this crate
//! (the CLI demo included) goes through instead of hand-assembling
//! registries itself.

use std::sync::Arc;

use gridloom_adapter::{AdapterRegistry, ScriptedAdapter, ScriptedStep};
use gridloom_engine::{Runner, ToolRegistry};
use gridloom_session::store::{InMemorySessionStore, JsonlSessionStore};
use gridloom_session::Session;
use gridloom_tools::manager::{ExecConfig, ProcessManager};

use crate::config::{RuntimeConfig, SessionBackend};

/// Assembles a [`Runner`] and session store from a [`RuntimeConfig`].
/// Defaults to the in-tree [`ScriptedAdapter`] under the `"scripted"`
/// provider tag and every built-in tool `gridloom-tools` ships — swap
/// either out via [`Self::with_adapter`]/[`Self::with_tools`] before
/// calling [`Self::build`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    adapters: AdapterRegistry,
    tools: ToolRegistry,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        let mut tools = ToolRegistry::new();
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        gridloom_tools::register_all(&mut tools, manager);

        let mut adapters = AdapterRegistry::new();
        adapters.register("scripted", Arc::new(ScriptedAdapter::new(Vec::new())) as Arc<dyn gridloom_adapter::ModelAdapter>);

        Self { config, adapters, tools }
    }

    /// Replace the `"scripted"` adapter's script (the common case: a
    /// demo or a one-off script driving a specific conversation).
    pub fn with_scripted_steps(mut self, steps: Vec<ScriptedStep>) -> Self {
        self.adapters.register("scripted", Arc::new(ScriptedAdapter::new(steps)));
        self
    }

    pub fn with_adapter(mut self, provider_tag: impl Into<String>, adapter: Arc<dyn gridloom_adapter::ModelAdapter>) -> Self {
        self.adapters.register(provider_tag, adapter);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Build the `Runner` plus a fresh `Session` attached to the
    /// configured store backend.
    pub fn build(self) -> gridloom_domain::error::Result<(Runner, Session)> {
        let runner = Runner::builder().with_adapters(self.adapters).with_tools(self.tools).build();

        let session = match self.config.session.backend {
            SessionBackend::Memory => Session::new().with_store(Arc::new(InMemorySessionStore::new())),
            SessionBackend::Jsonl => {
                let store = JsonlSessionStore::new(self.config.session.path.clone())?;
                Session::new().with_store(store.into_shared())
            }
        };

        Ok((runner, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_config() {
        let (runner, session) = RuntimeBuilder::new(RuntimeConfig::default()).build().unwrap();
        drop(runner);
        assert!(session.events().is_empty());
    }
}
