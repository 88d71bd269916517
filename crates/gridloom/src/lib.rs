//! `gridloom`: the facade crate tying `gridloom-domain`, `gridloom-adapter`,
//! `gridloom-session`, `gridloom-tools`, and `gridloom-engine` together
//! behind a single dependency, plus the process-level concerns none of
//! those own individually — config loading and tracing setup.
//!
//! A binary embedding this runtime typically does:
//!
//! ```no_run
//! # async fn doc() -> anyhow::Result<()> {
//! use gridloom::prelude::*;
//!
//! let config = RuntimeConfig::load_or_default("gridloom.toml").with_env_overrides();
//! gridloom::tracing_init::init(&config.logging);
//!
//! let (runner, session) = RuntimeBuilder::new(config).build()?;
//! let agent = AgentDef::new("assistant", "scripted").build();
//! let result = runner.run(agent, session).await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod tracing_init;

pub use builder::RuntimeBuilder;
pub use config::RuntimeConfig;

/// Re-exports covering the common path through every layered crate, so
/// a binary only needs one `use gridloom::prelude::*;`.
pub mod prelude {
    pub use gridloom_adapter::{AdapterRegistry, ModelAdapter, ModelConfig, ScriptedAdapter, ScriptedStep};
    pub use gridloom_domain::error::{Error, Result};
    pub use gridloom_domain::event::Event;
    pub use gridloom_engine::{AgentDef, Outcome, Runnable, RunOutcome, Runner, Tool, ToolContext, ToolRegistry};
    pub use gridloom_session::Session;
    pub use gridloom_tools::{ApprovalTool, EchoTool, ExecTool, MathTool, ProcessTool};

    pub use crate::builder::RuntimeBuilder;
    pub use crate::config::RuntimeConfig;
}
