//! Built-in tools: a background-process exec pair, a couple of trivial
//! demonstration tools, and a yielding approval tool.
//!
//! - `exec`: run commands foreground or auto-background after `yield_ms`
//! - `process`: manage background sessions (list/poll/log/write/kill/clear/remove)
//! - `builtin`: wraps the above (plus `echo`/`math.add`/`request_approval`)
//!   as [`gridloom_engine::Tool`] implementations ready to register.

pub mod builtin;
pub mod exec;
pub mod manager;
pub mod process;

pub use builtin::{register_all, ApprovalTool, EchoTool, ExecTool, MathTool, ProcessTool};
pub use manager::ProcessManager;
