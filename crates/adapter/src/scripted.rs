//! A deterministic, script-driven `ModelAdapter`. Every engine test and
//! the CLI demo use this instead of a real vendor transport: a caller
//! supplies, per agent name, the exact sequence of steps the "model"
//! will take, and `step` just pops the next one off the queue.
//!
//! Grounded on the teacher's `LlmProvider` trait (`sa-providers::traits`)
//! plus the streaming assembly loop in `runtime/turn.rs`, reduced to a
//! fixture adapter rather than a wire client.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use uuid::Uuid;

use gridloom_domain::error::Result;
use gridloom_domain::event::Event;
use gridloom_domain::stream::{ModelStepResult, Usage};
use gridloom_domain::tool::ToolCall;

use crate::traits::{CancelSignal, ModelAdapter, ModelConfig, RenderContext};

/// One scripted model step.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub assistant_text: Option<String>,
    pub thought: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Whether this step ends the invocation's model-calling phase. A
    /// step with tool calls and `terminal: false` is the common
    /// "call tools, then keep going" shape (S2); a step with assistant
    /// text and no tool calls is usually `terminal: true`.
    pub terminal: bool,
    pub finish_reason: Option<String>,
}

impl ScriptedStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            assistant_text: Some(text.into()),
            terminal: true,
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }

    pub fn tool_call(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
                arguments,
            }],
            terminal: false,
            ..Default::default()
        }
    }
}

/// Replays a fixed script of [`ScriptedStep`]s, one per agent name (or a
/// shared default queue for callers that don't key by agent). Once a
/// queue is exhausted, further calls return an empty terminal step
/// rather than erroring, so a loop bounded by `max_steps` terminates
/// cleanly instead of panicking mid-test.
pub struct ScriptedAdapter {
    id: String,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedStep>>>,
    default_script: Mutex<VecDeque<ScriptedStep>>,
}

impl ScriptedAdapter {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            id: "scripted".into(),
            scripts: Mutex::new(HashMap::new()),
            default_script: Mutex::new(steps.into()),
        }
    }

    pub fn with_agent_script(self, agent_name: impl Into<String>, steps: Vec<ScriptedStep>) -> Self {
        self.scripts.lock().insert(agent_name.into(), steps.into());
        self
    }

    /// Push more steps onto an agent's queue after construction (used to
    /// set up the S3 yield/resume scenario's second run).
    pub fn push_steps(&self, agent_name: &str, steps: Vec<ScriptedStep>) {
        self.scripts.lock().entry(agent_name.to_string()).or_default().extend(steps);
    }
}

#[async_trait::async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn step(&self, ctx: &RenderContext, _config: &ModelConfig, _cancel: &dyn CancelSignal) -> Result<ModelStepResult> {
        let next = {
            let mut scripts = self.scripts.lock();
            if let Some(queue) = scripts.get_mut(&ctx.agent_name) {
                queue.pop_front()
            } else {
                None
            }
        };
        let step = next.unwrap_or_else(|| self.default_script.lock().pop_front().unwrap_or_else(|| ScriptedStep {
            terminal: true,
            finish_reason: Some("exhausted".into()),
            ..Default::default()
        }));

        let mut step_events = Vec::new();
        let now = chrono::Utc::now();

        if let Some(thought) = &step.thought {
            step_events.push(Event::Thought {
                id: Uuid::new_v4(),
                created_at: now,
                invocation_id: ctx.invocation_id,
                agent_name: ctx.agent_name.clone(),
                text: thought.clone(),
            });
        }
        if let Some(text) = &step.assistant_text {
            step_events.push(Event::Assistant {
                id: Uuid::new_v4(),
                created_at: now,
                invocation_id: ctx.invocation_id,
                agent_name: ctx.agent_name.clone(),
                text: text.clone(),
                structured_output: None,
            });
        }
        for call in &step.tool_calls {
            step_events.push(Event::ToolCall {
                id: Uuid::new_v4(),
                created_at: now,
                invocation_id: ctx.invocation_id,
                agent_name: ctx.agent_name.clone(),
                call_id: call.call_id.clone(),
                name: call.tool_name.clone(),
                args: call.arguments.clone(),
                yields: false,
            });
        }

        Ok(ModelStepResult {
            step_events,
            tool_calls: step.tool_calls,
            terminal: step.terminal,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            finish_reason: step.finish_reason,
        })
    }

    fn adapter_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolChoice;

    fn ctx(agent_name: &str) -> RenderContext {
        RenderContext {
            invocation_id: Uuid::new_v4(),
            agent_name: agent_name.into(),
            messages: vec![],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            output_schema: None,
        }
    }

    #[tokio::test]
    async fn replays_steps_in_order() {
        let adapter = ScriptedAdapter::new(vec![
            ScriptedStep::tool_call("c1", "add", serde_json::json!({"a": 2, "b": 3})),
            ScriptedStep::text("5"),
        ]);
        struct NoCancel;
        impl CancelSignal for NoCancel {
            fn is_cancelled(&self) -> bool {
                false
            }
        }
        let config = ModelConfig::new("scripted", "test");
        let first = adapter.step(&ctx("a"), &config, &NoCancel).await.unwrap();
        assert!(!first.terminal);
        assert_eq!(first.tool_calls.len(), 1);

        let second = adapter.step(&ctx("a"), &config, &NoCancel).await.unwrap();
        assert!(second.terminal);
    }

    #[tokio::test]
    async fn exhausted_queue_returns_terminal_empty_step() {
        let adapter = ScriptedAdapter::new(vec![]);
        struct NoCancel;
        impl CancelSignal for NoCancel {
            fn is_cancelled(&self) -> bool {
                false
            }
        }
        let config = ModelConfig::new("scripted", "test");
        let result = adapter.step(&ctx("a"), &config, &NoCancel).await.unwrap();
        assert!(result.terminal);
        assert_eq!(result.finish_reason.as_deref(), Some("exhausted"));
    }

    #[tokio::test]
    async fn per_agent_scripts_are_independent() {
        let adapter = ScriptedAdapter::new(vec![]).with_agent_script("writer", vec![ScriptedStep::text("written")]);
        struct NoCancel;
        impl CancelSignal for NoCancel {
            fn is_cancelled(&self) -> bool {
                false
            }
        }
        let config = ModelConfig::new("scripted", "test");
        let writer_result = adapter.step(&ctx("writer"), &config, &NoCancel).await.unwrap();
        assert_eq!(writer_result.step_events.len(), 1);

        let other_result = adapter.step(&ctx("other"), &config, &NoCancel).await.unwrap();
        assert!(other_result.terminal);
        assert_eq!(other_result.finish_reason.as_deref(), Some("exhausted"));
    }
}
