//! Context rendering (§4.10): assembling the per-step `RenderContext`
//! handed to a `ModelAdapter`.
//!
//! Grounded on the teacher's `ContextConfig` plus the
//! `build_system_context`/`transcript_lines_to_messages` helpers in
//! `runtime/mod.rs`: a small `ContextRenderer` trait so renderers
//! compose by folding over an initial state, exactly as described in
//! the agent loop's render step.

use std::sync::Arc;

use gridloom_adapter::traits::{RenderContext, ToolChoice};
use gridloom_domain::event::{Event, InvocationId};
use gridloom_domain::message::{ContentPart, Message, MessageContent, Role};
use gridloom_domain::schema::Schema;
use gridloom_domain::tool::ToolDefinition;
use gridloom_session::Session;

use crate::runnable::AgentDef;
use crate::tool::ToolRegistry;

/// The mutable state folded by each registered [`ContextRenderer`]
/// before being frozen into an adapter-facing `RenderContext`.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub output_schema: Option<Schema>,
}

impl RenderState {
    pub fn into_render_context(self) -> RenderContext {
        RenderContext {
            invocation_id: self.invocation_id,
            agent_name: self.agent_name,
            messages: self.messages,
            tools: self.tools,
            tool_choice: self.tool_choice,
            output_schema: self.output_schema,
        }
    }
}

/// A composable step in context assembly. Renderers fold left-to-right
/// over the state produced by the default history/tool/schema fill-in.
pub trait ContextRenderer: Send + Sync {
    fn render(&self, state: RenderState) -> RenderState;
}

/// Prepends a fixed system message ahead of whatever history rendering
/// produced — the most common renderer, standing in for the teacher's
/// per-agent system prompt injection.
pub struct SystemPromptRenderer(pub String);

impl ContextRenderer for SystemPromptRenderer {
    fn render(&self, mut state: RenderState) -> RenderState {
        state.messages.insert(0, Message::system(self.0.clone()));
        state
    }
}

/// Fold the session's conversation events into the adapter's `Message`
/// shape, bounded by `history_window` (most-recent-first truncation).
/// Mirrors the teacher's flat transcript-to-messages conversion:
/// `thought`/state/invocation-boundary events are not forwarded to the
/// model, only what a provider's chat API actually expects to see.
fn events_to_messages(events: &[Event], history_window: Option<usize>) -> Vec<Message> {
    let mut messages = Vec::new();
    for event in events {
        match event {
            Event::System { text, .. } => messages.push(Message::system(text.clone())),
            Event::User { text, .. } => messages.push(Message::user(text.clone())),
            Event::Assistant { text, .. } => messages.push(Message::assistant(text.clone())),
            Event::ToolCall { call_id, name, args, .. } => messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse {
                    id: call_id.clone(),
                    name: name.clone(),
                    input: args.clone(),
                }]),
            }),
            Event::ToolResult { call_id, outcome, .. } => {
                let (content, is_error) = match outcome {
                    gridloom_domain::event::ToolOutcome::Ok { result } => (result.to_string(), false),
                    gridloom_domain::event::ToolOutcome::Error { message } => (message.clone(), true),
                };
                messages.push(Message {
                    role: Role::Tool,
                    content: MessageContent::Parts(vec![ContentPart::ToolResult {
                        tool_use_id: call_id.clone(),
                        content,
                        is_error,
                    }]),
                });
            }
            _ => {}
        }
    }
    if let Some(window) = history_window {
        if messages.len() > window {
            let drop = messages.len() - window;
            messages.drain(..drop);
        }
    }
    messages
}

/// Build the tool surface visible to an agent: intersect the registry
/// with the agent's explicit allow-list (if any) and its `ToolPolicy`.
fn visible_tools(agent: &AgentDef, registry: &ToolRegistry) -> Vec<ToolDefinition> {
    registry
        .definitions()
        .into_iter()
        .filter(|def| agent.tools.is_empty() || agent.tools.iter().any(|t| t == &def.name))
        .filter(|def| agent.tool_policy.allows(&def.name))
        .collect()
}

/// Assemble the full `RenderContext` for one model step: default
/// history/tool/schema fill-in, then fold every renderer the agent
/// declared.
pub fn render_context(
    session: &Session,
    invocation_id: InvocationId,
    agent: &AgentDef,
    registry: &ToolRegistry,
) -> RenderContext {
    let events = session.events();
    let mut state = RenderState {
        invocation_id,
        agent_name: agent.name.clone(),
        messages: events_to_messages(&events, agent.engine_config.history_window),
        tools: visible_tools(agent, registry),
        tool_choice: ToolChoice::Auto,
        output_schema: agent.output_schema.clone(),
    };
    if let Some(instructions) = &agent.instructions {
        state = SystemPromptRenderer(instructions.clone()).render(state);
    }
    for renderer in &agent.context_renderers {
        state = renderer.render(state);
    }
    state.into_render_context()
}

/// Convenience for building a chain of renderers from closures, useful
/// in tests and demos that don't want to define a named type.
pub struct FnRenderer<F>(pub F)
where
    F: Fn(RenderState) -> RenderState + Send + Sync;

impl<F> ContextRenderer for FnRenderer<F>
where
    F: Fn(RenderState) -> RenderState + Send + Sync,
{
    fn render(&self, state: RenderState) -> RenderState {
        (self.0)(state)
    }
}

pub fn fn_renderer<F>(f: F) -> Arc<dyn ContextRenderer>
where
    F: Fn(RenderState) -> RenderState + Send + Sync + 'static,
{
    Arc::new(FnRenderer(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn events_to_messages_skips_non_conversation_events() {
        let events = vec![
            Event::User {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: None,
                text: "hi".into(),
            },
            Event::Thought {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: Uuid::new_v4(),
                agent_name: "a".into(),
                text: "thinking".into(),
            },
        ];
        let messages = events_to_messages(&events, None);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn history_window_truncates_oldest_first() {
        let events: Vec<Event> = (0..5)
            .map(|i| Event::User {
                id: Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                invocation_id: None,
                text: format!("msg-{i}"),
            })
            .collect();
        let messages = events_to_messages(&events, Some(2));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.text(), Some("msg-3"));
    }
}
