//! Assertion helpers over a run's recorded events, so a test reads as
//! "what happened" rather than a pattern match against `Event`'s
//! variants.

use gridloom_domain::event::{Event, ToolOutcome};
use gridloom_engine::Outcome;

/// Panics unless `outcome` is [`Outcome::Completed`]; returns its
/// `final_output`, if any.
pub fn assert_completed(outcome: &Outcome) -> Option<serde_json::Value> {
    match outcome {
        Outcome::Completed { final_output } => final_output.clone(),
        other => panic!("expected Completed, got {other:?}"),
    }
}

/// Panics unless `outcome` is [`Outcome::Yielded`]; returns the pending
/// call ids.
pub fn assert_yielded(outcome: &Outcome) -> Vec<String> {
    match outcome {
        Outcome::Yielded { pending_call_ids } => pending_call_ids.clone(),
        other => panic!("expected Yielded, got {other:?}"),
    }
}

/// The text of the last `Assistant` event in `events`, if any.
pub fn last_assistant_text(events: &[Event]) -> Option<String> {
    events.iter().rev().find_map(|e| match e {
        Event::Assistant { text, .. } => Some(text.clone()),
        _ => None,
    })
}

/// Every tool name called, in the order the calls were made.
pub fn tool_call_names(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ToolCall { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// The `Ok` result value of the named tool's first result event, or
/// `None` if it never ran or its only result was an error.
pub fn tool_result_value(events: &[Event], call_id: &str) -> Option<serde_json::Value> {
    events.iter().find_map(|e| match e {
        Event::ToolResult {
            call_id: cid,
            outcome: ToolOutcome::Ok { result },
            ..
        } if cid == call_id => Some(result.clone()),
        _ => None,
    })
}
