//! The `Session`: owner of the append-only event ledger and the scoped
//! state folded from it.
//!
//! Grounded on the teacher's `sessions::store::SessionStore` (single-writer,
//! `RwLock`-guarded, one entry per key) generalized from a flat token-usage
//! record to a full `Event` ledger, and on `sessions::transcript` for the
//! append-only write pattern `append`/`clone` mirror.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use gridloom_domain::event::{Event, EventId, InvocationId};
use gridloom_domain::state::{Scope, StateChangeSource};

use crate::store::SessionStore;

/// Derived run status (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    AwaitingInput,
    Completed,
    Error,
}

struct Inner {
    session_id: String,
    events: Vec<Event>,
    seen_ids: HashSet<EventId>,
    state: HashMap<Scope, HashMap<String, Value>>,
}

impl Inner {
    fn fresh(session_id: String) -> Self {
        let mut state = HashMap::new();
        for scope in Scope::ALL {
            state.insert(scope, HashMap::new());
        }
        Self {
            session_id,
            events: Vec::new(),
            seen_ids: HashSet::new(),
            state,
        }
    }
}

/// Owns an append-only ledger of `Event`s plus the scoped state folded
/// from `state_change` events. Cheap to clone (an `Arc` handle); use
/// [`Session::clone_for_branch`] for an isolated deep copy.
#[derive(Clone)]
pub struct Session {
    inner: Arc<RwLock<Inner>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::fresh(session_id.into()))),
            store: None,
        }
    }

    /// Attach an optional persistence sink; every `append` batch is
    /// forwarded to `store.commit` after the in-memory ledger is updated.
    /// The in-memory ledger is always authoritative — the store is a
    /// side-effecting mirror, never consulted for reads.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Rehydrate a session from a persisted snapshot.
    pub fn from_snapshot(snapshot: crate::store::Snapshot) -> Self {
        let session = Self::with_id(snapshot.session_id);
        for event in snapshot.events {
            session.append(event);
        }
        session
    }

    pub fn session_id(&self) -> String {
        self.inner.read().session_id.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.read().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Append one event to the ledger. Total: never rejects an event.
    /// Idempotent on identical `id` (a re-append of an already-seen event
    /// id is silently dropped, matching §4.1's `append` contract).
    /// Streaming-only deltas (`AssistantDelta`/`ThoughtDelta`) are never
    /// persisted even when passed here.
    pub fn append(&self, event: Event) {
        if event.is_stream_only() {
            return;
        }
        let mut inner = self.inner.write();
        if !inner.seen_ids.insert(event.id()) {
            return;
        }
        if let Event::StateChange {
            scope, key, new_value, ..
        } = &event
        {
            let bucket = inner.state.entry(*scope).or_default();
            match new_value {
                Some(v) => {
                    bucket.insert(key.clone(), v.clone());
                }
                None => {
                    bucket.remove(key);
                }
            }
        }
        inner.events.push(event);
        if let Some(store) = &self.store {
            let snapshot = crate::store::Snapshot {
                session_id: inner.session_id.clone(),
                events: inner.events.clone(),
                cursor: Some(inner.events.len()),
            };
            drop(inner);
            store.commit(snapshot);
            return;
        }
    }

    /// Append a batch in order; equivalent to calling `append` for each.
    pub fn append_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.append(event);
        }
    }

    // ---- scoped state (§3.2) ----

    pub fn state_get(&self, scope: Scope, key: &str) -> Option<Value> {
        self.inner.read().state.get(&scope).and_then(|m| m.get(key)).cloned()
    }

    pub fn state_snapshot(&self, scope: Scope) -> HashMap<String, Value> {
        self.inner.read().state.get(&scope).cloned().unwrap_or_default()
    }

    /// Set a key in `scope`, emitting a `state_change` event with the prior
    /// value (if any).
    pub fn state_set(&self, scope: Scope, key: impl Into<String>, value: Value) {
        let key = key.into();
        let old_value = self.state_get(scope, &key);
        self.append(Event::StateChange {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id: None,
            scope,
            source: StateChangeSource::Mutation,
            key,
            old_value,
            new_value: Some(value),
        });
    }

    pub fn state_delete(&self, scope: Scope, key: impl Into<String>) {
        let key = key.into();
        let old_value = self.state_get(scope, &key);
        if old_value.is_none() {
            return;
        }
        self.append(Event::StateChange {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id: None,
            scope,
            source: StateChangeSource::Mutation,
            key,
            old_value,
            new_value: None,
        });
    }

    /// Read-modify-write a key; `f` receives the current value (`None` if
    /// unset) and returns the new value.
    pub fn state_update(&self, scope: Scope, key: impl Into<String>, f: impl FnOnce(Option<&Value>) -> Value) {
        let key = key.into();
        let old_value = self.state_get(scope, &key);
        let new_value = f(old_value.as_ref());
        self.append(Event::StateChange {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id: None,
            scope,
            source: StateChangeSource::Mutation,
            key,
            old_value,
            new_value: Some(new_value),
        });
    }

    /// Copy-on-handoff: snapshot `temp` scope, to be merged into a child
    /// invocation's own session view (the child writes its own
    /// `state_change` events on top, it never shares the map).
    pub fn temp_snapshot(&self) -> HashMap<String, Value> {
        self.state_snapshot(Scope::Temp)
    }

    // ---- conversation / tool helpers ----

    pub fn add_message(&self, text: impl Into<String>, invocation_id: Option<InvocationId>) {
        self.append(Event::User {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            text: text.into(),
        });
    }

    /// Unblock a pending yield by injecting externally-provided input.
    pub fn add_tool_input(&self, call_id: impl Into<String>, input: Value) {
        self.append(Event::ToolInput {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id: None,
            call_id: call_id.into(),
            input,
        });
    }

    /// Direct result injection, bypassing tool execution entirely. Used by
    /// test/eval harnesses to short-circuit a tool call.
    pub fn add_tool_result(&self, call_id: &str, result: Value) {
        let Some((invocation_id, agent_name)) = self.find_call_identity(call_id) else {
            return;
        };
        self.append(Event::ToolResult {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name,
            call_id: call_id.to_string(),
            outcome: gridloom_domain::event::ToolOutcome::Ok { result },
            duration_ms: 0,
            retry_count: None,
            timed_out: false,
        });
    }

    fn find_call_identity(&self, call_id: &str) -> Option<(InvocationId, String)> {
        self.inner.read().events.iter().find_map(|e| match e {
            Event::ToolCall {
                call_id: c,
                invocation_id,
                agent_name,
                ..
            } if c == call_id => Some((*invocation_id, agent_name.clone())),
            _ => None,
        })
    }

    /// Flat list of tool_call events whose yield has not yet been
    /// resolved with a `tool_result` (§4.1).
    pub fn pending_yielding_calls(&self) -> Vec<Event> {
        let inner = self.inner.read();
        let resolved: HashSet<&str> = inner
            .events
            .iter()
            .filter_map(|e| match e {
                Event::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        inner
            .events
            .iter()
            .filter(|e| matches!(e, Event::ToolCall { yields: true, .. }))
            .filter(|e| match e {
                Event::ToolCall { call_id, .. } => !resolved.contains(call_id.as_str()),
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Derived session status (§4.1). Built by folding the invocation
    /// tree; cheap enough to recompute on demand rather than cache.
    pub fn status(&self) -> SessionStatus {
        let tree = crate::tree::InvocationTree::build(&self.events());
        let Some(root) = tree.root() else {
            return SessionStatus::Active;
        };
        let has_unresolved_yield = tree.nodes().values().any(|node| {
            node.state == crate::tree::InvocationState::Yielded
                && node.pending_call_ids.iter().any(|cid| {
                    !self.events().iter().any(|e| matches!(e, Event::ToolInput { call_id, .. } if call_id == cid))
                })
        });
        if has_unresolved_yield {
            return SessionStatus::AwaitingInput;
        }
        match root.state {
            crate::tree::InvocationState::Completed => SessionStatus::Completed,
            crate::tree::InvocationState::Error => SessionStatus::Error,
            _ => SessionStatus::Active,
        }
    }

    /// Deep-copy producing an isolated session that shares no mutable
    /// state with `self` — used to fan out `Parallel` branches. The clone
    /// has its own store handle (same underlying sink) but an
    /// independent event vector; see §4.3 join semantics for how a
    /// branch's tail is folded back into the parent afterward.
    pub fn clone_for_branch(&self) -> Session {
        let inner = self.inner.read();
        let cloned = Inner {
            session_id: inner.session_id.clone(),
            events: inner.events.clone(),
            seen_ids: inner.seen_ids.clone(),
            state: inner.state.clone(),
        };
        Session {
            inner: Arc::new(RwLock::new(cloned)),
            store: self.store.clone(),
        }
    }

    /// Events appended after `baseline_index` — a branch's "tail", used to
    /// fold per-branch work back into the parent ledger on join.
    pub fn tail_since(&self, baseline_index: usize) -> Vec<Event> {
        self.inner.read().events[baseline_index..].to_vec()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridloom_domain::event::InvocationEndReason;

    fn mk_event_id() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn append_is_idempotent_on_id() {
        let session = Session::new();
        let id = mk_event_id();
        let ev = Event::User {
            id,
            created_at: chrono::Utc::now(),
            invocation_id: None,
            text: "hi".into(),
        };
        session.append(ev.clone());
        session.append(ev);
        assert_eq!(session.event_count(), 1);
    }

    #[test]
    fn state_set_then_get_roundtrips() {
        let session = Session::new();
        session.state_set(Scope::Session, "k", serde_json::json!(42));
        assert_eq!(session.state_get(Scope::Session, "k"), Some(serde_json::json!(42)));
    }

    #[test]
    fn state_update_sees_prior_value() {
        let session = Session::new();
        session.state_set(Scope::Temp, "counter", serde_json::json!(1));
        session.state_update(Scope::Temp, "counter", |old| {
            let n = old.and_then(|v| v.as_i64()).unwrap_or(0);
            serde_json::json!(n + 1)
        });
        assert_eq!(session.state_get(Scope::Temp, "counter"), Some(serde_json::json!(2)));
    }

    #[test]
    fn stream_only_events_are_never_persisted() {
        let session = Session::new();
        session.append(Event::AssistantDelta {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id: Uuid::new_v4(),
            agent_name: "a".into(),
            delta: "tok".into(),
        });
        assert_eq!(session.event_count(), 0);
    }

    #[test]
    fn clone_for_branch_is_isolated() {
        let session = Session::new();
        session.add_message("hi", None);
        let branch = session.clone_for_branch();
        branch.add_message("branch only", None);
        assert_eq!(session.event_count(), 1);
        assert_eq!(branch.event_count(), 2);
    }

    #[test]
    fn tail_since_returns_only_new_events() {
        let session = Session::new();
        session.add_message("one", None);
        let baseline = session.event_count();
        session.add_message("two", None);
        session.add_message("three", None);
        assert_eq!(session.tail_since(baseline).len(), 2);
    }

    #[test]
    fn status_completed_when_root_invocation_ends_completed() {
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        session.append(Event::InvocationStart {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "root".into(),
            parent_invocation_id: None,
            kind: gridloom_domain::event::InvocationKind::Agent,
            handoff_origin: None,
            fingerprint: "fp".into(),
        });
        session.append(Event::InvocationEnd {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "root".into(),
            reason: InvocationEndReason::Completed,
            handoff_target: None,
        });
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    #[test]
    fn status_awaiting_input_when_yield_unresolved() {
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        session.append(Event::InvocationStart {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "root".into(),
            parent_invocation_id: None,
            kind: gridloom_domain::event::InvocationKind::Agent,
            handoff_origin: None,
            fingerprint: "fp".into(),
        });
        session.append(Event::InvocationYield {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "root".into(),
            pending_call_ids: vec!["call-1".into()],
            yield_index: 0,
            awaiting_input: false,
        });
        assert_eq!(session.status(), SessionStatus::AwaitingInput);
    }

    #[test]
    fn pending_yielding_calls_excludes_resolved() {
        let session = Session::new();
        let invocation_id = Uuid::new_v4();
        session.append(Event::ToolCall {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "a".into(),
            call_id: "c1".into(),
            name: "approve".into(),
            args: serde_json::json!({}),
            yields: true,
        });
        assert_eq!(session.pending_yielding_calls().len(), 1);
        session.append(Event::ToolResult {
            id: mk_event_id(),
            created_at: chrono::Utc::now(),
            invocation_id,
            agent_name: "a".into(),
            call_id: "c1".into(),
            outcome: gridloom_domain::event::ToolOutcome::Ok {
                result: serde_json::json!({"approved": true}),
            },
            duration_ms: 5,
            retry_count: None,
            timed_out: false,
        });
        assert_eq!(session.pending_yielding_calls().len(), 0);
    }
}
