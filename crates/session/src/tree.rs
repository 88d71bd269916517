//! Invocation tree reconstruction (§3.3): a deterministic projection of
//! the event ledger, rebuilt on demand rather than maintained
//! incrementally, so it is always consistent with whatever the ledger
//! currently contains (including mid-resume).

use std::collections::HashMap;

use gridloom_domain::event::{Event, InvocationEndReason, InvocationId, InvocationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Running,
    Yielded,
    Completed,
    Error,
    Aborted,
    MaxSteps,
    Transferred,
}

/// What is known about a single `call_id` within an invocation: the call
/// itself, its yield (if it yielded), the externally-injected input (if
/// resolved), and its result (if finished).
#[derive(Debug, Clone, Default)]
pub struct CallRecord {
    pub call: Option<Event>,
    pub yield_: Option<Event>,
    pub input: Option<Event>,
    pub result: Option<Event>,
}

#[derive(Debug, Clone)]
pub struct InvocationNode {
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub kind: InvocationKind,
    pub parent_invocation_id: Option<InvocationId>,
    pub fingerprint: String,
    pub state: InvocationState,
    pub pending_call_ids: Vec<String>,
    pub yield_index: u32,
    pub calls: HashMap<String, CallRecord>,
    /// Children in the order their `invocation_start` was observed.
    pub children: Vec<InvocationId>,
}

/// A deterministic projection of the ledger's `invocation_*` and
/// `tool_*` events into a tree, rooted at the invocation with no parent.
pub struct InvocationTree {
    nodes: HashMap<InvocationId, InvocationNode>,
    root_id: Option<InvocationId>,
}

impl InvocationTree {
    pub fn build(events: &[Event]) -> Self {
        let mut nodes: HashMap<InvocationId, InvocationNode> = HashMap::new();
        let mut root_id = None;
        let mut order: Vec<InvocationId> = Vec::new();

        for event in events {
            match event {
                Event::InvocationStart {
                    invocation_id,
                    agent_name,
                    parent_invocation_id,
                    kind,
                    fingerprint,
                    ..
                } => {
                    order.push(*invocation_id);
                    if parent_invocation_id.is_none() && root_id.is_none() {
                        root_id = Some(*invocation_id);
                    }
                    nodes.insert(
                        *invocation_id,
                        InvocationNode {
                            invocation_id: *invocation_id,
                            agent_name: agent_name.clone(),
                            kind: *kind,
                            parent_invocation_id: *parent_invocation_id,
                            fingerprint: fingerprint.clone(),
                            state: InvocationState::Running,
                            pending_call_ids: Vec::new(),
                            yield_index: 0,
                            calls: HashMap::new(),
                            children: Vec::new(),
                        },
                    );
                    if let Some(parent) = parent_invocation_id {
                        if let Some(parent_node) = nodes.get_mut(parent) {
                            parent_node.children.push(*invocation_id);
                        }
                    }
                }
                Event::InvocationYield {
                    invocation_id,
                    pending_call_ids,
                    yield_index,
                    ..
                } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.state = InvocationState::Yielded;
                        node.pending_call_ids = pending_call_ids.clone();
                        node.yield_index = *yield_index;
                    }
                }
                Event::InvocationResume { invocation_id, .. } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.state = InvocationState::Running;
                        node.pending_call_ids.clear();
                    }
                }
                Event::InvocationEnd {
                    invocation_id,
                    reason,
                    ..
                } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.state = match reason {
                            InvocationEndReason::Completed => InvocationState::Completed,
                            InvocationEndReason::Error => InvocationState::Error,
                            InvocationEndReason::Aborted => InvocationState::Aborted,
                            InvocationEndReason::Transferred => InvocationState::Transferred,
                            InvocationEndReason::MaxSteps => InvocationState::MaxSteps,
                        };
                        node.pending_call_ids.clear();
                    }
                }
                Event::ToolCall {
                    invocation_id,
                    call_id,
                    ..
                } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.calls.entry(call_id.clone()).or_default().call = Some(event.clone());
                    }
                }
                Event::ToolYield {
                    invocation_id,
                    call_id,
                    ..
                } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.calls.entry(call_id.clone()).or_default().yield_ = Some(event.clone());
                    }
                }
                Event::ToolInput { call_id, .. } => {
                    for node in nodes.values_mut() {
                        if let Some(record) = node.calls.get_mut(call_id) {
                            record.input = Some(event.clone());
                        }
                    }
                }
                Event::ToolResult {
                    invocation_id,
                    call_id,
                    ..
                } => {
                    if let Some(node) = nodes.get_mut(invocation_id) {
                        node.calls.entry(call_id.clone()).or_default().result = Some(event.clone());
                    }
                }
                _ => {}
            }
        }

        Self { nodes, root_id }
    }

    pub fn root(&self) -> Option<&InvocationNode> {
        self.root_id.and_then(|id| self.nodes.get(&id))
    }

    pub fn root_id(&self) -> Option<InvocationId> {
        self.root_id
    }

    pub fn get(&self, id: InvocationId) -> Option<&InvocationNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> &HashMap<InvocationId, InvocationNode> {
        &self.nodes
    }

    /// All nodes currently in the `Yielded` state, in the order they were
    /// first observed (insertion order of the underlying map is not
    /// guaranteed, so callers that need ordering should sort by
    /// `yield_index` or walk from the root).
    pub fn yielded_nodes(&self) -> Vec<&InvocationNode> {
        self.nodes.values().filter(|n| n.state == InvocationState::Yielded).collect()
    }
}
