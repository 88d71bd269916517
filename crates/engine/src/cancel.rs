//! Cooperative cancellation with hierarchical fan-out (§5).
//!
//! Grounded directly on the teacher's `runtime::cancel::{CancelToken,
//! CancelMap}`: a flat atomic flag plus a registry that cascades a
//! parent's cancellation to every child registered in its group. Here the
//! "session key" the teacher keyed groups by becomes an `InvocationId`,
//! since every `call`/`spawn` child is itself an invocation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use gridloom_adapter::CancelSignal;
use gridloom_domain::event::InvocationId;

/// A cancellation token that can be checked by the runner loop and
/// handed to a `ModelAdapter` as a `&dyn CancelSignal`.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: None,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// A child token derived from this one: cancelling the parent
    /// cancels the child, but cancelling the child does not propagate
    /// back up. Used for per-branch timeouts in `Parallel` (§4.3).
    pub fn child(&self) -> CancelToken {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal for CancelToken {
    fn is_cancelled(&self) -> bool {
        CancelToken::is_cancelled(self)
    }
}

/// Tracks active cancel tokens per invocation, with group support for
/// cascading parent→child cancellation (`call`/`spawn` register their
/// child invocation in the parent's group).
#[derive(Default)]
pub struct CancelGroup {
    tokens: Mutex<HashMap<InvocationId, CancelToken>>,
    groups: Mutex<HashMap<InvocationId, HashSet<InvocationId>>>,
}

impl CancelGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, invocation_id: InvocationId) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(invocation_id, token.clone());
        token
    }

    pub fn cancel(&self, invocation_id: InvocationId) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(&invocation_id) {
            token.cancel();
            true
        } else {
            false
        };
        if let Some(children) = self.groups.lock().get(&invocation_id) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(child_token) = tokens.get(child) {
                    child_token.cancel();
                }
            }
        }
        found
    }

    pub fn remove(&self, invocation_id: InvocationId) {
        self.tokens.lock().remove(&invocation_id);
        self.groups.lock().remove(&invocation_id);
    }

    pub fn add_to_group(&self, parent: InvocationId, child: InvocationId) {
        self.groups.lock().entry(parent).or_default().insert(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cascades_to_children() {
        let group = CancelGroup::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let parent_token = group.register(parent);
        let child_token = group.register(child);
        group.add_to_group(parent, child);

        group.cancel(parent);
        assert!(parent_token.is_cancelled());
        assert!(child_token.is_cancelled());
    }

    #[test]
    fn remove_is_idempotent() {
        let group = CancelGroup::new();
        let id = Uuid::new_v4();
        group.register(id);
        group.remove(id);
        group.remove(id);
        assert!(!group.cancel(id));
    }
}
