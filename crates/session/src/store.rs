//! The `SessionStore` contract (§6.2): a pluggable, optional persistence
//! sink a `Session` can be wired to. The in-memory `Session` is always
//! authoritative — a store is never consulted for reads during a run,
//! only written to after each append batch, and read from once at
//! startup via `load`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use gridloom_domain::error::{Error, Result};
use gridloom_domain::event::Event;

/// A persisted view of a session's ledger at some point in time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub events: Vec<Event>,
    /// Index into `events` the store had already durably written before
    /// this snapshot, if the implementation tracks one (append-only
    /// stores like `JsonlSessionStore` use this to avoid rewriting
    /// already-flushed lines).
    #[serde(default)]
    pub cursor: Option<usize>,
}

pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Option<Snapshot>;
    fn commit(&self, snapshot: Snapshot);
}

/// An in-memory store, useful for tests and for a host that wants resume
/// support without touching disk.
#[derive(Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, session_id: &str) -> Option<Snapshot> {
        self.snapshots.read().get(session_id).cloned()
    }

    fn commit(&self, snapshot: Snapshot) {
        self.snapshots.write().insert(snapshot.session_id.clone(), snapshot);
    }
}

/// A JSONL-file-backed store: one `<session_id>.jsonl` file per session
/// under `base_dir`, each line a single serialized `Event`. Grounded
/// directly on the teacher's `sessions::transcript::TranscriptWriter`
/// append-only write pattern, generalized from free-text transcript
/// lines to full ledger events, and extended with a `load` that replays
/// the file back into a `Snapshot`.
///
/// `commit` only appends events past the snapshot's `cursor` (or, absent
/// a cursor, only those not yet on disk) so repeated commits of a
/// growing ledger don't rewrite the whole file each time.
pub struct JsonlSessionStore {
    base_dir: PathBuf,
    written: RwLock<HashMap<String, usize>>,
}

impl JsonlSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir,
            written: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    pub fn into_shared(self) -> Arc<dyn SessionStore> {
        Arc::new(self)
    }
}

impl SessionStore for JsonlSessionStore {
    fn load(&self, session_id: &str) -> Option<Snapshot> {
        let path = self.path_for(session_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed ledger line");
                }
            }
        }
        self.written.write().insert(session_id.to_string(), events.len());
        Some(Snapshot {
            session_id: session_id.to_string(),
            cursor: Some(events.len()),
            events,
        })
    }

    fn commit(&self, snapshot: Snapshot) {
        let already_written = self
            .written
            .read()
            .get(&snapshot.session_id)
            .copied()
            .unwrap_or(0);
        let new_events = &snapshot.events[already_written.min(snapshot.events.len())..];
        if new_events.is_empty() {
            return;
        }

        let mut buf = String::new();
        for event in new_events {
            match serde_json::to_string(event) {
                Ok(line) => {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize ledger event, skipping");
                }
            }
        }

        use std::io::Write;
        let path = self.path_for(&snapshot.session_id);
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(buf.as_bytes()) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to append to ledger file");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to open ledger file");
                return;
            }
        }

        self.written
            .write()
            .insert(snapshot.session_id, already_written + new_events.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_event() -> Event {
        Event::User {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            invocation_id: None,
            text: "hi".into(),
        }
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemorySessionStore::new();
        let snapshot = Snapshot {
            session_id: "s1".into(),
            events: vec![sample_event()],
            cursor: Some(1),
        };
        store.commit(snapshot);
        let loaded = store.load("s1").unwrap();
        assert_eq!(loaded.events.len(), 1);
    }

    #[test]
    fn in_memory_store_missing_session_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn jsonl_store_appends_only_new_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();

        let first = sample_event();
        store.commit(Snapshot {
            session_id: "s1".into(),
            events: vec![first.clone()],
            cursor: None,
        });
        store.commit(Snapshot {
            session_id: "s1".into(),
            events: vec![first, sample_event()],
            cursor: None,
        });

        let loaded = store.load("s1").unwrap();
        assert_eq!(loaded.events.len(), 2);
    }

    #[test]
    fn jsonl_store_load_missing_session_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();
        assert!(store.load("nope").is_none());
    }
}
