//! Session state store.
//!
//! `StateStore` sits between the engine and a [`StateBackend`]. It hands out
//! [`SessionHandle`]s for graph runs and serializes every mutation per
//! session id with one async mutex per session, so unrelated sessions never
//! wait on each other.

mod memory;

pub use memory::MemoryBackend;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Result, SwitchyardError};
use crate::traits::StateBackend;
use crate::types::{SessionId, SessionState, Turn};

/// Per-session serialized access to a state backend.
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// A store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    fn lock_for(&self, sid: &SessionId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| SwitchyardError::State(e.to_string()))?;
        Ok(locks
            .entry(sid.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Drop the lock entry unless someone else still holds or awaits it.
    fn release_lock(&self, sid: &SessionId) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(sid).is_some_and(|l| Arc::strong_count(l) <= 1) {
                locks.remove(sid);
            }
        }
    }

    /// Load or create the session and take a snapshot for a run.
    pub async fn open(self: &Arc<Self>, sid: &SessionId) -> Result<SessionHandle> {
        let lock = self.lock_for(sid)?;
        let _guard = lock.lock().await;
        let snapshot = self.backend.load_or_create(sid).await?;
        debug!(
            session = %sid,
            turns = snapshot.transcript.len(),
            keys = snapshot.values.len(),
            "Session opened"
        );
        Ok(SessionHandle::new(self.clone(), snapshot))
    }

    /// Apply key/value writes for one session.
    pub async fn apply(&self, sid: &SessionId, values: Vec<(String, serde_json::Value)>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(sid)?;
        let _guard = lock.lock().await;
        let count = values.len();
        self.backend.set_values(sid, values).await?;
        debug!(session = %sid, count, "Session values applied");
        Ok(())
    }

    /// Append one turn to the session transcript.
    pub async fn append_turn(&self, sid: &SessionId, turn: Turn) -> Result<()> {
        let lock = self.lock_for(sid)?;
        let _guard = lock.lock().await;
        self.backend.append_turn(sid, turn).await
    }

    /// Current persisted state, if the session exists.
    pub async fn load(&self, sid: &SessionId) -> Result<Option<SessionState>> {
        self.backend.load(sid).await
    }

    /// Most recent turns, oldest first.
    pub async fn history(&self, sid: &SessionId, limit: usize) -> Result<Vec<Turn>> {
        self.backend.recent_turns(sid, limit).await
    }

    /// Delete a session explicitly.
    pub async fn delete(&self, sid: &SessionId) -> Result<bool> {
        let lock = self.lock_for(sid)?;
        let existed = {
            let _guard = lock.lock().await;
            self.backend.delete(sid).await?
        };
        drop(lock);
        self.release_lock(sid);
        if existed {
            info!(session = %sid, "Session deleted");
        }
        Ok(existed)
    }

    /// Evict sessions idle for longer than `ttl`. Returns how many were removed.
    pub async fn evict_idle(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SwitchyardError::Config(format!("invalid idle ttl: {}", e)))?;
        let cutoff = Utc::now() - ttl;
        let candidates = self.backend.idle_sessions(cutoff).await?;

        let mut evicted = 0;
        for sid in candidates {
            let lock = self.lock_for(&sid)?;
            let removed = {
                let _guard = lock.lock().await;
                // It may have been touched while we waited for the lock.
                match self.backend.load(&sid).await? {
                    Some(state) if state.last_access < cutoff => self.backend.delete(&sid).await?,
                    _ => false,
                }
            };
            drop(lock);
            if removed {
                self.release_lock(&sid);
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, "Evicted idle sessions");
        }
        Ok(evicted)
    }
}

/// A run's view of one session.
///
/// Reads resolve staged writes first, then writes committed earlier in the
/// same run, then the snapshot taken at `open`. Writes are staged until the
/// executor commits them at the end of a successful step.
pub struct SessionHandle {
    store: Arc<StateStore>,
    snapshot: SessionState,
    committed: BTreeMap<String, serde_json::Value>,
    staged: BTreeMap<String, serde_json::Value>,
}

impl SessionHandle {
    fn new(store: Arc<StateStore>, snapshot: SessionState) -> Self {
        Self {
            store,
            snapshot,
            committed: BTreeMap::new(),
            staged: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.snapshot.session_id
    }

    /// State as it was when the run started.
    pub fn snapshot(&self) -> &SessionState {
        &self.snapshot
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.snapshot.transcript
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.staged
            .get(key)
            .or_else(|| self.committed.get(key))
            .or_else(|| self.snapshot.values.get(key))
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.staged.insert(key.into(), value);
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Persist staged writes. Returns how many keys were written.
    pub async fn commit(&mut self) -> Result<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let values: Vec<(String, serde_json::Value)> = self
            .staged
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let count = values.len();
        self.store.apply(&self.snapshot.session_id, values).await?;
        self.committed.append(&mut self.staged);
        Ok(count)
    }

    /// Drop staged writes. Returns how many were discarded.
    pub fn discard(&mut self) -> usize {
        let count = self.staged.len();
        if count > 0 {
            warn!(session = %self.snapshot.session_id, count, "Discarding staged session writes");
        }
        self.staged.clear();
        count
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }
}
