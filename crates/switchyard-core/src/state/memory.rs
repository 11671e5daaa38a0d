use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::{Result, SwitchyardError};
use crate::traits::StateBackend;
use crate::types::{SessionId, SessionState, Turn};

/// In-process state backend. Sessions are lost when the process exits.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<SessionId, SessionState>) -> T) -> Result<T> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| SwitchyardError::State(e.to_string()))?;
        Ok(f(&mut sessions))
    }

    pub fn len(&self) -> usize {
        self.with_sessions(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateBackend for MemoryBackend {
    fn load_or_create(&self, sid: &SessionId) -> BoxFuture<'_, Result<SessionState>> {
        let sid = sid.clone();
        Box::pin(async move {
            self.with_sessions(|s| {
                let state = s
                    .entry(sid.clone())
                    .or_insert_with(|| SessionState::new(sid));
                state.last_access = Utc::now();
                state.clone()
            })
        })
    }

    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<SessionState>>> {
        let sid = sid.clone();
        Box::pin(async move { self.with_sessions(|s| s.get(&sid).cloned()) })
    }

    fn set_values(
        &self,
        sid: &SessionId,
        values: Vec<(String, serde_json::Value)>,
    ) -> BoxFuture<'_, Result<()>> {
        let sid = sid.clone();
        Box::pin(async move {
            self.with_sessions(|s| {
                let state = s
                    .entry(sid.clone())
                    .or_insert_with(|| SessionState::new(sid));
                state.values.extend(values);
                state.last_access = Utc::now();
            })
        })
    }

    fn append_turn(&self, sid: &SessionId, turn: Turn) -> BoxFuture<'_, Result<()>> {
        let sid = sid.clone();
        Box::pin(async move {
            self.with_sessions(|s| {
                let state = s
                    .entry(sid.clone())
                    .or_insert_with(|| SessionState::new(sid));
                state.transcript.push(turn);
                state.last_access = Utc::now();
            })
        })
    }

    fn recent_turns(&self, sid: &SessionId, limit: usize) -> BoxFuture<'_, Result<Vec<Turn>>> {
        let sid = sid.clone();
        Box::pin(async move {
            self.with_sessions(|s| {
                s.get(&sid)
                    .map(|state| {
                        let start = state.transcript.len().saturating_sub(limit);
                        state.transcript[start..].to_vec()
                    })
                    .unwrap_or_default()
            })
        })
    }

    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let sid = sid.clone();
        Box::pin(async move { self.with_sessions(|s| s.remove(&sid).is_some()) })
    }

    fn idle_sessions(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<SessionId>>> {
        Box::pin(async move {
            self.with_sessions(|s| {
                s.values()
                    .filter(|state| state.last_access < cutoff)
                    .map(|state| state.session_id.clone())
                    .collect()
            })
        })
    }
}
