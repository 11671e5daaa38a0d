use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use switchyard_core::error::{Result, SwitchyardError};
use switchyard_core::traits::StateBackend;
use switchyard_core::types::{SessionId, SessionState, Turn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        last_access TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_last_access
        ON sessions(last_access);

    CREATE TABLE IF NOT EXISTS session_values (
        session_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (session_id, key)
    );

    CREATE TABLE IF NOT EXISTS turns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        query TEXT NOT NULL,
        domain TEXT NOT NULL,
        intent TEXT NOT NULL,
        response TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_turns_session
        ON turns(session_id, id);
";

/// SQLite-backed session state.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SwitchyardError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;

        debug!(path = %path.display(), "SQLite state backend opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| SwitchyardError::Database(e.to_string()))
    }
}

fn db(e: rusqlite::Error) -> SwitchyardError {
    SwitchyardError::Database(e.to_string())
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SwitchyardError::Database(format!("corrupt timestamp '{}': {}", s, e)))
}

fn ensure_session(conn: &Connection, sid: &str, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (session_id, created_at, last_access) VALUES (?1, ?2, ?2)
         ON CONFLICT(session_id) DO UPDATE SET last_access = excluded.last_access",
        params![sid, now],
    )
    .map_err(db)?;
    Ok(())
}

fn read_turns(conn: &Connection, sid: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn
        .prepare(
            "SELECT query, domain, intent, response, timestamp FROM (
                 SELECT id, query, domain, intent, response, timestamp FROM turns
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2
             ) ORDER BY id ASC",
        )
        .map_err(db)?;

    let rows = stmt
        .query_map(params![sid, limit], |row| {
            let query: String = row.get(0)?;
            let domain: String = row.get(1)?;
            let intent: String = row.get(2)?;
            let response: String = row.get(3)?;
            let timestamp: String = row.get(4)?;
            Ok((query, domain, intent, response, timestamp))
        })
        .map_err(db)?;

    let mut turns = Vec::new();
    for row in rows {
        let (query, domain, intent, response, timestamp) = row.map_err(db)?;
        turns.push(Turn {
            query,
            domain,
            intent,
            response: serde_json::from_str(&response).map_err(|e| {
                SwitchyardError::Database(format!("corrupt turn response: {}", e))
            })?,
            timestamp: parse_ts(&timestamp)?,
        });
    }
    Ok(turns)
}

fn read_state(conn: &Connection, sid: &SessionId) -> Result<Option<SessionState>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT created_at, last_access FROM sessions WHERE session_id = ?1",
            params![sid.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db)?;

    let Some((created_at, last_access)) = row else {
        return Ok(None);
    };

    let mut state = SessionState::new(sid.clone());
    state.created_at = parse_ts(&created_at)?;
    state.last_access = parse_ts(&last_access)?;

    let mut stmt = conn
        .prepare("SELECT key, value FROM session_values WHERE session_id = ?1")
        .map_err(db)?;
    let rows = stmt
        .query_map(params![sid.as_str()], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((key, value))
        })
        .map_err(db)?;
    for row in rows {
        let (key, value) = row.map_err(db)?;
        state.values.insert(key, serde_json::from_str(&value)?);
    }

    state.transcript = read_turns(conn, sid.as_str(), None)?;
    Ok(Some(state))
}

impl StateBackend for SqliteBackend {
    fn load_or_create(&self, sid: &SessionId) -> BoxFuture<'_, Result<SessionState>> {
        let sid = sid.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            ensure_session(&conn, sid.as_str(), &ts(Utc::now()))?;
            read_state(&conn, &sid)?.ok_or_else(|| {
                SwitchyardError::State(format!("session {} vanished after create", sid))
            })
        })
    }

    fn load(&self, sid: &SessionId) -> BoxFuture<'_, Result<Option<SessionState>>> {
        let sid = sid.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            read_state(&conn, &sid)
        })
    }

    fn set_values(
        &self,
        sid: &SessionId,
        values: Vec<(String, serde_json::Value)>,
    ) -> BoxFuture<'_, Result<()>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let encoded = values
                .into_iter()
                .map(|(k, v)| serde_json::to_string(&v).map(|v| (k, v)))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db)?;
            ensure_session(&tx, &sid, &ts(Utc::now()))?;
            for (key, value) in &encoded {
                tx.execute(
                    "INSERT INTO session_values (session_id, key, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value",
                    params![sid, key, value],
                )
                .map_err(db)?;
            }
            tx.commit().map_err(db)?;
            Ok(())
        })
    }

    fn append_turn(&self, sid: &SessionId, turn: Turn) -> BoxFuture<'_, Result<()>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let response = serde_json::to_string(&turn.response)?;
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db)?;
            ensure_session(&tx, &sid, &ts(Utc::now()))?;
            tx.execute(
                "INSERT INTO turns (session_id, query, domain, intent, response, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![sid, turn.query, turn.domain, turn.intent, response, ts(turn.timestamp)],
            )
            .map_err(db)?;
            tx.commit().map_err(db)?;
            Ok(())
        })
    }

    fn recent_turns(&self, sid: &SessionId, limit: usize) -> BoxFuture<'_, Result<Vec<Turn>>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            read_turns(&conn, &sid, Some(limit))
        })
    }

    fn delete(&self, sid: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let sid = sid.0.clone();
        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db)?;
            tx.execute("DELETE FROM session_values WHERE session_id = ?1", params![sid])
                .map_err(db)?;
            tx.execute("DELETE FROM turns WHERE session_id = ?1", params![sid])
                .map_err(db)?;
            let removed = tx
                .execute("DELETE FROM sessions WHERE session_id = ?1", params![sid])
                .map_err(db)?;
            tx.commit().map_err(db)?;
            Ok(removed > 0)
        })
    }

    fn idle_sessions(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<SessionId>>> {
        let cutoff = ts(cutoff);
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT session_id FROM sessions WHERE last_access < ?1")
                .map_err(db)?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get::<_, String>(0))
                .map_err(db)?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(SessionId(row.map_err(db)?));
            }
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use switchyard_core::state::StateStore;

    #[tokio::test]
    async fn test_load_or_create() {
        let backend = SqliteBackend::in_memory().unwrap();
        let sid = SessionId::new();
        assert!(backend.load(&sid).await.unwrap().is_none());

        let state = backend.load_or_create(&sid).await.unwrap();
        assert_eq!(state.session_id, sid);
        assert!(state.transcript.is_empty());
        assert!(backend.load(&sid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_values_and_turns() {
        let backend = SqliteBackend::in_memory().unwrap();
        let sid = SessionId::new();

        backend
            .set_values(&sid, vec![("name".into(), serde_json::json!("Ada"))])
            .await
            .unwrap();
        backend
            .set_values(&sid, vec![("name".into(), serde_json::json!({"first": "Ada"}))])
            .await
            .unwrap();
        for q in ["one", "two", "three"] {
            backend
                .append_turn(&sid, Turn::new(q, "hello", "greet", serde_json::json!({"reply": q})))
                .await
                .unwrap();
        }

        let state = backend.load(&sid).await.unwrap().unwrap();
        assert_eq!(state.get("name"), Some(&serde_json::json!({"first": "Ada"})));
        assert_eq!(state.transcript.len(), 3);
        assert_eq!(state.transcript[0].query, "one");

        let recent = backend.recent_turns(&sid, 2).await.unwrap();
        let queries: Vec<_> = recent.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["two", "three"]);
        assert_eq!(recent[1].response["reply"], "three");
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = SqliteBackend::in_memory().unwrap();
        let sid = SessionId::new();
        backend
            .append_turn(&sid, Turn::new("q", "d", "i", serde_json::json!({})))
            .await
            .unwrap();
        assert!(backend.delete(&sid).await.unwrap());
        assert!(!backend.delete(&sid).await.unwrap());
        assert!(backend.recent_turns(&sid, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_sessions() {
        let backend = SqliteBackend::in_memory().unwrap();
        let old = SessionId::from_string("old");
        backend.load_or_create(&old).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::milliseconds(5);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = SessionId::from_string("fresh");
        backend.load_or_create(&fresh).await.unwrap();

        let idle = backend.idle_sessions(cutoff).await.unwrap();
        assert_eq!(idle, vec![old]);
    }

    #[tokio::test]
    async fn test_corrupt_rows_are_errors() {
        let backend = SqliteBackend::in_memory().unwrap();
        let sid = SessionId::from_string("broken");
        backend
            .append_turn(&sid, Turn::new("q", "d", "i", serde_json::json!({})))
            .await
            .unwrap();

        backend
            .lock()
            .unwrap()
            .execute("UPDATE turns SET response = '{not json' WHERE session_id = 'broken'", [])
            .unwrap();
        let err = backend.recent_turns(&sid, 10).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::Database(ref m) if m.contains("response")));

        backend
            .lock()
            .unwrap()
            .execute("UPDATE sessions SET last_access = 'yesterday' WHERE session_id = 'broken'", [])
            .unwrap();
        let err = backend.load(&sid).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::Database(ref m) if m.contains("yesterday")));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let sid = SessionId::from_string("durable");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .set_values(&sid, vec![("count".into(), serde_json::json!(3))])
                .await
                .unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        let state = backend.load(&sid).await.unwrap().unwrap();
        assert_eq!(state.get("count"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_behind_state_store() {
        let store = Arc::new(StateStore::new(Arc::new(SqliteBackend::in_memory().unwrap())));
        let sid = SessionId::new();
        let mut handle = store.open(&sid).await.unwrap();
        handle.set("topic", serde_json::json!("rust"));
        assert_eq!(handle.commit().await.unwrap(), 1);

        let reopened = store.open(&sid).await.unwrap();
        assert_eq!(reopened.get("topic"), Some(&serde_json::json!("rust")));
    }
}
