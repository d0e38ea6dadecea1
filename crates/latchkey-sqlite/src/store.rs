//! Session store backed by SQLite.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, trace};
use zeroize::Zeroizing;

use latchkey::{SessionRecord, SessionState, SessionStore};

use crate::config::SqliteConfig;
use crate::error::{Result, SqliteStoreError};

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

const SELECT_LIVE: &str =
    "SELECT data, created_at, expires_at FROM sessions WHERE id = ?1 AND expires_at > ?2";

// An existing row keeps its created_at.
const UPSERT: &str = r#"
    INSERT INTO sessions (id, data, created_at, expires_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(id) DO UPDATE SET
        data = excluded.data,
        expires_at = excluded.expires_at
"#;

const DELETE: &str = "DELETE FROM sessions WHERE id = ?1";

const DELETE_EXPIRED: &str = "DELETE FROM sessions WHERE expires_at <= ?1";

/// Session store backed by a single SQLite connection.
///
/// Timestamps are stored as Unix milliseconds and empty sessions as `NULL`
/// data. Every query runs on the blocking pool; the connection mutex
/// serializes writers.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("open", &self.conn.lock().is_some())
            .finish()
    }
}

impl SqliteStore {
    /// Open or create a store.
    ///
    /// Creates the database file, its parent directory, and the schema as
    /// needed.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
                )?
            }
            None => Connection::open_in_memory()?,
        };

        initialize(&conn, &config)?;

        match &config.path {
            Some(path) => info!("Session store opened at {:?}", path),
            None => info!("In-memory session store created"),
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::in_memory())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(SqliteStoreError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| SqliteStoreError::Task(e.to_string()))?
    }
}

fn initialize(conn: &Connection, config: &SqliteConfig) -> Result<()> {
    conn.busy_timeout(config.busy_timeout)?;
    if config.wal && config.path.is_some() {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    let current_version: i32 =
        conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current_version >= SCHEMA_VERSION {
        debug!("Schema up to date (version {})", current_version);
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            data BLOB,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_expires_at
            ON sessions(expires_at);
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    info!("Schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SqliteStoreError::InvalidData(format!("timestamp out of range: {ms}")))
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, id: &str) -> latchkey::Result<Option<SessionRecord>> {
        let key = id.to_string();
        let now = Utc::now().timestamp_millis();
        let row = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(SELECT_LIVE)?;
                let row = stmt
                    .query_row(params![key, now], |row| {
                        Ok((
                            row.get::<_, Option<Vec<u8>>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((data, created_at, expires_at)) = row else {
            trace!("Session not found in SQLite store");
            return Ok(None);
        };
        let data = Zeroizing::new(data.unwrap_or_default());
        Ok(Some(SessionRecord {
            id: id.to_string(),
            values: latchkey::payload::decode(&data)?,
            created_at: from_millis(created_at)?,
            expires_at: from_millis(expires_at)?,
        }))
    }

    async fn save(&self, session: &SessionState) -> latchkey::Result<()> {
        let payload = session.payload()?;
        let data = (!payload.is_empty()).then(|| Zeroizing::new(payload.to_vec()));
        drop(payload);

        let id = session.id().to_string();
        let created_at = session.created_at().timestamp_millis();
        let expires_at = session.expires_at().timestamp_millis();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(UPSERT)?;
            stmt.execute(params![
                id,
                data.as_ref().map(|d| d.as_slice()),
                created_at,
                expires_at
            ])?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> latchkey::Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(DELETE)?.execute(params![id])?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn cleanup(&self) -> latchkey::Result<usize> {
        let now = Utc::now().timestamp_millis();
        let removed = self
            .with_conn(move |conn| Ok(conn.prepare_cached(DELETE_EXPIRED)?.execute(params![now])?))
            .await?;
        debug!(removed, "Removed expired sessions from SQLite store");
        Ok(removed)
    }

    async fn close(&self) -> latchkey::Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let Some(conn) = conn.lock().take() else {
                return Ok(());
            };
            conn.close().map_err(|(_, e)| SqliteStoreError::Database(e))?;
            info!("Session store closed");
            Ok::<_, SqliteStoreError>(())
        })
        .await
        .map_err(|e| SqliteStoreError::Task(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    const ID: &str = "0123456789abcdef0123456789abcdef";

    fn state(id: &str, values: serde_json::Value, ttl: TimeDelta) -> SessionState {
        let now = Utc::now();
        let values = match values {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        SessionState::from(SessionRecord {
            id: id.to_string(),
            values,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    fn raw_data(store: &SqliteStore, id: &str) -> Option<Option<Vec<u8>>> {
        let guard = store.conn.lock();
        let conn = guard.as_ref().unwrap();
        conn.query_row("SELECT data FROM sessions WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = state(ID, json!({"user_id": 42, "name": "ada"}), TimeDelta::hours(1));

        store.save(&session).await.unwrap();
        let record = store.get(ID).await.unwrap().unwrap();

        assert_eq!(record.id, ID);
        assert_eq!(&record.values, session.values());
        assert_eq!(
            record.expires_at.timestamp_millis(),
            session.expires_at().timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_session_stores_null() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(&state(ID, json!({}), TimeDelta::hours(1)))
            .await
            .unwrap();

        assert_eq!(raw_data(&store, ID), Some(None));
        let record = store.get(ID).await.unwrap().unwrap();
        assert!(record.values.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = state(ID, json!({"n": 1}), TimeDelta::hours(1));
        store.save(&first).await.unwrap();

        let mut record = store.get(ID).await.unwrap().unwrap();
        let original_created = record.created_at;
        record.created_at = original_created + TimeDelta::minutes(5);
        record.expires_at = Utc::now() + TimeDelta::hours(2);
        record.values.insert("n".to_string(), json!(2));
        store.save(&SessionState::from(record)).await.unwrap();

        let updated = store.get(ID).await.unwrap().unwrap();
        assert_eq!(updated.created_at, original_created);
        assert_eq!(updated.values["n"], json!(2));
        assert!(updated.expires_at > Utc::now() + TimeDelta::minutes(90));
    }

    #[tokio::test]
    async fn test_expired_rows_are_hidden_and_swept() {
        let store = SqliteStore::open_in_memory().unwrap();
        let live = "11111111111111111111111111111111";
        store
            .save(&state(ID, json!({"n": 1}), TimeDelta::seconds(-1)))
            .await
            .unwrap();
        store
            .save(&state(live, json!({"n": 2}), TimeDelta::hours(1)))
            .await
            .unwrap();

        assert!(store.get(ID).await.unwrap().is_none());
        assert!(raw_data(&store, ID).is_some());

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(raw_data(&store, ID).is_none());
        assert!(store.get(live).await.unwrap().is_some());
        assert_eq!(store.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(&state(ID, json!({"n": 1}), TimeDelta::hours(1)))
            .await
            .unwrap();

        store.delete(ID).await.unwrap();
        store.delete(ID).await.unwrap();
        assert!(store.get(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.get(ID).await, Err(latchkey::Error::Closed)));
        assert!(matches!(store.cleanup().await, Err(latchkey::Error::Closed)));
    }

    #[test]
    fn test_open_rejects_non_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        std::fs::write(&path, "this is not a sqlite database\n".repeat(64)).unwrap();

        let result = SqliteStore::open(SqliteConfig::new(&path).with_wal(false));
        assert!(matches!(result, Err(SqliteStoreError::Database(_))));
        // The file was not overwritten with a fresh schema.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("this is not a sqlite database"));
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        drop(SqliteStore::open(SqliteConfig::new(&path)).unwrap());

        let store = SqliteStore::open(SqliteConfig::new(&path)).unwrap();
        let guard = store.conn.lock();
        let version: i32 = guard
            .as_ref()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_schema_version_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let guard = store.conn.lock();
        let version: i32 = guard
            .as_ref()
            .unwrap()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
