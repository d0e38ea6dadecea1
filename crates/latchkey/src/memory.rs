//! In-process session store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::codec;
use crate::error::{Error, Result};
use crate::session::SessionState;
use crate::store::{SessionRecord, SessionStore};

struct StoredSession {
    payload: Zeroizing<Vec<u8>>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A [`SessionStore`] that keeps encoded sessions in a process-local map.
///
/// Suitable for tests and single-process deployments. Records are stored in
/// encoded form, so values go through the same codec as any other backend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("sessions", &self.sessions.read().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Whether a record exists for `id`, expired or not.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.ensure_open()?;
        let sessions = self.sessions.read();
        let Some(stored) = sessions.get(id) else {
            return Ok(None);
        };
        if stored.expires_at <= Utc::now() {
            trace!("Stored session expired, treating as missing");
            return Ok(None);
        }
        Ok(Some(SessionRecord {
            id: id.to_string(),
            values: codec::decode(&stored.payload)?,
            created_at: stored.created_at,
            expires_at: stored.expires_at,
        }))
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        self.ensure_open()?;
        if session.expires_at() <= Utc::now() {
            // Writing an already-expired record would only resurrect it until cleanup.
            self.sessions.write().remove(session.id());
            return Ok(());
        }

        let payload = Zeroizing::new(session.payload()?.to_vec());
        let mut sessions = self.sessions.write();
        let created_at = sessions
            .get(session.id())
            .map(|existing| existing.created_at)
            .unwrap_or_else(|| session.created_at());
        sessions.insert(
            session.id().to_string(),
            StoredSession {
                payload,
                created_at,
                expires_at: session.expires_at(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.sessions.write().remove(id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(count = removed, "Cleaned up expired sessions");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.sessions.write().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use chrono::Duration;

    const ID: &str = "0123456789abcdef0123456789abcdef";

    fn session_expiring_in(delta: Duration) -> Session {
        let now = Utc::now();
        Session::new(ID.to_string(), now, now + delta)
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = MemoryStore::new();
        let session = session_expiring_in(Duration::hours(1));
        session.set("user_id", 42).await.unwrap();

        store.save(&*session.read().await).await.unwrap();

        let record = store.get(ID).await.unwrap().unwrap();
        assert_eq!(record.id, ID);
        assert_eq!(record.values.get("user_id"), Some(&serde_json::json!(42)));
        assert_eq!(record.expires_at, session.expires_at().await);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = MemoryStore::new();
        assert!(store.get(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_session_round_trips() {
        let store = MemoryStore::new();
        let session = session_expiring_in(Duration::hours(1));
        store.save(&*session.read().await).await.unwrap();

        let record = store.get(ID).await.unwrap().unwrap();
        assert!(record.values.is_empty());
    }

    #[tokio::test]
    async fn test_save_preserves_created_at() {
        let store = MemoryStore::new();
        let first = session_expiring_in(Duration::hours(1));
        store.save(&*first.read().await).await.unwrap();
        let original = first.created_at().await;

        let now = Utc::now() + Duration::minutes(5);
        let second = Session::new(ID.to_string(), now, now + Duration::hours(1));
        store.save(&*second.read().await).await.unwrap();

        let record = store.get(ID).await.unwrap().unwrap();
        assert_eq!(record.created_at, original);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let session = session_expiring_in(Duration::hours(1));
        store.save(&*session.read().await).await.unwrap();

        store.delete(ID).await.unwrap();
        store.delete(ID).await.unwrap();
        assert!(store.get(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_hidden_and_cleaned() {
        let store = MemoryStore::new();
        let live = Session::new(
            "ffffffffffffffffffffffffffffffff".to_string(),
            Utc::now(),
            Utc::now() + Duration::hours(1),
        );
        store.save(&*live.read().await).await.unwrap();

        // Bypass save's expiry guard to plant an expired record.
        store.sessions.write().insert(
            ID.to_string(),
            StoredSession {
                payload: Zeroizing::new(Vec::new()),
                created_at: Utc::now() - Duration::hours(2),
                expires_at: Utc::now() - Duration::hours(1),
            },
        );

        assert!(store.get(ID).await.unwrap().is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(ID));
    }

    #[tokio::test]
    async fn test_save_skips_expired_sessions() {
        let store = MemoryStore::new();
        let session = session_expiring_in(Duration::seconds(-1));
        store.save(&*session.read().await).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.get(ID).await, Err(Error::Closed)));
        assert!(matches!(store.delete(ID).await, Err(Error::Closed)));
    }
}
