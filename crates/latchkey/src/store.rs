//! The persistence contract backends implement.
//!
//! This module decouples the manager from any particular storage medium. A
//! backend stores [`SessionRecord`]s keyed by session id; the manager never
//! persists anything except through [`SessionStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::codec::Values;
use crate::error::Result;
use crate::session::SessionState;

/// The durable form of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: String,

    /// Decoded session values.
    pub values: Values,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session expires.
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the record has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Trait for session persistence backends.
///
/// Every operation must be safe to call concurrently with every other, and
/// `get` must observe any `save` that completed before it started.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by id.
    ///
    /// Return `Ok(None)` if the session doesn't exist. Backends should not
    /// return expired records, but the manager re-checks expiry regardless.
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Insert or replace the session with `session.id()`.
    ///
    /// Implementations persist the values (preferably via
    /// [`SessionState::payload`], which reuses bytes the manager already
    /// encoded), `created_at`, and `expires_at`.
    async fn save(&self, session: &SessionState) -> Result<()>;

    /// Remove a session. Deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove every expired session, returning how many were removed.
    async fn cleanup(&self) -> Result<usize>;

    /// Release backend resources. Called once at shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        (**self).get(id).await
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        (**self).save(session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }

    async fn cleanup(&self) -> Result<usize> {
        (**self).cleanup().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
