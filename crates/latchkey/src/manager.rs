//! Session lifecycle manager.
//!
//! The manager reads the session token from the request cookie, loads and
//! persists sessions through a [`SessionStore`], and writes the session cookie
//! on the response. Security rules it enforces:
//!
//! - malformed tokens never reach the store, in either direction
//! - expired records are never handed out, whatever the store returns
//! - the serialized size cap is checked before any store write
//! - rotation fails closed: if the old record survives, the client is logged out
//! - destruction fails safe: the cookie is cleared before the store is touched

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::config::ManagerConfig;
use crate::cookies::CookieSettings;
use crate::error::{Error, Result};
use crate::id::{IdGenerator, is_valid_id};
use crate::pool::BufferPool;
use crate::reaper::Reaper;
use crate::session::{Session, SessionState};
use crate::store::SessionStore;
use crate::transport::{RequestContext, ResponseContext};

/// Issues, loads, saves, rotates, and destroys sessions.
///
/// Construction starts a background task that sweeps expired sessions from the
/// store; [`SessionManager::close`] stops it and closes the store. The manager
/// must be created inside a Tokio runtime.
pub struct SessionManager<S: SessionStore> {
    store: Arc<S>,
    config: ManagerConfig,
    ttl: TimeDelta,
    cookies: CookieSettings,
    ids: IdGenerator,
    buffers: BufferPool,
    reaper: Reaper,
    closed: AtomicBool,
    store_closed: tokio::sync::Mutex<bool>,
}

impl<S: SessionStore> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S: SessionStore + 'static> SessionManager<S> {
    /// Create a manager over `store`, drawing session ids from the OS CSPRNG.
    pub fn new(store: S, config: ManagerConfig) -> Result<Self> {
        Self::with_id_generator(store, config, IdGenerator::default())
    }

    /// Create a manager with a caller-supplied id generator.
    pub fn with_id_generator(store: S, config: ManagerConfig, ids: IdGenerator) -> Result<Self> {
        Self::with_resources(store, config, ids, BufferPool::default())
    }

    /// Create a manager with caller-supplied id generator and buffer pool.
    pub fn with_resources(
        store: S,
        mut config: ManagerConfig,
        ids: IdGenerator,
        buffers: BufferPool,
    ) -> Result<Self> {
        config.validate()?;
        config.secure = config.effective_secure();
        let ttl = TimeDelta::from_std(config.ttl)
            .map_err(|_| Error::InvalidConfig("ttl out of range".to_string()))?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::InvalidConfig(
                "session manager must be created inside a Tokio runtime".to_string(),
            ));
        }

        let store = Arc::new(store);
        let reaper = Reaper::spawn(
            Arc::clone(&store),
            config.cleanup_interval,
            config.cleanup_timeout,
        );
        let cookies = CookieSettings::from_config(&config);

        info!(
            cookie = %cookies.name(),
            ttl = ?config.ttl,
            cleanup_interval = ?config.cleanup_interval,
            "Session manager started"
        );

        Ok(Self {
            store,
            config,
            ttl,
            cookies,
            ids,
            buffers,
            reaper,
            closed: AtomicBool::new(false),
            store_closed: tokio::sync::Mutex::new(false),
        })
    }
}

impl<S: SessionStore> SessionManager<S> {
    /// The effective configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new, empty session with a fresh id.
    ///
    /// The session is not persisted until [`SessionManager::save`] is called.
    pub fn create(&self) -> Result<Session> {
        let id = self.ids.generate()?;
        let now = Utc::now();
        trace!("Created new session");
        Ok(Session::new(id, now, self.expiry_from(now)))
    }

    /// Load the session named by the request's cookie.
    ///
    /// A missing cookie, a malformed token, an unknown id, or an expired
    /// record all yield a fresh session. Store errors are returned.
    pub async fn load<R: RequestContext>(&self, req: &R) -> Result<Session> {
        self.ensure_open()?;

        let Some(token) = self.cookies.token(req) else {
            return self.create();
        };
        if !is_valid_id(&token) {
            debug!("Ignoring malformed session token");
            return self.create();
        }

        match self.call(self.store.get(&token)).await? {
            Some(record) if record.is_expired_at(Utc::now()) => {
                debug!("Store returned an expired session, issuing a new one");
                self.create()
            }
            Some(record) => Ok(Session::from_record(record)),
            None => {
                trace!("Session not found, issuing a new one");
                self.create()
            }
        }
    }

    /// Persist the session and refresh its cookie.
    ///
    /// The session is locked for the whole call, so concurrent mutations land
    /// either entirely before or entirely after the persisted snapshot. On
    /// error nothing is written to the response.
    pub async fn save<W, R>(&self, res: &mut W, req: &R, session: &Session) -> Result<()>
    where
        W: ResponseContext,
        R: RequestContext,
    {
        self.ensure_open()?;
        let mut state = session.write().await;
        self.save_locked(res, req, &mut state).await
    }

    /// Move the session to a new id, defeating session fixation.
    ///
    /// If saving under the new id fails, the old id is restored and nothing is
    /// written to the response. If the old record cannot be deleted, the new
    /// record is discarded, the cookie is cleared, and the deletion error is
    /// returned.
    pub async fn regenerate<W, R>(&self, res: &mut W, req: &R, session: &Session) -> Result<()>
    where
        W: ResponseContext,
        R: RequestContext,
    {
        self.ensure_open()?;
        let new_id = self.ids.generate()?;
        let mut state = session.write().await;
        let old_id = std::mem::replace(&mut state.id, new_id);

        if let Err(e) = self.save_locked(res, req, &mut state).await {
            state.id = old_id;
            return Err(e);
        }

        if !is_valid_id(&old_id) {
            debug!("Rotated session away from a malformed id");
            return Ok(());
        }

        if let Err(e) = self.call(self.store.delete(&old_id)).await {
            warn!(error = %e, "Failed to delete old session during rotation, logging client out");
            if let Err(cleanup) = self.call(self.store.delete(&state.id)).await {
                warn!(error = %cleanup, "Failed to discard rotated session");
            }
            self.cookies
                .write(res, &self.cookies.removal_cookie(self.cookies.is_secure(req)))?;
            return Err(e);
        }

        debug!("Session id rotated");
        Ok(())
    }

    /// Log the session out.
    ///
    /// The cookie is cleared and the in-memory values wiped before the store
    /// is asked to delete the record; a store error is still returned.
    pub async fn destroy<W, R>(&self, res: &mut W, req: &R, session: &Session) -> Result<()>
    where
        W: ResponseContext,
        R: RequestContext,
    {
        let cleared = self
            .cookies
            .write(res, &self.cookies.removal_cookie(self.cookies.is_secure(req)));

        let id = {
            let mut state = session.write().await;
            state.wipe();
            state.id.clone()
        };

        let deleted = if !is_valid_id(&id) {
            Ok(())
        } else if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            self.call(self.store.delete(&id)).await
        };
        if let Err(e) = &deleted {
            warn!(error = %e, "Failed to delete destroyed session from store");
        } else {
            debug!("Session destroyed");
        }

        cleared?;
        deleted
    }

    /// Stop the background sweep and close the store.
    ///
    /// The manager refuses new work from the first call on. If the store
    /// fails to close, the error is returned and the next call retries; once
    /// the store has closed, later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let mut store_closed = self.store_closed.lock().await;
        if *store_closed {
            return Ok(());
        }
        self.closed.store(true, Ordering::Release);
        self.reaper.shutdown().await;
        self.store.close().await?;
        *store_closed = true;
        info!("Session manager closed");
        Ok(())
    }

    async fn save_locked<W, R>(&self, res: &mut W, req: &R, state: &mut SessionState) -> Result<()>
    where
        W: ResponseContext,
        R: RequestContext,
    {
        if !is_valid_id(&state.id) {
            return Err(Error::InvalidSessionId);
        }

        state.expires_at = self.expiry_from(Utc::now());

        let limit = self.config.max_session_bytes;
        if limit > 0 && !state.values.is_empty() {
            let mut buf = self.buffers.checkout();
            codec::encode_into(&state.values, &mut buf)?;
            if buf.len() > limit {
                return Err(Error::SessionTooLarge {
                    size: buf.len(),
                    limit,
                });
            }
            state.encoded = Some(buf);
        }

        let saved = self.call(self.store.save(state)).await;
        state.encoded = None;
        saved?;

        let cookie = self.cookies.session_cookie(
            &state.id,
            state.expires_at,
            self.max_age_secs(),
            self.cookies.is_secure(req),
        );
        self.cookies.write(res, &cookie)
    }

    async fn call<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => op.await,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Cookie lifetime in whole seconds, rounded up so a sub-second ttl is
    /// not sent as `Max-Age=0`.
    fn max_age_secs(&self) -> i64 {
        let ttl = self.config.ttl;
        let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}
