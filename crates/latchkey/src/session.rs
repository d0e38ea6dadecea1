//! The in-memory session entity.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::{Zeroize, Zeroizing};

use crate::codec::{self, Values};
use crate::error::Result;
use crate::pool::PooledBuffer;
use crate::store::SessionRecord;

/// One user's server-side session.
///
/// All accessors go through an internal reader/writer lock, so a session can be
/// shared between request-handling tasks while the manager saves it. The
/// manager holds the write lock for the whole of a save, which keeps the
/// serialized snapshot and the persisted snapshot identical.
pub struct Session {
    state: RwLock<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_read() {
            Ok(state) => std::fmt::Debug::fmt(&*state, f),
            Err(_) => f.write_str("Session { <locked> }"),
        }
    }
}

impl Session {
    pub(crate) fn new(id: String, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            state: RwLock::new(SessionState {
                id,
                values: Values::new(),
                created_at,
                expires_at,
                encoded: None,
            }),
        }
    }

    pub(crate) fn from_record(record: SessionRecord) -> Self {
        Self {
            state: RwLock::new(record.into()),
        }
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().await
    }

    /// Lock the session for reading.
    pub async fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().await
    }

    /// The session identifier.
    pub async fn id(&self) -> String {
        self.state.read().await.id.clone()
    }

    /// When the session was first created.
    pub async fn created_at(&self) -> DateTime<Utc> {
        self.state.read().await.created_at
    }

    /// When the session expires unless saved again.
    pub async fn expires_at(&self) -> DateTime<Utc> {
        self.state.read().await.expires_at
    }

    /// Get a value, deserialized into `T`.
    ///
    /// Returns `Ok(None)` if the key is absent and an error if the stored value
    /// does not match `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let state = self.state.read().await;
        match state.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Get the raw JSON value stored under `key`.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        self.state.read().await.values.get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub async fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value).await;
        Ok(())
    }

    /// Store a raw JSON value under `key`.
    pub async fn set_value(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state.write().await;
        state.values.insert(key.into(), value);
        state.encoded = None;
    }

    /// Remove `key`, returning its value if it was present.
    pub async fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state.write().await;
        let removed = state.values.remove(key);
        state.encoded = None;
        removed
    }

    /// Whether `key` is present.
    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.read().await.values.contains_key(key)
    }

    /// Number of stored values.
    pub async fn len(&self) -> usize {
        self.state.read().await.values.len()
    }

    /// Whether the session holds no values.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.values.is_empty()
    }

    /// A copy of all stored values.
    pub async fn values(&self) -> Values {
        self.state.read().await.values.clone()
    }

    /// Wipe every value and the encoded payload cache.
    ///
    /// Used when a session is destroyed; string contents are zeroed before
    /// their memory is released.
    pub async fn clear(&self) {
        self.state.write().await.wipe();
    }
}

/// The locked contents of a [`Session`].
///
/// Backends receive this view when saving, so they see exactly the snapshot
/// the manager validated.
pub struct SessionState {
    pub(crate) id: String,
    pub(crate) values: Values,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) encoded: Option<PooledBuffer>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("values", &self.values.len())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl SessionState {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The payload cached by the manager during the current save, if any.
    pub fn encoded(&self) -> Option<&[u8]> {
        self.encoded.as_ref().map(|buf| buf.as_slice())
    }

    /// The encoded values, reusing the manager's cached payload when present.
    pub fn payload(&self) -> Result<Payload<'_>> {
        if let Some(cached) = self.encoded() {
            return Ok(Payload::Cached(cached));
        }
        let mut buf = Zeroizing::new(Vec::new());
        codec::encode_into(&self.values, &mut buf)?;
        Ok(Payload::Encoded(buf))
    }

    pub(crate) fn wipe(&mut self) {
        for (mut key, mut value) in self.values.drain() {
            key.zeroize();
            scrub(&mut value);
        }
        self.encoded = None;
    }
}

/// Build a detached state, for backends replaying stored records.
impl From<SessionRecord> for SessionState {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            values: record.values,
            created_at: record.created_at,
            expires_at: record.expires_at,
            encoded: None,
        }
    }
}

fn scrub(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(scrub),
        Value::Object(map) => map.values_mut().for_each(scrub),
        _ => {}
    }
}

/// Encoded session values handed to a backend.
pub enum Payload<'a> {
    /// Bytes already produced by the manager's size check.
    Cached(&'a [u8]),
    /// Bytes encoded on demand; wiped on drop.
    Encoded(Zeroizing<Vec<u8>>),
}

impl Deref for Payload<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Payload::Cached(bytes) => bytes,
            Payload::Encoded(buf) => buf.as_slice(),
        }
    }
}
