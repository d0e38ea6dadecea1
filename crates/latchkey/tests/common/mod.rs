//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::header::{COOKIE, SET_COOKIE};
use http::{Request, Response};
use parking_lot::Mutex;

use latchkey::{Error, MemoryStore, Result, SessionRecord, SessionState, SessionStore};

/// A [`MemoryStore`] wrapper with fault injection and call accounting.
#[derive(Default)]
pub struct TestStore {
    pub inner: MemoryStore,
    pub fail_save: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_close: AtomicBool,
    pub stall_get: AtomicBool,
    /// Serve records as if they expired an hour ago.
    pub serve_expired: AtomicBool,
    pub gets: AtomicUsize,
    pub saves: AtomicUsize,
    pub deletes: AtomicUsize,
    pub closes: AtomicUsize,
    /// Payload bytes seen by each successful save.
    pub payloads: Mutex<Vec<Vec<u8>>>,
    /// Whether each save was handed a manager-encoded payload.
    pub used_cache: Mutex<Vec<bool>>,
    pub requested_ids: Mutex<Vec<String>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for TestStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.requested_ids.lock().push(id.to_string());
        if self.stall_get.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let record = self.inner.get(id).await?;
        if self.serve_expired.load(Ordering::SeqCst) {
            return Ok(record.map(|mut r| {
                r.expires_at = Utc::now() - chrono::Duration::hours(1);
                r
            }));
        }
        Ok(record)
    }

    async fn save(&self, session: &SessionState) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Error::Store("save refused".to_string()));
        }
        self.used_cache.lock().push(session.encoded().is_some());
        self.payloads.lock().push(session.payload()?.to_vec());
        self.inner.save(session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::Store("backend unreachable".to_string()));
        }
        self.inner.delete(id).await
    }

    async fn cleanup(&self) -> Result<usize> {
        self.inner.cleanup().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Store("close refused".to_string()));
        }
        self.inner.close().await
    }
}

/// A request without cookies.
pub fn request() -> Request<()> {
    Request::builder().uri("/").body(()).unwrap()
}

/// A request carrying `name=value`.
pub fn request_with_cookie(name: &str, value: &str) -> Request<()> {
    Request::builder()
        .uri("/")
        .header(COOKIE, format!("{name}={value}"))
        .body(())
        .unwrap()
}

pub fn response() -> Response<()> {
    Response::new(())
}

/// All `Set-Cookie` headers on the response.
pub fn set_cookies(res: &Response<()>) -> Vec<String> {
    res.headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// The value of the single `Set-Cookie` for `name`.
pub fn cookie_value(res: &Response<()>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    let matching: Vec<String> = set_cookies(res)
        .into_iter()
        .filter(|c| c.starts_with(&prefix))
        .collect();
    assert!(matching.len() <= 1, "multiple cookies named {name}: {matching:?}");
    matching.first().map(|c| {
        c[prefix.len()..]
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string()
    })
}
