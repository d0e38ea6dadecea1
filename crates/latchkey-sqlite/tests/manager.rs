//! The session manager running on a file-backed SQLite store.

use std::time::Duration;

use http::header::{COOKIE, SET_COOKIE};
use http::{Request, Response};
use tempfile::TempDir;

use latchkey::{ManagerConfig, SessionManager, SessionStore};
use latchkey_sqlite::{SqliteConfig, SqliteStore};

fn request_with(id: &str) -> Request<()> {
    Request::builder()
        .uri("/")
        .header(COOKIE, format!("session_id={id}"))
        .body(())
        .unwrap()
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(SqliteConfig::new(dir.path().join("nested").join("sessions.db"))).unwrap()
}

#[tokio::test]
async fn test_sessions_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let id = {
        let mgr = SessionManager::new(open(&dir), ManagerConfig::default()).unwrap();
        let session = mgr.create().unwrap();
        session.set("user_id", 42).await.unwrap();
        let mut res = Response::new(());
        mgr.save(&mut res, &Request::new(()), &session).await.unwrap();
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 1);
        let id = session.id().await;
        mgr.close().await.unwrap();
        id
    };

    let mgr = SessionManager::new(open(&dir), ManagerConfig::default()).unwrap();
    let session = mgr.load(&request_with(&id)).await.unwrap();
    assert_eq!(session.id().await, id);
    assert_eq!(session.get::<i64>("user_id").await.unwrap(), Some(42));
    mgr.close().await.unwrap();
}

#[tokio::test]
async fn test_regenerate_and_destroy() {
    let dir = TempDir::new().unwrap();
    let mgr = SessionManager::new(open(&dir), ManagerConfig::default()).unwrap();

    let session = mgr.create().unwrap();
    session.set("role", "admin").await.unwrap();
    mgr.save(&mut Response::new(()), &Request::new(()), &session)
        .await
        .unwrap();
    let old_id = session.id().await;

    mgr.regenerate(&mut Response::new(()), &Request::new(()), &session)
        .await
        .unwrap();
    let new_id = session.id().await;
    assert!(mgr.store().get(&old_id).await.unwrap().is_none());
    assert!(mgr.store().get(&new_id).await.unwrap().is_some());

    mgr.destroy(&mut Response::new(()), &Request::new(()), &session)
        .await
        .unwrap();
    assert!(mgr.store().get(&new_id).await.unwrap().is_none());
    mgr.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_sessions_are_not_loaded() {
    let dir = TempDir::new().unwrap();
    let mgr = SessionManager::new(
        open(&dir),
        ManagerConfig::default().with_ttl(Duration::from_millis(100)),
    )
    .unwrap();

    let session = mgr.create().unwrap();
    session.set("n", 1).await.unwrap();
    mgr.save(&mut Response::new(()), &Request::new(()), &session)
        .await
        .unwrap();
    let id = session.id().await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let loaded = mgr.load(&request_with(&id)).await.unwrap();
    assert_ne!(loaded.id().await, id);
    assert_eq!(mgr.store().cleanup().await.unwrap(), 1);
    mgr.close().await.unwrap();
}

#[tokio::test]
async fn test_close_reaches_the_store() {
    let dir = TempDir::new().unwrap();
    let mgr = SessionManager::new(open(&dir), ManagerConfig::default()).unwrap();
    mgr.close().await.unwrap();

    assert!(matches!(
        mgr.store().cleanup().await,
        Err(latchkey::Error::Closed)
    ));
}
