//! Failure scenario tests
//!
//! These tests verify behavior when the storage engine fails:
//! - Bind is refused when the engine cannot load
//! - Write errors reach the caller unchanged
//! - In-memory state keeps the change that failed to persist

use assert_matches::assert_matches;
use ping_store::{PingRet, Store, StoreError, storage::StorageError};
use pretty_assertions::assert_eq;

use super::helpers::*;

#[tokio::test]
async fn test_bind_fails_when_init_fails() {
    let engine = FlakyEngine {
        fail_init: true,
        ..Default::default()
    };

    let result = Store::bind(Box::new(engine), "").await;

    assert_matches!(
        result,
        Err(StoreError::Persistence(StorageError::ConnectionFailed(_)))
    );
}

#[tokio::test]
async fn test_user_write_failure_is_returned() {
    let engine = FlakyEngine::default();
    let (store, _events) = Store::bind(Box::new(engine.clone()), "").await.unwrap();

    engine.set_failing(true);
    let err = store.add_user("alice", "pw").await.unwrap_err();
    assert_matches!(err, StoreError::Persistence(StorageError::BackendError(_)));

    // memory kept the user, the engine never saw it
    assert!(store.get_user("alice").await.is_some());
    assert!(engine.inner.persisted_user("alice").await.is_none());

    // once the engine recovers the next write carries the full record
    engine.set_failing(false);
    store.add_monitor_server("alice", "srv1").await.unwrap();
    let persisted = engine.inner.persisted_user("alice").await.unwrap();
    assert!(persisted.is_monitoring("srv1"));
}

#[tokio::test]
async fn test_monitor_failure_still_notifies_poller() {
    let engine = FlakyEngine::default();
    let (store, mut events) = Store::bind(Box::new(engine.clone()), "").await.unwrap();
    store.add_user("alice", "pw").await.unwrap();

    engine.set_failing(true);
    let err = store.add_monitor_server("alice", "srv1").await.unwrap_err();
    assert_matches!(err, StoreError::Persistence(_));

    assert_eq!(drain(&mut events.add_servers), vec!["srv1"]);
    assert_eq!(store.monitored_servers().await, vec![("srv1".to_string(), 1)]);
}

#[tokio::test]
async fn test_ping_write_failure_keeps_samples_in_memory() {
    let engine = FlakyEngine::default();
    let (store, _events) = Store::bind(Box::new(engine.clone()), "").await.unwrap();
    store.add_user("alice", "pw").await.unwrap();
    store.add_monitor_server("alice", "srv1").await.unwrap();

    engine.set_failing(true);
    let err = store
        .append_ping_ret("srv1", "eu", PingRet::new("t1", "10"))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Persistence(_));

    let result = store.get_monitor_result("alice", "srv1").await.unwrap();
    assert_eq!(result["eu"], vec![PingRet::new("t1", "10")]);
    assert!(engine.inner.persisted_ping_rets("srv1", "eu").await.is_empty());
}

#[tokio::test]
async fn test_password_check_happens_before_write() {
    let engine = FlakyEngine::default();
    let (store, _events) = Store::bind(Box::new(engine.clone()), "").await.unwrap();
    store.add_user("alice", "pw").await.unwrap();

    engine.set_failing(true);
    let err = store
        .update_password("alice", "wrong", "new")
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::IncorrectPassword);
}
