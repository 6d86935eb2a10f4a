//! Reference counting and poller notification tests
//!
//! These tests verify the start/stop protocol towards the poller pool:
//! - A server is announced once when its first monitor arrives
//! - A server is kicked once when its last monitor leaves
//! - Servers monitored at load time are announced on bind

use std::collections::HashSet;
use std::time::Duration;

use ping_store::{
    ServerEvents, Store, User,
    model::{Servers, Users},
    storage::memory::MemoryEngine,
    store::MIN_SERVER_CHANNEL_CAPACITY,
};
use pretty_assertions::assert_eq;

use super::helpers::*;

#[tokio::test]
async fn test_shared_server_is_announced_and_kicked_once() {
    let (store, mut events, _engine) = bind_memory_store().await;
    for name in ["alice", "bob", "carol"] {
        store.add_user(name, "pw").await.unwrap();
        store.add_monitor_server(name, "srv1").await.unwrap();
    }

    assert_eq!(drain(&mut events.add_servers), vec!["srv1"]);
    assert_eq!(store.monitored_servers().await, vec![("srv1".to_string(), 3)]);

    store.delete_monitor_server("alice", "srv1").await.unwrap();
    store.delete_monitor_server("bob", "srv1").await.unwrap();
    assert!(drain(&mut events.kick_servers).is_empty());
    assert_eq!(store.monitored_servers().await, vec![("srv1".to_string(), 1)]);

    store.delete_monitor_server("carol", "srv1").await.unwrap();
    assert_eq!(drain(&mut events.kick_servers), vec!["srv1"]);
    assert!(store.monitored_servers().await.is_empty());
}

#[tokio::test]
async fn test_repeated_delete_does_not_kick_again() {
    let (store, mut events, _engine) = bind_memory_store().await;
    store.add_user("alice", "pw").await.unwrap();
    store.add_user("bob", "pw").await.unwrap();
    store.add_monitor_server("alice", "srv1").await.unwrap();
    store.add_monitor_server("bob", "srv1").await.unwrap();

    store.delete_monitor_server("alice", "srv1").await.unwrap();
    store.delete_monitor_server("alice", "srv1").await.unwrap();

    // bob still monitors srv1
    assert!(drain(&mut events.kick_servers).is_empty());
    assert_eq!(store.monitored_servers().await, vec![("srv1".to_string(), 1)]);
}

#[tokio::test]
async fn test_server_is_announced_again_after_kick() {
    let (store, mut events, _engine) = bind_memory_store().await;
    store.add_user("alice", "pw").await.unwrap();

    store.add_monitor_server("alice", "srv1").await.unwrap();
    store.delete_monitor_server("alice", "srv1").await.unwrap();
    store.add_monitor_server("alice", "srv1").await.unwrap();

    assert_eq!(drain(&mut events.add_servers), vec!["srv1", "srv1"]);
    assert_eq!(drain(&mut events.kick_servers), vec!["srv1"]);
}

#[tokio::test]
async fn test_delete_persists_updated_monitor_set() {
    let (store, _events, engine) = bind_memory_store().await;
    store.add_user("alice", "pw").await.unwrap();
    store.add_monitor_server("alice", "srv1").await.unwrap();
    store.add_monitor_server("alice", "srv2").await.unwrap();

    store.delete_monitor_server("alice", "srv1").await.unwrap();

    let persisted = engine.persisted_user("alice").await.unwrap();
    assert_eq!(
        persisted.monitor_servers,
        HashSet::from(["srv2".to_string()])
    );
}

#[tokio::test]
async fn test_bind_announces_loaded_servers() {
    let mut alice = User::new("alice", "pw");
    alice.monitor_servers.insert("srv1".to_string());
    alice.monitor_servers.insert("srv2".to_string());
    let mut bob = User::new("bob", "pw");
    bob.monitor_servers.insert("srv2".to_string());

    let engine = MemoryEngine::with_records(
        Servers::new(),
        Users::from([("alice".to_string(), alice), ("bob".to_string(), bob)]),
    );
    let (store, mut events) = Store::bind(Box::new(engine), "").await.unwrap();

    let mut announced = drain(&mut events.add_servers);
    announced.sort();
    assert_eq!(announced, vec!["srv1", "srv2"]);
    assert_eq!(
        store.monitored_servers().await,
        vec![("srv1".to_string(), 1), ("srv2".to_string(), 2)]
    );

    // the loaded counts keep working: srv2 is only kicked after both leave
    store.delete_monitor_server("bob", "srv2").await.unwrap();
    assert!(drain(&mut events.kick_servers).is_empty());
    store.delete_monitor_server("alice", "srv2").await.unwrap();
    assert_eq!(drain(&mut events.kick_servers), vec!["srv2"]);
}

#[tokio::test]
async fn test_many_loaded_servers_do_not_block_bind() {
    let mut alice = User::new("alice", "pw");
    for i in 0..3000 {
        alice.monitor_servers.insert(format!("srv{i}"));
    }
    let engine = MemoryEngine::with_records(
        Servers::new(),
        Users::from([("alice".to_string(), alice)]),
    );

    let (_store, mut events) = Store::bind(Box::new(engine), "").await.unwrap();

    assert_eq!(drain(&mut events.add_servers).len(), 3000);
}

/// Bind a store whose add channel is already full from seeding
async fn bind_with_full_add_channel() -> (Store, ServerEvents) {
    let mut alice = User::new("alice", "pw");
    for i in 0..MIN_SERVER_CHANNEL_CAPACITY {
        alice.monitor_servers.insert(format!("srv{i}"));
    }
    let engine = MemoryEngine::with_records(
        Servers::new(),
        Users::from([("alice".to_string(), alice)]),
    );
    Store::bind(Box::new(engine), "").await.unwrap()
}

#[tokio::test]
async fn test_cancelled_subscription_on_full_channel_changes_nothing() {
    let (store, mut events) = bind_with_full_add_channel().await;

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        store.add_monitor_server("alice", "extra"),
    )
    .await;
    assert!(blocked.is_err(), "announce should wait for channel room");

    assert!(!store.get_user("alice").await.unwrap().is_monitoring("extra"));
    let monitored = store.monitored_servers().await;
    assert_eq!(monitored.len(), MIN_SERVER_CHANNEL_CAPACITY);
    assert!(monitored.iter().all(|(server, _)| server != "extra"));

    // once there is room the same call goes through and is announced
    events.add_servers.recv().await.unwrap();
    store.add_monitor_server("alice", "extra").await.unwrap();
    assert_eq!(drain(&mut events.add_servers).last().unwrap(), "extra");
    assert!(store.get_user("alice").await.unwrap().is_monitoring("extra"));
}

#[tokio::test]
async fn test_cancelled_unsubscription_on_full_channel_changes_nothing() {
    let (store, mut events) = bind_with_full_add_channel().await;
    drain(&mut events.add_servers);

    for i in 0..MIN_SERVER_CHANNEL_CAPACITY {
        store
            .delete_monitor_server("alice", &format!("srv{i}"))
            .await
            .unwrap();
    }
    store.add_monitor_server("alice", "extra").await.unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        store.delete_monitor_server("alice", "extra"),
    )
    .await;
    assert!(blocked.is_err(), "kick should wait for channel room");

    assert!(store.get_user("alice").await.unwrap().is_monitoring("extra"));
    assert_eq!(
        store.monitored_servers().await,
        vec![("extra".to_string(), 1)]
    );

    events.kick_servers.recv().await.unwrap();
    store.delete_monitor_server("alice", "extra").await.unwrap();
    assert_eq!(drain(&mut events.kick_servers).last().unwrap(), "extra");
    assert!(store.monitored_servers().await.is_empty());
}
