//! Sync Cycle Tests
//!
//! Engine-level coverage for:
//! - Push phase error isolation and retry re-entry
//! - Pull-merge last-writer-wins, including ties and bad timestamps
//! - Queue retention under partial failure
//! - Connectivity-transition triggers and remote call timeouts

mod support;

use daylog_sync::protocol::server_ms;
use daylog_sync::{
    CycleKind, LocalStore, NetworkMonitor, QueueItem, RecordEnvelope, RemoteStore, ServerRecord,
    SyncCommand, SyncConfig, SyncEngine, SyncStatus, Table,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::{engine_setup, MockRemote};
use tokio::sync::{oneshot, Mutex};

fn pending_entry(owner: &str, date: &str, minutes: u32) -> RecordEnvelope {
    RecordEnvelope::new_pending(owner, json!({"entry_date": date, "quran_study": minutes}))
}

fn goal_record(id: &str, owner: &str, last_modified: i64, category: &str) -> RecordEnvelope {
    RecordEnvelope {
        id: id.to_string(),
        owner_id: owner.to_string(),
        fields: json!({
            "category": category,
            "target_value": 10,
            "target_period": "daily",
            "start_date": "2024-01-01",
            "is_active": true
        }),
        sync_status: SyncStatus::Pending,
        last_modified,
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
        updated_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

fn server_goal(id: &str, owner: &str, updated_at: &str, category: &str) -> ServerRecord {
    ServerRecord {
        id: id.to_string(),
        owner_id: owner.to_string(),
        fields: json!({
            "category": category,
            "target_value": 10,
            "target_period": "daily",
            "start_date": "2024-01-01",
            "is_active": true
        }),
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
        updated_at: updated_at.to_string(),
    }
}

#[tokio::test]
async fn test_offline_entry_syncs_after_connectivity_returns() {
    let remote = MockRemote::new();
    let (store, network, _engine, _dir) = engine_setup(remote.clone(), false, "u1");

    let entry = pending_entry("u1", "2024-01-01", 30);
    store.lock().await.put(Table::Entries, &entry).unwrap();
    assert_eq!(remote.total_calls(), 0);

    network.set_online(true);

    let mut synced = false;
    for _ in 0..200 {
        let fetched = store.lock().await.get(Table::Entries, &entry.id).unwrap();
        if fetched.map(|r| r.sync_status) == Some(SyncStatus::Synced) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced, "entry should be pushed after going online");
    assert_eq!(remote.record_count(Table::Entries), 1);
    assert_eq!(store.lock().await.queue_len().unwrap(), 0);
}

#[tokio::test]
async fn test_push_partial_failure_isolates_record() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let ok_a = pending_entry("u1", "2024-01-01", 10);
    let bad = pending_entry("u1", "2024-01-02", 20);
    let ok_b = pending_entry("u1", "2024-01-03", 30);
    {
        let mut store = store.lock().await;
        store.put(Table::Entries, &ok_a).unwrap();
        store.put(Table::Entries, &bad).unwrap();
        store.put(Table::Entries, &ok_b).unwrap();
    }
    remote.fail_push(&bad.id);

    let result = engine.force_sync(Some("u1")).await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].id.as_deref(), Some(bad.id.as_str()));
    assert_eq!(result.synced.entries, 2);
    assert_eq!(remote.record_count(Table::Entries), 2);

    let store = store.lock().await;
    for (id, expected) in [
        (&ok_a.id, SyncStatus::Synced),
        (&bad.id, SyncStatus::Error),
        (&ok_b.id, SyncStatus::Synced),
    ] {
        let fetched = store.get(Table::Entries, id).unwrap().unwrap();
        assert_eq!(fetched.sync_status, expected);
    }
}

#[tokio::test]
async fn test_pull_overwrites_older_local() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let local = goal_record("g1", "u1", server_ms("2024-01-01").unwrap(), "stale");
    store.lock().await.put(Table::Goals, &local).unwrap();
    remote.seed(
        Table::Goals,
        server_goal("g1", "u1", "2024-02-01T00:00:00Z", "fresh"),
    );

    let result = engine.force_sync(Some("u1")).await;
    assert!(result.success);

    let merged = store.lock().await.get(Table::Goals, "g1").unwrap().unwrap();
    assert_eq!(merged.fields["category"], "fresh");
    assert_eq!(merged.sync_status, SyncStatus::Synced);
    assert_eq!(merged.updated_at, "2024-02-01T00:00:00Z");
}

#[tokio::test]
async fn test_pull_tie_keeps_local() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let stamp = server_ms("2024-02-01T00:00:00Z").unwrap();
    let local = goal_record("g1", "u1", stamp, "local-edit");
    store.lock().await.put(Table::Goals, &local).unwrap();
    remote.seed(
        Table::Goals,
        server_goal("g1", "u1", "2024-02-01T00:00:00Z", "server-edit"),
    );

    let result = engine.force_sync(Some("u1")).await;
    assert!(result.success);

    // Equal stamps keep the local copy, and the push phase then delivers
    // it to the remote.
    let kept = store.lock().await.get(Table::Goals, "g1").unwrap().unwrap();
    assert_eq!(kept.fields["category"], "local-edit");
    assert_eq!(kept.sync_status, SyncStatus::Synced);
    let remote_copy = remote.get_record(Table::Goals, "g1").unwrap();
    assert_eq!(remote_copy.fields["category"], "local-edit");
}

#[tokio::test]
async fn test_pull_unparseable_timestamp_keeps_local() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let local = goal_record("g1", "u1", 1, "local-edit");
    store.lock().await.put(Table::Goals, &local).unwrap();
    remote.seed(
        Table::Goals,
        server_goal("g1", "u1", "not a timestamp", "server-edit"),
    );

    engine.force_sync(Some("u1")).await;

    let kept = store.lock().await.get(Table::Goals, "g1").unwrap().unwrap();
    assert_eq!(kept.fields["category"], "local-edit");
}

#[tokio::test]
async fn test_pull_inserts_unknown_record_as_synced() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    remote.seed(
        Table::Entries,
        ServerRecord {
            id: "e1".to_string(),
            owner_id: "u1".to_string(),
            fields: json!({"entry_date": "2024-01-05", "quran_study": 15}),
            created_at: "2024-01-05T00:00:00Z".to_string(),
            updated_at: "2024-01-05T00:00:00Z".to_string(),
        },
    );

    let result = engine.force_sync(Some("u1")).await;
    assert!(result.success);
    assert_eq!(result.synced.entries, 1);

    let store = store.lock().await;
    let inserted = store
        .get_by_key(Table::Entries, "u1", "2024-01-05")
        .unwrap()
        .unwrap();
    assert_eq!(inserted.id, "e1");
    assert_eq!(inserted.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_error_record_retries_on_next_full_cycle() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let entry = pending_entry("u1", "2024-01-01", 30);
    store.lock().await.put(Table::Entries, &entry).unwrap();
    remote.fail_push(&entry.id);

    let result = engine.force_sync(Some("u1")).await;
    assert!(!result.success);
    let failed = store.lock().await.get(Table::Entries, &entry.id).unwrap().unwrap();
    assert_eq!(failed.sync_status, SyncStatus::Error);

    remote.clear_failures();

    let result = engine.force_sync(Some("u1")).await;
    assert!(result.success);
    let recovered = store.lock().await.get(Table::Entries, &entry.id).unwrap().unwrap();
    assert_eq!(recovered.sync_status, SyncStatus::Synced);
    assert_eq!(remote.record_count(Table::Entries), 1);
}

#[tokio::test]
async fn test_queue_retained_until_error_free_cycle() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    remote.seed(
        Table::Goals,
        server_goal("doomed", "u1", "2024-01-01T00:00:00Z", "old"),
    );
    let failing = pending_entry("u1", "2024-01-01", 30);
    {
        let mut store = store.lock().await;
        store.put(Table::Entries, &failing).unwrap();
        store
            .enqueue(&QueueItem::delete(Table::Goals, "doomed"))
            .unwrap();
    }
    remote.fail_push(&failing.id);

    let result = engine.force_sync(Some("u1")).await;
    assert!(!result.success);
    // The deletion was attempted, but the queue survives the failed cycle.
    assert!(remote.remove_calls.load(Ordering::SeqCst) >= 1);
    assert!(remote.get_record(Table::Goals, "doomed").is_none());
    assert_eq!(store.lock().await.queue_len().unwrap(), 1);

    remote.clear_failures();

    let result = engine.force_sync(Some("u1")).await;
    assert!(result.success);
    assert_eq!(store.lock().await.queue_len().unwrap(), 0);
}

#[tokio::test]
async fn test_push_only_cycle_skips_pull() {
    let remote = MockRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(
        LocalStore::open(dir.path().join("cache.db")).unwrap(),
    ));
    let network = NetworkMonitor::new(true);
    let mut config = SyncConfig::new("u1");
    config.auto_sync = false;
    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let mut engine = SyncEngine::new(store.clone(), remote_dyn, network.clone(), config);
    let tx = engine.start();

    remote.seed(
        Table::Goals,
        server_goal("g1", "u1", "2024-02-01T00:00:00Z", "remote-only"),
    );
    let entry = pending_entry("u1", "2024-01-01", 30);
    store.lock().await.put(Table::Entries, &entry).unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(SyncCommand::Sync {
        kind: CycleKind::PushOnly,
        owner_id: None,
        reply: Some(reply_tx),
    })
    .await
    .unwrap();
    let result = reply_rx.await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced.entries, 1);
    assert_eq!(remote.pull_calls.load(Ordering::SeqCst), 0);
    // The remote-only goal is not merged by a push-only cycle.
    assert!(store.lock().await.get(Table::Goals, "g1").unwrap().is_none());
}

#[tokio::test]
async fn test_hung_remote_call_times_out_as_record_error() {
    let remote = MockRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(
        LocalStore::open(dir.path().join("cache.db")).unwrap(),
    ));
    let network = NetworkMonitor::new(true);
    let mut config = SyncConfig::new("u1");
    config.auto_sync = false;
    config.remote_timeout = Duration::from_millis(100);
    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let mut engine = SyncEngine::new(store.clone(), remote_dyn, network.clone(), config);
    engine.start();

    let entry = pending_entry("u1", "2024-01-01", 30);
    store.lock().await.put(Table::Entries, &entry).unwrap();
    remote.hang_push(&entry.id);

    let result = engine.force_sync(Some("u1")).await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    let stuck = store.lock().await.get(Table::Entries, &entry.id).unwrap().unwrap();
    assert_eq!(stuck.sync_status, SyncStatus::Error);
}

#[tokio::test]
async fn test_repeated_push_overwrites_instead_of_duplicating() {
    let remote = MockRemote::new();
    let (store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    let entry = pending_entry("u1", "2024-01-01", 30);
    store.lock().await.put(Table::Entries, &entry).unwrap();
    assert!(engine.force_sync(Some("u1")).await.success);

    // Edit the same record; the second push targets the same natural key.
    {
        let mut store = store.lock().await;
        let mut edited = store.get(Table::Entries, &entry.id).unwrap().unwrap();
        edited.fields["quran_study"] = json!(45);
        edited.sync_status = SyncStatus::Pending;
        store.put(Table::Entries, &edited).unwrap();
    }
    assert!(engine.force_sync(Some("u1")).await.success);

    assert_eq!(remote.record_count(Table::Entries), 1);
    let stored = remote.get_record(Table::Entries, &entry.id).unwrap();
    assert_eq!(stored.fields["quran_study"], 45);
}

#[tokio::test]
async fn test_last_sync_tracked_on_success() {
    let remote = MockRemote::new();
    let (_store, _network, engine, _dir) = engine_setup(remote.clone(), true, "u1");

    assert_eq!(engine.status().await.unwrap().last_sync, None);
    assert!(engine.force_sync(Some("u1")).await.success);
    assert!(engine.status().await.unwrap().last_sync.is_some());
}

#[tokio::test]
async fn test_force_sync_while_offline_is_skipped() {
    let remote = MockRemote::new();
    let (_store, _network, engine, _dir) = engine_setup(remote.clone(), false, "u1");

    let result = engine.force_sync(Some("u1")).await;
    assert!(!result.success);
    assert_eq!(remote.total_calls(), 0);
}
