//! Shared test support: an in-memory remote store with scriptable
//! failures, and setup helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use daylog_sync::{
    DataService, DataServiceBuilder, LocalStore, NetworkMonitor, RemoteStore, ServerRecord,
    SyncConfig, SyncEngine, SyncError, Table,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;

/// In-memory remote store. Upserts by the table's conflict key, so a
/// retried push overwrites instead of duplicating - the same contract the
/// real backend provides.
pub struct MockRemote {
    records: Mutex<HashMap<(Table, String), ServerRecord>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    pub push_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            push_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        })
    }

    fn conflict_key(table: Table, record: &ServerRecord) -> String {
        match table.business_key(&record.fields) {
            Some(bk) => format!("{}|{}", record.owner_id, bk),
            None => record.id.clone(),
        }
    }

    /// Place a record on the remote as-is, keeping its `updated_at`.
    pub fn seed(&self, table: Table, record: ServerRecord) {
        let key = Self::conflict_key(table, &record);
        self.records.lock().unwrap().insert((table, key), record);
    }

    /// Make pushes of the record with this id fail with a network error.
    pub fn fail_push(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Make pushes of the record with this id hang until cancelled.
    pub fn hang_push(&self, id: &str) {
        self.hanging.lock().unwrap().insert(id.to_string());
    }

    pub fn record_count(&self, table: Table) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| *t == table)
            .count()
    }

    pub fn get_record(&self, table: Table, id: &str) -> Option<ServerRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|((t, _), r)| *t == table && r.id == id)
            .map(|(_, r)| r.clone())
    }

    pub fn total_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
            + self.pull_calls.load(Ordering::SeqCst)
            + self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn push(&self, table: Table, record: &ServerRecord) -> Result<ServerRecord, SyncError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);

        let hang = self.hanging.lock().unwrap().contains(&record.id);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.lock().unwrap().contains(&record.id) {
            return Err(SyncError::Connection("simulated network error".to_string()));
        }

        let mut stored = record.clone();
        stored.updated_at = Utc::now().to_rfc3339();
        let key = Self::conflict_key(table, &stored);
        self.records
            .lock()
            .unwrap()
            .insert((table, key), stored.clone());
        Ok(stored)
    }

    async fn pull(&self, table: Table, owner_id: &str) -> Result<Vec<ServerRecord>, SyncError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), r)| *t == table && r.owner_id == owner_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn remove(&self, table: Table, id: &str) -> Result<(), SyncError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .retain(|(t, _), r| !(*t == table && r.id == id));
        Ok(())
    }
}

/// An engine over a fresh on-disk store, with the periodic timer off so
/// tests drive every cycle explicitly.
pub fn engine_setup(
    remote: Arc<MockRemote>,
    online: bool,
    owner: &str,
) -> (Arc<AsyncMutex<LocalStore>>, NetworkMonitor, SyncEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AsyncMutex::new(
        LocalStore::open(dir.path().join("cache.db")).unwrap(),
    ));
    let network = NetworkMonitor::new(online);

    let mut config = SyncConfig::new(owner);
    config.auto_sync = false;
    config.remote_timeout = Duration::from_secs(5);

    let remote: Arc<dyn RemoteStore> = remote;
    let mut engine = SyncEngine::new(store.clone(), remote, network.clone(), config);
    engine.start();
    (store, network, engine, dir)
}

/// A full data service over a fresh on-disk store and the mock remote.
pub async fn service_setup(
    remote: Arc<MockRemote>,
    online: bool,
    owner: &str,
) -> (DataService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let service = DataServiceBuilder::new(owner)
        .remote(remote)
        .store_path(dir.path().join("cache.db"))
        .auto_sync(false)
        .initially_online(online)
        .build()
        .await
        .unwrap();
    (service, dir)
}
