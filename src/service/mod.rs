//! Data Service
//!
//! The façade consumers call for reads and writes. Every operation
//! resolves against the local store, so reads and writes keep working
//! offline; when online, reads first run a full sync cycle for freshness
//! and writes opportunistically kick a push-only cycle without blocking
//! on it.

mod builder;

pub use builder::DataServiceBuilder;

use crate::protocol::{
    DateRange, EntryFields, GoalFields, ProfileFields, QueueItem, RecordEnvelope, StatusSnapshot,
    SyncError, SyncResult, SyncStatus, Table,
};
use crate::protocol::{now_ms, now_rfc3339};
use crate::sync::engine::{CycleKind, SyncEngine};
use crate::sync::network::NetworkMonitor;
use crate::sync::store::LocalStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct DataService {
    store: Arc<Mutex<LocalStore>>,
    network: NetworkMonitor,
    engine: SyncEngine,
}

impl DataService {
    pub(crate) fn new(
        store: Arc<Mutex<LocalStore>>,
        network: NetworkMonitor,
        engine: SyncEngine,
    ) -> Self {
        Self {
            store,
            network,
            engine,
        }
    }

    // === Writes ===

    /// Save a new record: committed locally and immediately visible, with
    /// an opportunistic push-only sync when online. Never blocks on the
    /// network.
    pub async fn save(
        &self,
        table: Table,
        owner_id: &str,
        fields: Value,
    ) -> Result<RecordEnvelope, SyncError> {
        if !fields.is_object() {
            return Err(SyncError::InvalidPayload(
                "record fields must be a JSON object".to_string(),
            ));
        }

        let record = RecordEnvelope::new_pending(owner_id, fields);
        self.store.lock().await.put(table, &record)?;
        debug!(table = %table, id = %record.id, "record saved locally");

        if self.network.is_online() {
            self.engine.request_sync(CycleKind::PushOnly);
        }
        Ok(record)
    }

    pub async fn save_entry(
        &self,
        owner_id: &str,
        fields: EntryFields,
    ) -> Result<RecordEnvelope, SyncError> {
        self.save(Table::Entries, owner_id, serde_json::to_value(fields)?)
            .await
    }

    pub async fn save_goal(
        &self,
        owner_id: &str,
        fields: GoalFields,
    ) -> Result<RecordEnvelope, SyncError> {
        self.save(Table::Goals, owner_id, serde_json::to_value(fields)?)
            .await
    }

    pub async fn save_profile(
        &self,
        owner_id: &str,
        fields: ProfileFields,
    ) -> Result<RecordEnvelope, SyncError> {
        self.save(Table::Profiles, owner_id, serde_json::to_value(fields)?)
            .await
    }

    /// Apply a shallow patch to an existing record's domain fields.
    pub async fn update(
        &self,
        table: Table,
        id: &str,
        patch: Value,
    ) -> Result<RecordEnvelope, SyncError> {
        let patch = match patch {
            Value::Object(map) => map,
            _ => {
                return Err(SyncError::InvalidPayload(
                    "patch must be a JSON object".to_string(),
                ))
            }
        };

        let mut store = self.store.lock().await;
        let mut record = store
            .get(table, id)?
            .ok_or_else(|| SyncError::NotFound(format!("{} record {}", table, id)))?;

        if let Value::Object(fields) = &mut record.fields {
            for (key, value) in patch {
                fields.insert(key, value);
            }
        } else {
            record.fields = Value::Object(patch);
        }
        record.sync_status = SyncStatus::Pending;
        record.last_modified = now_ms();
        record.updated_at = now_rfc3339();

        store.put(table, &record)?;
        drop(store);
        debug!(table = %table, id = %id, "record updated locally");

        if self.network.is_online() {
            self.engine.request_sync(CycleKind::PushOnly);
        }
        Ok(record)
    }

    /// Remove a record locally and queue the deletion for the remote
    /// store. The queue item is the only trace of the deletion once the
    /// local row is gone.
    pub async fn delete(&self, table: Table, id: &str) -> Result<(), SyncError> {
        let mut store = self.store.lock().await;
        if store.is_detached() {
            return Ok(());
        }
        if !store.delete(table, id)? {
            return Err(SyncError::NotFound(format!("{} record {}", table, id)));
        }
        store.enqueue(&QueueItem::delete(table, id))?;
        drop(store);
        debug!(table = %table, id = %id, "record deleted locally, deletion queued");

        if self.network.is_online() {
            self.engine.request_sync(CycleKind::PushOnly);
        }
        Ok(())
    }

    // === Reads ===

    /// Point lookup by id. When online, a full sync cycle runs first so
    /// the local answer reflects the remote store; offline, the cached
    /// copy is returned as-is.
    pub async fn get(&self, table: Table, id: &str) -> Result<Option<RecordEnvelope>, SyncError> {
        self.refresh_if_online().await;
        self.store.lock().await.get(table, id)
    }

    /// Exact lookup by `(owner_id, business_key)`, e.g. owner plus entry
    /// date.
    pub async fn get_by_key(
        &self,
        table: Table,
        owner_id: &str,
        business_key: &str,
    ) -> Result<Option<RecordEnvelope>, SyncError> {
        self.refresh_if_online().await;
        self.store
            .lock()
            .await
            .get_by_key(table, owner_id, business_key)
    }

    /// List an owner's records, newest first. For entries an optional
    /// inclusive date range filters on the entry date after the merge.
    pub async fn list(
        &self,
        table: Table,
        owner_id: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<RecordEnvelope>, SyncError> {
        self.refresh_if_online().await;

        let mut records = self.store.lock().await.list_by_owner(table, owner_id)?;

        if let Some(range) = range {
            records.retain(|r| {
                table
                    .business_key(&r.fields)
                    .map_or(true, |date| range.contains(&date))
            });
        }

        match table {
            Table::Entries => records.sort_by(|a, b| {
                let a_key = table.business_key(&a.fields).unwrap_or_default();
                let b_key = table.business_key(&b.fields).unwrap_or_default();
                b_key.cmp(&a_key)
            }),
            Table::Goals | Table::Profiles => {
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at))
            }
        }

        Ok(records)
    }

    /// Goals currently in effect, newest first.
    pub async fn list_active_goals(
        &self,
        owner_id: &str,
    ) -> Result<Vec<RecordEnvelope>, SyncError> {
        let mut goals = self.list(Table::Goals, owner_id, None).await?;
        goals.retain(|g| {
            g.fields
                .get("is_active")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        });
        Ok(goals)
    }

    // === Sync ===

    /// Run a full pull+push cycle for the given owner and wait for it.
    pub async fn force_sync(&self, owner_id: &str) -> SyncResult {
        self.engine.force_sync(Some(owner_id)).await
    }

    pub async fn sync_status(&self) -> Result<StatusSnapshot, SyncError> {
        self.engine.status().await
    }

    /// Report a connectivity change observed by the embedding
    /// application.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    // === Utilities ===

    /// Drop every cached record, queued change, and sync stamp.
    pub async fn clear_local_data(&self) -> Result<(), SyncError> {
        self.store.lock().await.clear()
    }

    /// Total number of cached records and queued changes.
    pub async fn local_record_count(&self) -> Result<usize, SyncError> {
        self.store.lock().await.count()
    }

    async fn refresh_if_online(&self) {
        if self.network.is_online() {
            let result = self.engine.force_sync(None).await;
            if !result.success {
                warn!(errors = result.errors.len(), "sync before read failed");
            }
        }
    }
}
