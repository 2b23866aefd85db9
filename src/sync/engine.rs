//! Sync Engine
//!
//! Coordinates push and pull cycles between the local store and the
//! remote store, applies last-writer-wins conflict resolution, and tracks
//! in-flight state.
//!
//! Scheduling is a single-consumer loop: connectivity transitions, the
//! periodic timer, and caller requests all land on one task, which runs
//! at most one cycle at a time. Cycles are re-entrant and idempotent, so
//! a dropped trigger is caught by the next periodic or connectivity
//! trigger's re-scan.

use crate::protocol::{
    now_ms, server_ms, QueueAction, RecordEnvelope, ServerRecord, StatusSnapshot, SyncError,
    SyncErrorEntry, SyncResult, SyncStatus, Table,
};
use crate::remote::RemoteStore;
use crate::sync::network::NetworkMonitor;
use crate::sync::store::LocalStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 8;

/// Configuration for the sync engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Owner whose records full cycles pull. Empty skips the pull phase
    /// unless a trigger carries its own owner.
    pub owner_id: String,
    /// Interval between periodic full cycles.
    pub sync_interval: Duration,
    /// Per-call timeout for remote push/pull/remove calls.
    pub remote_timeout: Duration,
    /// Enable the periodic timer.
    pub auto_sync: bool,
}

impl SyncConfig {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Default::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner_id: String::new(),
            sync_interval: Duration::from_secs(300),
            remote_timeout: Duration::from_secs(30),
            auto_sync: true,
        }
    }
}

/// What a cycle does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Send local pending changes only.
    PushOnly,
    /// Pull and merge remote records, then push.
    Full,
}

/// Commands accepted by the engine loop.
#[derive(Debug)]
pub enum SyncCommand {
    Sync {
        kind: CycleKind,
        owner_id: Option<String>,
        reply: Option<oneshot::Sender<SyncResult>>,
    },
    Stop,
}

#[derive(Debug, Default)]
struct EngineState {
    last_sync_at: Option<i64>,
}

pub struct SyncEngine {
    store: Arc<Mutex<LocalStore>>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    config: SyncConfig,
    state: Arc<RwLock<EngineState>>,
    is_syncing: Arc<RwLock<bool>>,
    command_tx: Option<mpsc::Sender<SyncCommand>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<Mutex<LocalStore>>,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            network,
            config,
            state: Arc::new(RwLock::new(EngineState::default())),
            is_syncing: Arc::new(RwLock::new(false)),
            command_tx: None,
        }
    }

    /// Start the scheduling loop. Subsequent triggers go through the
    /// returned channel (also reachable via [`SyncEngine::request_sync`]
    /// and [`SyncEngine::force_sync`]).
    pub fn start(&mut self) -> mpsc::Sender<SyncCommand> {
        let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
        self.command_tx = Some(tx.clone());

        let store = self.store.clone();
        let remote = self.remote.clone();
        let network = self.network.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let is_syncing = self.is_syncing.clone();
        // Subscribe before spawning so a transition arriving right after
        // start() is never missed.
        let mut online_rx = self.network.subscribe();

        tokio::spawn(async move {
            if let Ok(Some(at)) = store.lock().await.last_sync_at() {
                state.write().await.last_sync_at = Some(at);
            }

            let mut ticker = interval(config.sync_interval);
            // The first tick completes immediately; consume it so the
            // timer fires one full interval from startup.
            ticker.tick().await;

            let mut watch_alive = true;

            loop {
                tokio::select! {
                    _ = ticker.tick(), if config.auto_sync => {
                        if network.is_online() {
                            debug!("periodic sync");
                            Self::run_cycle(&store, &remote, &config, &state, &is_syncing, CycleKind::Full, None).await;
                        }
                    }

                    changed = online_rx.changed(), if watch_alive => {
                        match changed {
                            Ok(()) => {
                                if *online_rx.borrow_and_update() {
                                    info!("connectivity restored - running full sync");
                                    Self::run_cycle(&store, &remote, &config, &state, &is_syncing, CycleKind::Full, None).await;
                                } else {
                                    debug!("connectivity lost");
                                }
                            }
                            Err(_) => {
                                watch_alive = false;
                            }
                        }
                    }

                    cmd = rx.recv() => {
                        match cmd {
                            Some(SyncCommand::Sync { kind, owner_id, reply }) => {
                                let result = if network.is_online() {
                                    Self::run_cycle(&store, &remote, &config, &state, &is_syncing, kind, owner_id).await
                                } else {
                                    debug!("sync requested while offline - skipped");
                                    SyncResult::skipped("offline")
                                };
                                if let Some(reply) = reply {
                                    let _ = reply.send(result);
                                }
                            }
                            Some(SyncCommand::Stop) | None => {
                                info!("sync engine stopping");
                                break;
                            }
                        }
                    }
                }
            }
        });

        tx
    }

    /// Opportunistically request a cycle without blocking. The request is
    /// dropped when the command buffer is full; the next periodic or
    /// connectivity trigger re-scans and catches unfinished work.
    pub fn request_sync(&self, kind: CycleKind) {
        if let Some(tx) = &self.command_tx {
            let cmd = SyncCommand::Sync {
                kind,
                owner_id: None,
                reply: None,
            };
            if tx.try_send(cmd).is_err() {
                debug!("sync trigger dropped - engine busy");
            }
        }
    }

    /// Run a full cycle and wait for its result. `owner_id` overrides the
    /// configured owner for the pull phase.
    pub async fn force_sync(&self, owner_id: Option<&str>) -> SyncResult {
        let tx = match &self.command_tx {
            Some(tx) => tx,
            None => return SyncResult::skipped("sync engine not started"),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = SyncCommand::Sync {
            kind: CycleKind::Full,
            owner_id: owner_id.map(|o| o.to_string()),
            reply: Some(reply_tx),
        };
        if tx.send(cmd).await.is_err() {
            return SyncResult::skipped("sync engine stopped");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| SyncResult::skipped("sync engine stopped"))
    }

    pub async fn stop(&self) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(SyncCommand::Stop).await;
        }
    }

    pub async fn status(&self) -> Result<StatusSnapshot, SyncError> {
        let store = self.store.lock().await;
        let snapshot = StatusSnapshot {
            is_online: self.network.is_online(),
            sync_in_progress: *self.is_syncing.read().await,
            pending_entries: store.count_by_sync_status(Table::Entries, SyncStatus::Pending)?,
            pending_goals: store.count_by_sync_status(Table::Goals, SyncStatus::Pending)?,
            pending_profiles: store.count_by_sync_status(Table::Profiles, SyncStatus::Pending)?,
            last_sync: self.state.read().await.last_sync_at,
        };
        Ok(snapshot)
    }

    // === Cycle execution ===

    async fn run_cycle(
        store: &Arc<Mutex<LocalStore>>,
        remote: &Arc<dyn RemoteStore>,
        config: &SyncConfig,
        state: &Arc<RwLock<EngineState>>,
        is_syncing: &Arc<RwLock<bool>>,
        kind: CycleKind,
        owner_override: Option<String>,
    ) -> SyncResult {
        *is_syncing.write().await = true;

        let owner = owner_override.unwrap_or_else(|| config.owner_id.clone());
        let mut result = SyncResult::default();

        if kind == CycleKind::Full {
            // Once-failed records re-enter the pending scan on full
            // cycles; push-only cycles leave them for the periodic retry.
            {
                let mut store_guard = store.lock().await;
                for table in Table::ALL {
                    if let Err(e) = store_guard.mark_errors_pending(table) {
                        result.errors.push(SyncErrorEntry::table(
                            table,
                            format!("failed to requeue error records: {}", e),
                        ));
                    }
                }
            }

            if owner.is_empty() {
                debug!("no owner configured - skipping pull phase");
            } else {
                for table in Table::ALL {
                    let (pulled, mut errors) =
                        Self::pull_table(store, remote, config, table, &owner).await;
                    result.synced.add(table, pulled);
                    result.errors.append(&mut errors);
                }
            }
        }

        for table in Table::ALL {
            let (pushed, mut errors) = Self::push_table(store, remote, config, table).await;
            result.synced.add(table, pushed);
            result.errors.append(&mut errors);
        }

        let mut queue_errors = Self::push_queue(store, remote, config).await;
        result.errors.append(&mut queue_errors);

        result.success = result.errors.is_empty();
        if result.success {
            // At-least-once delivery: the queue only clears on an
            // error-free cycle, so unconfirmed changes are retried.
            let now = now_ms();
            let mut store_guard = store.lock().await;
            if let Err(e) = store_guard.clear_queue() {
                result
                    .errors
                    .push(SyncErrorEntry::cycle(format!("failed to clear queue: {}", e)));
                result.success = false;
            } else {
                if let Err(e) = store_guard.set_last_sync_at(now) {
                    debug!("failed to persist last sync stamp: {}", e);
                }
                drop(store_guard);
                state.write().await.last_sync_at = Some(now);
                info!(synced = result.synced.total(), "sync cycle complete");
            }
        } else {
            warn!(
                errors = result.errors.len(),
                synced = result.synced.total(),
                "sync cycle finished with errors"
            );
        }

        *is_syncing.write().await = false;
        result
    }

    /// Push every pending record of one table. Failures accumulate; the
    /// phase never aborts early on a single record.
    async fn push_table(
        store: &Arc<Mutex<LocalStore>>,
        remote: &Arc<dyn RemoteStore>,
        config: &SyncConfig,
        table: Table,
    ) -> (usize, Vec<SyncErrorEntry>) {
        let pending = match store
            .lock()
            .await
            .list_by_sync_status(table, SyncStatus::Pending)
        {
            Ok(pending) => pending,
            Err(e) => {
                return (
                    0,
                    vec![SyncErrorEntry::table(
                        table,
                        format!("failed to scan pending records: {}", e),
                    )],
                )
            }
        };
        if pending.is_empty() {
            return (0, vec![]);
        }

        debug!(table = %table, count = pending.len(), "pushing pending records");
        let mut synced = 0;
        let mut errors = Vec::new();

        for record in pending {
            let wire = record.to_server_record();
            let pushed =
                Self::with_timeout(config, "push", remote.push(table, &wire)).await;
            match pushed {
                Ok(stored) => {
                    match store
                        .lock()
                        .await
                        .mark_synced(table, &record.id, now_ms(), &stored.updated_at)
                    {
                        Ok(()) => synced += 1,
                        Err(e) => errors.push(SyncErrorEntry::record(
                            table,
                            &record.id,
                            format!("pushed but failed to mark synced: {}", e),
                        )),
                    }
                }
                Err(e) => {
                    warn!(table = %table, id = %record.id, "push failed: {}", e);
                    errors.push(SyncErrorEntry::record(table, &record.id, e.to_string()));
                    if let Err(mark) = store.lock().await.mark_error(table, &record.id) {
                        errors.push(SyncErrorEntry::record(
                            table,
                            &record.id,
                            format!("failed to mark error: {}", mark),
                        ));
                    }
                }
            }
        }

        (synced, errors)
    }

    /// Fetch all of the owner's records for one table and merge them in.
    async fn pull_table(
        store: &Arc<Mutex<LocalStore>>,
        remote: &Arc<dyn RemoteStore>,
        config: &SyncConfig,
        table: Table,
        owner_id: &str,
    ) -> (usize, Vec<SyncErrorEntry>) {
        let records =
            match Self::with_timeout(config, "pull", remote.pull(table, owner_id)).await {
                Ok(records) => records,
                Err(e) => {
                    return (
                        0,
                        vec![SyncErrorEntry::table(table, format!("pull failed: {}", e))],
                    )
                }
            };

        let mut merged = 0;
        let mut errors = Vec::new();

        for server in records {
            let id = server.id.clone();
            match Self::merge_record(store, table, server).await {
                Ok(()) => merged += 1,
                Err(e) => {
                    errors.push(SyncErrorEntry::record(table, &id, format!("merge failed: {}", e)))
                }
            }
        }

        (merged, errors)
    }

    /// Last-writer-wins by server authority. The server copy replaces the
    /// local one only when its timestamp strictly postdates the last local
    /// edit; ties and unparseable server stamps keep the local copy, which
    /// is assumed to hold a newer, not-yet-pushed edit.
    async fn merge_record(
        store: &Arc<Mutex<LocalStore>>,
        table: Table,
        server: ServerRecord,
    ) -> Result<(), SyncError> {
        let mut store = store.lock().await;

        let mut local = match table.business_key(&server.fields) {
            Some(bk) => store.get_by_key(table, &server.owner_id, &bk)?,
            None => None,
        };
        if local.is_none() {
            local = store.get(table, &server.id)?;
        }

        match local {
            None => store.put(table, &RecordEnvelope::from_server(server)),
            Some(existing) => {
                let server_stamp = server_ms(&server.updated_at);
                if server_stamp.map_or(false, |stamp| existing.last_modified < stamp) {
                    let merged = RecordEnvelope {
                        id: server.id,
                        owner_id: server.owner_id,
                        fields: server.fields,
                        sync_status: SyncStatus::Synced,
                        last_modified: now_ms(),
                        created_at: server.created_at,
                        updated_at: server.updated_at,
                    };
                    store.put(table, &merged)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Drain the durable change queue in FIFO order. The queue itself is
    /// only cleared by the caller once the whole cycle is error-free.
    async fn push_queue(
        store: &Arc<Mutex<LocalStore>>,
        remote: &Arc<dyn RemoteStore>,
        config: &SyncConfig,
    ) -> Vec<SyncErrorEntry> {
        let items = match store.lock().await.queued_items() {
            Ok(items) => items,
            Err(e) => {
                return vec![SyncErrorEntry::cycle(format!(
                    "failed to read change queue: {}",
                    e
                ))]
            }
        };
        if items.is_empty() {
            return vec![];
        }

        debug!(count = items.len(), "draining change queue");
        let mut errors = Vec::new();

        for item in items {
            let outcome = match item.action {
                QueueAction::Delete => match item.target_id() {
                    Some(id) => {
                        Self::with_timeout(config, "remove", remote.remove(item.table, id)).await
                    }
                    None => Err(SyncError::InvalidPayload(
                        "delete item without a target id".to_string(),
                    )),
                },
                QueueAction::Create | QueueAction::Update => match &item.payload {
                    Some(payload) => {
                        match serde_json::from_value::<ServerRecord>(payload.clone()) {
                            Ok(record) => Self::with_timeout(
                                config,
                                "push",
                                remote.push(item.table, &record),
                            )
                            .await
                            .map(|_| ()),
                            Err(e) => Err(SyncError::Serialization(e)),
                        }
                    }
                    None => Err(SyncError::InvalidPayload(
                        "change item without a payload".to_string(),
                    )),
                },
            };

            if let Err(e) = outcome {
                let target = item.target_id().unwrap_or(&item.id).to_string();
                warn!(table = %item.table, id = %target, "queued change failed: {}", e);
                errors.push(SyncErrorEntry::record(item.table, &target, e.to_string()));
            }
        }

        errors
    }

    async fn with_timeout<T>(
        config: &SyncConfig,
        what: &str,
        fut: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        match timeout(config.remote_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "{} exceeded {:?}",
                what, config.remote_timeout
            ))),
        }
    }
}
