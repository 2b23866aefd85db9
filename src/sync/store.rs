//! Local Store
//!
//! Durable, restart-surviving cache for records and the pending-change
//! queue, on SQLite. Storage availability is resolved once at
//! construction into a capability variant: a store opened against a real
//! database path is `Present`, a detached store is `Absent` and turns
//! every operation into a no-op returning an empty/default result. This
//! lets the rest of the engine run unmodified in execution contexts that
//! have no storage medium.

use crate::protocol::{
    now_ms, QueueAction, QueueItem, RecordEnvelope, SyncError, SyncStatus, Table,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

enum StorageCapability {
    Present(Connection),
    Absent,
}

pub struct LocalStore {
    capability: StorageCapability,
}

impl LocalStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        let mut store = Self {
            capability: StorageCapability::Present(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a store in the default location (user data directory).
    pub fn open_default(app_name: &str) -> Result<Self, SyncError> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
            })
            .join(app_name);

        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("cache.db");
        Self::open(db_path)
    }

    /// A store for execution contexts with no storage medium. Every
    /// operation is a no-op returning an empty/default result.
    pub fn detached() -> Self {
        Self {
            capability: StorageCapability::Absent,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.capability, StorageCapability::Absent)
    }

    fn init_schema(&mut self) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                business_key TEXT,
                data TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tbl, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_business_key
             ON records(tbl, owner_id, business_key)
             WHERE business_key IS NOT NULL",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_sync_status ON records(tbl, sync_status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_owner ON records(tbl, owner_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                tbl TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT,
                enqueued_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_order ON sync_queue(enqueued_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn map_record(row: &Row) -> rusqlite::Result<RecordEnvelope> {
        let data_str: String = row.get(2)?;
        let status: String = row.get(3)?;
        Ok(RecordEnvelope {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            fields: serde_json::from_str(&data_str).unwrap_or(Value::Null),
            sync_status: SyncStatus::parse(&status),
            last_modified: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    const RECORD_COLUMNS: &'static str =
        "id, owner_id, data, sync_status, last_modified, created_at, updated_at";

    // === Record operations ===

    /// Idempotent upsert: whole-record replacement, resolved against the
    /// table's natural key first and the id otherwise. No field-level
    /// merging happens at this layer.
    pub fn put(&mut self, table: Table, record: &RecordEnvelope) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        let business_key = table.business_key(&record.fields);
        let data = serde_json::to_string(&record.fields)?;

        let tx = conn.transaction()?;
        if let Some(bk) = &business_key {
            // A record arriving under a new id but the same natural key
            // replaces the old row.
            tx.execute(
                "DELETE FROM records
                 WHERE tbl = ?1 AND owner_id = ?2 AND business_key = ?3 AND id != ?4",
                params![table.as_str(), record.owner_id, bk, record.id],
            )?;
        }
        tx.execute(
            "INSERT INTO records (tbl, id, owner_id, business_key, data, sync_status, last_modified, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(tbl, id) DO UPDATE SET
             owner_id = excluded.owner_id,
             business_key = excluded.business_key,
             data = excluded.data,
             sync_status = excluded.sync_status,
             last_modified = excluded.last_modified,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at",
            params![
                table.as_str(),
                record.id,
                record.owner_id,
                business_key,
                data,
                record.sync_status.as_str(),
                record.last_modified,
                record.created_at,
                record.updated_at
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    pub fn get(&self, table: Table, id: &str) -> Result<Option<RecordEnvelope>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(None),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE tbl = ?1 AND id = ?2",
            Self::RECORD_COLUMNS
        ))?;
        let result = stmt
            .query_row(params![table.as_str(), id], Self::map_record)
            .optional()?;
        Ok(result)
    }

    /// Exact lookup by `(owner_id, business_key)`.
    pub fn get_by_key(
        &self,
        table: Table,
        owner_id: &str,
        business_key: &str,
    ) -> Result<Option<RecordEnvelope>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(None),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE tbl = ?1 AND owner_id = ?2 AND business_key = ?3",
            Self::RECORD_COLUMNS
        ))?;
        let result = stmt
            .query_row(
                params![table.as_str(), owner_id, business_key],
                Self::map_record,
            )
            .optional()?;
        Ok(result)
    }

    pub fn list_by_owner(
        &self,
        table: Table,
        owner_id: &str,
    ) -> Result<Vec<RecordEnvelope>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(vec![]),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE tbl = ?1 AND owner_id = ?2 ORDER BY id",
            Self::RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![table.as_str(), owner_id], Self::map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_by_sync_status(
        &self,
        table: Table,
        status: SyncStatus,
    ) -> Result<Vec<RecordEnvelope>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(vec![]),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE tbl = ?1 AND sync_status = ?2 ORDER BY last_modified",
            Self::RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![table.as_str(), status.as_str()], Self::map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_by_sync_status(
        &self,
        table: Table,
        status: SyncStatus,
    ) -> Result<usize, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(0),
        };

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE tbl = ?1 AND sync_status = ?2",
            params![table.as_str(), status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Record a successful push: the server confirmed this copy, and
    /// assigned `updated_at`.
    pub fn mark_synced(
        &mut self,
        table: Table,
        id: &str,
        last_modified: i64,
        updated_at: &str,
    ) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute(
            "UPDATE records SET sync_status = 'synced', last_modified = ?1, updated_at = ?2
             WHERE tbl = ?3 AND id = ?4",
            params![last_modified, updated_at, table.as_str(), id],
        )?;
        Ok(())
    }

    pub fn mark_error(&mut self, table: Table, id: &str) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute(
            "UPDATE records SET sync_status = 'error' WHERE tbl = ?1 AND id = ?2",
            params![table.as_str(), id],
        )?;
        Ok(())
    }

    /// Re-enter once-failed records into the pending scan. Returns how
    /// many were re-marked.
    pub fn mark_errors_pending(&mut self, table: Table) -> Result<usize, SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(0),
        };

        let changed = conn.execute(
            "UPDATE records SET sync_status = 'pending' WHERE tbl = ?1 AND sync_status = 'error'",
            params![table.as_str()],
        )?;
        Ok(changed)
    }

    /// Physically remove a record. Returns whether a row existed.
    pub fn delete(&mut self, table: Table, id: &str) -> Result<bool, SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(false),
        };

        let deleted = conn.execute(
            "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
            params![table.as_str(), id],
        )?;
        Ok(deleted > 0)
    }

    pub fn clear(&mut self) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute("DELETE FROM records", [])?;
        conn.execute("DELETE FROM sync_queue", [])?;
        conn.execute("DELETE FROM sync_metadata", [])?;
        Ok(())
    }

    /// Total number of cached records and queued changes.
    pub fn count(&self) -> Result<usize, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(0),
        };

        let records: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        let queued: i64 =
            conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok((records + queued) as usize)
    }

    // === Pending-change queue ===

    pub fn enqueue(&mut self, item: &QueueItem) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        let payload = item
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO sync_queue (id, tbl, action, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                item.id,
                item.table.as_str(),
                item.action.as_str(),
                payload,
                item.enqueued_at
            ],
        )?;
        Ok(())
    }

    /// All queued changes in FIFO order.
    pub fn queued_items(&self) -> Result<Vec<QueueItem>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(vec![]),
        };

        let mut stmt = conn.prepare(
            "SELECT id, tbl, action, payload, enqueued_at FROM sync_queue
             ORDER BY enqueued_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let tbl: String = row.get(1)?;
            let action: String = row.get(2)?;
            let payload: Option<String> = row.get(3)?;
            let enqueued_at: i64 = row.get(4)?;
            Ok((id, tbl, action, payload, enqueued_at))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, tbl, action, payload, enqueued_at) = row?;
            let table = match tbl.as_str() {
                "entries" => Table::Entries,
                "goals" => Table::Goals,
                "profiles" => Table::Profiles,
                _ => continue,
            };
            let action = match QueueAction::parse(&action) {
                Some(a) => a,
                None => continue,
            };
            items.push(QueueItem {
                id,
                table,
                action,
                payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                enqueued_at,
            });
        }
        Ok(items)
    }

    pub fn queue_len(&self) -> Result<usize, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(0),
        };

        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear_queue(&mut self) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute("DELETE FROM sync_queue", [])?;
        Ok(())
    }

    // === Metadata ===

    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), SyncError> {
        let conn = match &mut self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(()),
        };

        conn.execute(
            "INSERT INTO sync_metadata (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, SyncError> {
        let conn = match &self.capability {
            StorageCapability::Present(c) => c,
            StorageCapability::Absent => return Ok(None),
        };

        let mut stmt = conn.prepare("SELECT value FROM sync_metadata WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        Ok(result)
    }

    pub fn last_sync_at(&self) -> Result<Option<i64>, SyncError> {
        Ok(self
            .get_metadata("last_sync_at")?
            .and_then(|v| v.parse().ok()))
    }

    pub fn set_last_sync_at(&mut self, at: i64) -> Result<(), SyncError> {
        self.set_metadata("last_sync_at", &at.to_string())
    }
}
