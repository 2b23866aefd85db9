//! Record, queue, and sync result types shared across the client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// The logical tables kept in the local cache and mirrored remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Entries,
    Goals,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Entries, Table::Goals, Table::Profiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Entries => "entries",
            Table::Goals => "goals",
            Table::Profiles => "profiles",
        }
    }

    /// Column set the remote store upserts against.
    pub fn conflict_key(&self) -> &'static str {
        match self {
            Table::Entries => "owner_id,entry_date",
            Table::Goals | Table::Profiles => "id",
        }
    }

    /// Extract the business key from a record's domain fields, for tables
    /// that enforce uniqueness on `(owner_id, business_key)` rather than
    /// on `id` alone.
    pub fn business_key(&self, fields: &Value) -> Option<String> {
        match self {
            Table::Entries => fields
                .get("entry_date")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Table::Goals | Table::Profiles => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the local copy's latest edit has been confirmed by the remote
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    /// Parse a stored status tag. Unknown tags map to `Error` so a
    /// corrupted row re-enters the retry path instead of being lost.
    pub fn parse(tag: &str) -> SyncStatus {
        match tag {
            "pending" => SyncStatus::Pending,
            "synced" => SyncStatus::Synced,
            _ => SyncStatus::Error,
        }
    }
}

/// A locally cached record: domain fields plus the sync metadata owned by
/// the store and the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub id: String,
    pub owner_id: String,
    pub fields: Value,
    pub sync_status: SyncStatus,
    /// Epoch milliseconds of the last local edit, on the local clock.
    pub last_modified: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl RecordEnvelope {
    /// Build a freshly written record: new id, pending, stamped with the
    /// current local clock.
    pub fn new_pending(owner_id: &str, fields: Value) -> Self {
        let now = now_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            fields,
            sync_status: SyncStatus::Pending,
            last_modified: now_ms(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// The wire shape: client-only fields stripped before transmission.
    pub fn to_server_record(&self) -> ServerRecord {
        ServerRecord {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            fields: self.fields.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    /// A record first seen remotely, inserted locally as already synced.
    pub fn from_server(record: ServerRecord) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            fields: record.fields,
            sync_status: SyncStatus::Synced,
            last_modified: now_ms(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// The shape records take on the wire. `updated_at` is assigned by the
/// server on every upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub owner_id: String,
    pub fields: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// An intended remote change kept in the durable queue. A `Delete` item is
/// the only trace of a deletion once the local row is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub table: Table,
    pub action: QueueAction,
    pub payload: Option<Value>,
    pub enqueued_at: i64,
}

impl QueueItem {
    pub fn delete(table: Table, record_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table,
            action: QueueAction::Delete,
            payload: Some(serde_json::json!({ "id": record_id })),
            enqueued_at: now_ms(),
        }
    }

    /// The id of the record this item targets.
    pub fn target_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
}

impl QueueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Create => "create",
            QueueAction::Update => "update",
            QueueAction::Delete => "delete",
        }
    }

    pub fn parse(tag: &str) -> Option<QueueAction> {
        match tag {
            "create" => Some(QueueAction::Create),
            "update" => Some(QueueAction::Update),
            "delete" => Some(QueueAction::Delete),
            _ => None,
        }
    }
}

/// One failed step inside a sync cycle. `table`/`id` are absent for
/// failures that are not tied to a single record, such as a pull fetch
/// that failed wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncErrorEntry {
    pub table: Option<Table>,
    pub id: Option<String>,
    pub message: String,
}

impl SyncErrorEntry {
    pub fn record(table: Table, id: &str, message: impl Into<String>) -> Self {
        Self {
            table: Some(table),
            id: Some(id.to_string()),
            message: message.into(),
        }
    }

    pub fn table(table: Table, message: impl Into<String>) -> Self {
        Self {
            table: Some(table),
            id: None,
            message: message.into(),
        }
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self {
            table: None,
            id: None,
            message: message.into(),
        }
    }
}

/// Per-table record counts, used for sync result reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub entries: usize,
    pub goals: usize,
    pub profiles: usize,
}

impl TableCounts {
    pub fn add(&mut self, table: Table, n: usize) {
        match table {
            Table::Entries => self.entries += n,
            Table::Goals => self.goals += n,
            Table::Profiles => self.profiles += n,
        }
    }

    pub fn total(&self) -> usize {
        self.entries + self.goals + self.profiles
    }
}

/// Result of one sync cycle: pushed and pulled record counts summed, plus
/// every per-record error the cycle accumulated. `success` is true only
/// when the error list is empty.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    pub synced: TableCounts,
    pub errors: Vec<SyncErrorEntry>,
}

impl SyncResult {
    /// A cycle that could not run at all (offline, engine stopped).
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: false,
            synced: TableCounts::default(),
            errors: vec![SyncErrorEntry::cycle(message)],
        }
    }
}

/// Snapshot of the engine's state for an external status indicator.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_online: bool,
    pub sync_in_progress: bool,
    pub pending_entries: usize,
    pub pending_goals: usize,
    pub pending_profiles: usize,
    /// Epoch milliseconds of the last fully successful cycle.
    pub last_sync: Option<i64>,
}

/// Inclusive date range used to filter entry listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    pub fn contains(&self, date: &str) -> bool {
        date >= self.start.as_str() && date <= self.end.as_str()
    }
}

// === Domain field shapes ===

/// Daily activity counters. Minutes for study and work, repetitions for
/// exercise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFields {
    pub entry_date: String,
    #[serde(default)]
    pub quran_study: u32,
    #[serde(default)]
    pub quran_memorization: u32,
    #[serde(default)]
    pub hadith_study: u32,
    #[serde(default)]
    pub online_work: u32,
    #[serde(default)]
    pub offline_work: u32,
    #[serde(default)]
    pub skill_practice: u32,
    #[serde(default)]
    pub pull_ups: u32,
    #[serde(default)]
    pub push_ups: u32,
    #[serde(default)]
    pub squats: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalFields {
    pub category: String,
    pub target_value: u32,
    pub target_period: TargetPeriod,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPeriod {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(default)]
    pub full_name: Option<String>,
}

// === Clock helpers ===

/// Current local clock as epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current local clock as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Interpret a server-issued timestamp as epoch milliseconds. Accepts
/// RFC 3339 and bare dates; anything else yields `None`, which the merge
/// treats as older than any local edit.
pub fn server_ms(timestamp: &str) -> Option<i64> {
    if let Ok(t) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(t.timestamp_millis());
    }
    NaiveDate::parse_from_str(timestamp, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_business_key_extraction() {
        let fields = json!({"entry_date": "2024-01-01", "quran_study": 30});
        assert_eq!(
            Table::Entries.business_key(&fields),
            Some("2024-01-01".to_string())
        );
        assert_eq!(Table::Goals.business_key(&fields), None);
        assert_eq!(Table::Profiles.business_key(&fields), None);
    }

    #[test]
    fn test_server_ms_formats() {
        assert_eq!(
            server_ms("2024-02-01T00:00:00Z"),
            Some(1706745600000)
        );
        assert_eq!(server_ms("2024-02-01"), Some(1706745600000));
        assert_eq!(server_ms("not a timestamp"), None);
    }

    #[test]
    fn test_server_record_strips_client_fields() {
        let record = RecordEnvelope::new_pending("u1", json!({"entry_date": "2024-01-01"}));
        let wire = serde_json::to_value(record.to_server_record()).unwrap();
        assert!(wire.get("sync_status").is_none());
        assert!(wire.get("last_modified").is_none());
        assert_eq!(wire["owner_id"], "u1");
    }

    #[test]
    fn test_entry_fields_round_trip() {
        let fields = EntryFields {
            entry_date: "2024-01-01".to_string(),
            quran_study: 30,
            ..Default::default()
        };
        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(value["quran_study"], 30);
        let back: EntryFields = serde_json::from_value(value).unwrap();
        assert_eq!(back, fields);
    }

    #[test]
    fn test_date_range() {
        let range = DateRange::new("2024-01-01", "2024-01-31");
        assert!(range.contains("2024-01-01"));
        assert!(range.contains("2024-01-31"));
        assert!(!range.contains("2024-02-01"));
    }
}
