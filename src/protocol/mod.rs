//! Shared types of the sync client: the error enum, the record envelope
//! and its wire shape, the queue item, and sync result/status reporting.

mod error;
mod types;

pub use error::SyncError;
pub use types::{
    now_ms, now_rfc3339, server_ms, DateRange, EntryFields, GoalFields, ProfileFields, QueueAction,
    QueueItem, RecordEnvelope, ServerRecord, StatusSnapshot, SyncErrorEntry, SyncResult,
    SyncStatus, Table, TableCounts, TargetPeriod,
};
