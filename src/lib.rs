//! DayLog Sync Client
//!
//! Offline-first synchronization engine for the DayLog activity tracker:
//! a local SQLite cache, a durable pending-change queue, push/pull
//! reconciliation with last-writer-wins conflict resolution, and a data
//! service façade that keeps reads and writes working with or without
//! connectivity.
//!
//! # Example
//!
//! ```rust,no_run
//! use daylog_sync::{DataServiceBuilder, EntryFields, Table};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), daylog_sync::SyncError> {
//!     let service = DataServiceBuilder::new("user-1")
//!         .base_url("https://api.daylog.example")
//!         .auth_token("token")
//!         .build()
//!         .await?;
//!
//!     // Works offline: committed locally, pushed when connectivity allows.
//!     let entry = service
//!         .save_entry(
//!             "user-1",
//!             EntryFields {
//!                 entry_date: "2024-01-01".to_string(),
//!                 quran_study: 30,
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!
//!     let fetched = service.get(Table::Entries, &entry.id).await?;
//!     println!("cached entry: {:?}", fetched);
//!     Ok(())
//! }
//! ```

pub mod protocol;
pub mod remote;
pub mod service;
pub mod sync;

pub use protocol::{
    DateRange, EntryFields, GoalFields, ProfileFields, QueueAction, QueueItem, RecordEnvelope,
    ServerRecord, StatusSnapshot, SyncError, SyncErrorEntry, SyncResult, SyncStatus, Table,
    TableCounts, TargetPeriod,
};
pub use remote::{HttpRemote, RemoteStore};
pub use service::{DataService, DataServiceBuilder};
pub use sync::{CycleKind, LocalStore, NetworkMonitor, SyncCommand, SyncConfig, SyncEngine};
