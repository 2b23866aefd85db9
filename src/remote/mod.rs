//! Remote Store
//!
//! The authoritative backend, consumed as an abstract per-table CRUD
//! capability. The engine only ever talks to this trait; tests substitute
//! an in-memory implementation, production uses [`HttpRemote`].

mod http;

pub use http::HttpRemote;

use crate::protocol::{ServerRecord, SyncError, Table};
use async_trait::async_trait;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert a record by the table's conflict key and return the stored
    /// copy with the server-assigned `updated_at`. Pushing the same record
    /// twice must not create duplicates; the engine relies on this for
    /// safe retries.
    async fn push(&self, table: Table, record: &ServerRecord) -> Result<ServerRecord, SyncError>;

    /// Fetch every record owned by `owner_id`.
    async fn pull(&self, table: Table, owner_id: &str) -> Result<Vec<ServerRecord>, SyncError>;

    /// Delete by id. Removing an id that does not exist succeeds.
    async fn remove(&self, table: Table, id: &str) -> Result<(), SyncError>;
}
