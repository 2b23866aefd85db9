//! Offline Sync Module
//!
//! Offline-first synchronization between the local SQLite cache and the
//! remote store.
//!
//! # Features
//! - Durable local storage with a pending-change queue
//! - Automatic sync on connectivity transitions and a periodic timer
//! - Last-writer-wins conflict resolution, server-authoritative
//! - Per-record error accumulation; one bad record never aborts a cycle

pub mod engine;
pub mod network;
pub mod store;

pub use engine::{CycleKind, SyncCommand, SyncConfig, SyncEngine};
pub use network::NetworkMonitor;
pub use store::LocalStore;
