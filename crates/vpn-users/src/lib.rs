//! Storage for the VPN access mirror, grants, RADIUS servers, audit log and
//! sync events, plus the administrative [`AccessManager`].

pub mod batch;
pub mod error;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod store;

#[cfg(test)]
pub mod proptest;

pub use batch::{mirror_batches, MIRROR_BATCH_SIZE};
pub use error::{Result, StoreError};
pub use manager::{AccessChange, AccessManager};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use store::{
    AccessStore, AuditLog, AuditSink, MirrorStore, RadiusServerStore, Storage, SyncBackend,
    SyncEventLog, SyncLease, SyncStore, SyncTransaction,
};
