//! Storage interfaces for the mirror, access grants, RADIUS servers, audit
//! log and sync events.
//!
//! Outside of a sync pass only access grants, server records and the audit
//! log are written. The mirror and the grants of removed principals change
//! only through a [`SyncTransaction`], which applies all of its writes or
//! none of them.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use vpn_types::{
    AccessGrant, AuditEntry, AuditRecord, MirrorRecord, PrincipalName, RadiusServer,
    RadiusServerId, SyncCounts, SyncEvent,
};

#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Every mirrored user.
    async fn read_mirror(&self) -> Result<Vec<MirrorRecord>>;

    async fn find_user(&self, principal: &PrincipalName) -> Result<Option<MirrorRecord>>;

    /// Users whose principal or display name contains `term`, ignoring case.
    async fn search_users(&self, term: &str, limit: usize) -> Result<Vec<MirrorRecord>>;
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    /// The subset of `principals` holding at least one grant.
    async fn find_access_grants(
        &self,
        principals: &BTreeSet<PrincipalName>,
    ) -> Result<BTreeSet<PrincipalName>>;

    async fn grants_for(&self, principal: &PrincipalName) -> Result<BTreeSet<RadiusServerId>>;

    /// Every grant, ordered by principal then server.
    async fn list_grants(&self) -> Result<Vec<AccessGrant>>;

    /// Returns `false` when the grant already existed.
    async fn grant_access(&self, grant: &AccessGrant) -> Result<bool>;

    /// Returns `false` when there was nothing to revoke.
    async fn revoke_access(&self, grant: &AccessGrant) -> Result<bool>;

    /// Replace a principal's grants with exactly `servers`.
    async fn replace_grants(
        &self,
        principal: &PrincipalName,
        servers: &BTreeSet<RadiusServerId>,
    ) -> Result<()>;

    async fn delete_access_grants(&self, principals: &BTreeSet<PrincipalName>) -> Result<u64>;
}

#[async_trait]
pub trait RadiusServerStore: Send + Sync {
    /// All servers ordered by name.
    async fn list_servers(&self) -> Result<Vec<RadiusServer>>;

    async fn get_server(&self, id: RadiusServerId) -> Result<Option<RadiusServer>>;

    /// Fails with `AlreadyExists` when the name is taken.
    async fn create_server(&self, name: &str, description: Option<&str>) -> Result<RadiusServer>;

    /// Delete a server and every grant referencing it, returning the number
    /// of grants removed. Fails with `NotFound` for an unknown id.
    async fn delete_server(&self, id: RadiusServerId) -> Result<u64>;
}

/// Append-only audit log. Safe for concurrent writers.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn audit(&self, entry: AuditEntry) -> Result<()>;
}

#[async_trait]
pub trait AuditLog: AuditSink {
    /// Most recent entries first.
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}

#[async_trait]
pub trait SyncEventLog: Send + Sync {
    /// Most recent events first.
    async fn list_sync_events(&self, limit: usize) -> Result<Vec<SyncEvent>>;
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Take the exclusive sync lock shared by every process using this
    /// store. `Ok(None)` means another pass holds it.
    async fn try_lock_sync(&self) -> Result<Option<Box<dyn SyncLease>>>;

    async fn begin_sync(&self) -> Result<Box<dyn SyncTransaction>>;
}

/// A held sync lock. Dropping it also gives the lock up.
#[async_trait]
pub trait SyncLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// The atomic write set of one sync pass.
///
/// Nothing is visible to readers until [`SyncTransaction::commit`]
/// succeeds; dropping the transaction discards every staged write.
#[async_trait]
pub trait SyncTransaction: Send {
    async fn delete_access_grants(&mut self, principals: &BTreeSet<PrincipalName>) -> Result<u64>;

    /// Truncate the mirror and reinsert `records` in bounded batches.
    async fn replace_mirror(&mut self, records: &[MirrorRecord]) -> Result<()>;

    async fn insert_sync_event(&mut self, counts: &SyncCounts) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// What a reconciliation pass needs from storage.
pub trait SyncBackend: MirrorStore + AccessStore + SyncStore {}

impl<T: MirrorStore + AccessStore + SyncStore> SyncBackend for T {}

/// Everything the admin commands need from storage.
pub trait Storage:
    MirrorStore + AccessStore + RadiusServerStore + AuditLog + SyncEventLog + SyncStore
{
}

impl<T> Storage for T where
    T: MirrorStore + AccessStore + RadiusServerStore + AuditLog + SyncEventLog + SyncStore
{
}
