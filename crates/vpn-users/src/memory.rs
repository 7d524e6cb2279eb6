//! In-process storage backend

use crate::batch::{mirror_batches, MIRROR_BATCH_SIZE};
use crate::error::{Result, StoreError};
use crate::store::{
    AccessStore, AuditLog, AuditSink, MirrorStore, RadiusServerStore, SyncEventLog, SyncLease,
    SyncStore, SyncTransaction,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use vpn_types::{
    AccessGrant, AuditEntry, AuditRecord, MirrorRecord, PrincipalName, RadiusServer,
    RadiusServerId, SyncCounts, SyncEvent,
};

#[derive(Default)]
struct State {
    mirror: BTreeMap<PrincipalName, MirrorRecord>,
    grants: BTreeSet<(PrincipalName, RadiusServerId)>,
    servers: BTreeMap<RadiusServerId, RadiusServer>,
    next_server_id: i64,
    audit: Vec<AuditRecord>,
    sync_events: Vec<SyncEvent>,
}

impl State {
    fn remove_grants_of(&mut self, principals: &BTreeSet<PrincipalName>) -> u64 {
        let before = self.grants.len();
        self.grants.retain(|(p, _)| !principals.contains(p));
        (before - self.grants.len()) as u64
    }
}

/// Storage kept in memory behind one lock.
///
/// In read-only mode every write except audit appends fails with
/// [`StoreError::ReadOnlyMode`], including sync commits. Clones share state
/// and the sync lock.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    sync_lock: Arc<Mutex<()>>,
    read_only: Arc<AtomicBool>,
    batch_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            sync_lock: Arc::new(Mutex::new(())),
            read_only: Arc::new(AtomicBool::new(false)),
            batch_size: MIRROR_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnlyMode);
        }
        Ok(())
    }

    /// Seed the mirror directly, bypassing sync bookkeeping.
    pub async fn seed_mirror(&self, records: impl IntoIterator<Item = MirrorRecord>) {
        let mut state = self.state.write().await;
        for record in records {
            state.mirror.insert(record.principal_name.clone(), record);
        }
    }
}

#[async_trait]
impl MirrorStore for InMemoryStore {
    async fn read_mirror(&self) -> Result<Vec<MirrorRecord>> {
        Ok(self.state.read().await.mirror.values().cloned().collect())
    }

    async fn find_user(&self, principal: &PrincipalName) -> Result<Option<MirrorRecord>> {
        Ok(self.state.read().await.mirror.get(principal).cloned())
    }

    async fn search_users(&self, term: &str, limit: usize) -> Result<Vec<MirrorRecord>> {
        let term = term.to_lowercase();
        let state = self.state.read().await;
        let mut found: Vec<&MirrorRecord> = state
            .mirror
            .values()
            .filter(|r| {
                r.principal_name.as_str().to_lowercase().contains(&term)
                    || r.display_name.to_lowercase().contains(&term)
            })
            .collect();
        found.sort_by(|a, b| {
            (&a.display_name, &a.principal_name).cmp(&(&b.display_name, &b.principal_name))
        });
        Ok(found.into_iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl AccessStore for InMemoryStore {
    async fn find_access_grants(
        &self,
        principals: &BTreeSet<PrincipalName>,
    ) -> Result<BTreeSet<PrincipalName>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .iter()
            .filter(|(p, _)| principals.contains(p))
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn grants_for(&self, principal: &PrincipalName) -> Result<BTreeSet<RadiusServerId>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .iter()
            .filter(|(p, _)| p == principal)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn list_grants(&self) -> Result<Vec<AccessGrant>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .iter()
            .map(|(p, id)| AccessGrant {
                principal_name: p.clone(),
                radius_server_id: *id,
            })
            .collect())
    }

    async fn grant_access(&self, grant: &AccessGrant) -> Result<bool> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        if !state.servers.contains_key(&grant.radius_server_id) {
            return Err(StoreError::not_found("radius server", grant.radius_server_id));
        }
        Ok(state
            .grants
            .insert((grant.principal_name.clone(), grant.radius_server_id)))
    }

    async fn revoke_access(&self, grant: &AccessGrant) -> Result<bool> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        Ok(state
            .grants
            .remove(&(grant.principal_name.clone(), grant.radius_server_id)))
    }

    async fn replace_grants(
        &self,
        principal: &PrincipalName,
        servers: &BTreeSet<RadiusServerId>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        if let Some(missing) = servers.iter().find(|id| !state.servers.contains_key(id)) {
            return Err(StoreError::not_found("radius server", missing));
        }
        state.grants.retain(|(p, _)| p != principal);
        for id in servers {
            state.grants.insert((principal.clone(), *id));
        }
        Ok(())
    }

    async fn delete_access_grants(&self, principals: &BTreeSet<PrincipalName>) -> Result<u64> {
        self.ensure_writable()?;
        Ok(self.state.write().await.remove_grants_of(principals))
    }
}

#[async_trait]
impl RadiusServerStore for InMemoryStore {
    async fn list_servers(&self) -> Result<Vec<RadiusServer>> {
        let mut servers: Vec<RadiusServer> =
            self.state.read().await.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn get_server(&self, id: RadiusServerId) -> Result<Option<RadiusServer>> {
        Ok(self.state.read().await.servers.get(&id).cloned())
    }

    async fn create_server(&self, name: &str, description: Option<&str>) -> Result<RadiusServer> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        if state.servers.values().any(|s| s.name == name) {
            return Err(StoreError::AlreadyExists(format!("radius server '{}'", name)));
        }
        state.next_server_id += 1;
        let server = RadiusServer {
            id: RadiusServerId(state.next_server_id),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        state.servers.insert(server.id, server.clone());
        Ok(server)
    }

    async fn delete_server(&self, id: RadiusServerId) -> Result<u64> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        if state.servers.remove(&id).is_none() {
            return Err(StoreError::not_found("radius server", id));
        }
        let before = state.grants.len();
        state.grants.retain(|(_, server)| *server != id);
        Ok((before - state.grants.len()) as u64)
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn audit(&self, entry: AuditEntry) -> Result<()> {
        let mut state = self.state.write().await;
        let id = state.audit.len() as i64 + 1;
        state.audit.push(AuditRecord {
            id,
            timestamp: Utc::now(),
            entry,
        });
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let state = self.state.read().await;
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SyncEventLog for InMemoryStore {
    async fn list_sync_events(&self, limit: usize) -> Result<Vec<SyncEvent>> {
        let state = self.state.read().await;
        Ok(state.sync_events.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SyncStore for InMemoryStore {
    async fn try_lock_sync(&self) -> Result<Option<Box<dyn SyncLease>>> {
        Ok(self
            .sync_lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| Box::new(InMemoryLease(guard)) as Box<dyn SyncLease>))
    }

    async fn begin_sync(&self) -> Result<Box<dyn SyncTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

struct InMemoryLease(OwnedMutexGuard<()>);

#[async_trait]
impl SyncLease for InMemoryLease {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

enum Staged {
    DeleteGrants(BTreeSet<PrincipalName>),
    TruncateMirror,
    InsertMirror(Vec<MirrorRecord>),
    InsertSyncEvent(SyncCounts),
}

/// Writes are staged and applied under a single write lock on commit.
struct InMemoryTransaction {
    store: InMemoryStore,
    staged: Vec<Staged>,
}

#[async_trait]
impl SyncTransaction for InMemoryTransaction {
    async fn delete_access_grants(&mut self, principals: &BTreeSet<PrincipalName>) -> Result<u64> {
        let state = self.store.state.read().await;
        let affected = state
            .grants
            .iter()
            .filter(|(p, _)| principals.contains(p))
            .count();
        self.staged.push(Staged::DeleteGrants(principals.clone()));
        Ok(affected as u64)
    }

    async fn replace_mirror(&mut self, records: &[MirrorRecord]) -> Result<()> {
        self.staged.push(Staged::TruncateMirror);
        for batch in mirror_batches(records, self.store.batch_size) {
            self.staged.push(Staged::InsertMirror(batch.to_vec()));
        }
        Ok(())
    }

    async fn insert_sync_event(&mut self, counts: &SyncCounts) -> Result<()> {
        self.staged.push(Staged::InsertSyncEvent(*counts));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.store.ensure_writable()?;
        let mut state = self.store.state.write().await;

        let mut mirror = state.mirror.clone();
        let mut grants = state.grants.clone();
        let mut events = Vec::new();
        for op in self.staged {
            match op {
                Staged::DeleteGrants(principals) => {
                    grants.retain(|(p, _)| !principals.contains(p));
                }
                Staged::TruncateMirror => mirror.clear(),
                Staged::InsertMirror(batch) => {
                    for record in batch {
                        if mirror.contains_key(&record.principal_name) {
                            return Err(StoreError::AlreadyExists(format!(
                                "mirror record '{}'",
                                record.principal_name
                            )));
                        }
                        mirror.insert(record.principal_name.clone(), record);
                    }
                }
                Staged::InsertSyncEvent(counts) => events.push(counts),
            }
        }

        state.mirror = mirror;
        state.grants = grants;
        for counts in events {
            let id = state.sync_events.len() as i64 + 1;
            state.sync_events.push(SyncEvent {
                id,
                timestamp: Utc::now(),
                counts,
            });
        }
        Ok(())
    }
}
