use crate::error::{Result, StoreError};
use crate::store::Storage;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use vpn_types::{
    actions, AccessGrant, AuditActor, AuditEntry, AuditRecord, MirrorRecord, PrincipalAccess,
    PrincipalName, RadiusServer, RadiusServerId, RadiusServerNameValidator, SyncEvent,
};

/// Outcome of replacing a principal's server set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessChange {
    pub granted: Vec<RadiusServer>,
    pub revoked: Vec<RadiusServer>,
}

impl AccessChange {
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.revoked.is_empty()
    }

    /// Audit action describing this change.
    pub fn action(&self) -> &'static str {
        match (self.granted.is_empty(), self.revoked.is_empty()) {
            (false, false) => actions::UPDATE_VPN_ACCESS,
            (false, true) => actions::GRANT_VPN_ACCESS,
            (true, false) => actions::REVOKE_VPN_ACCESS,
            (true, true) => actions::NO_CHANGE_VPN_ACCESS,
        }
    }
}

fn names(servers: &[RadiusServer]) -> String {
    servers
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Administrative operations on access grants and RADIUS server records.
///
/// Every successful write is recorded in the audit log under the manager's
/// actor.
pub struct AccessManager {
    store: Arc<dyn Storage>,
    actor: AuditActor,
}

impl AccessManager {
    pub fn new(store: Arc<dyn Storage>, actor: AuditActor) -> Self {
        Self { store, actor }
    }

    pub fn actor(&self) -> &AuditActor {
        &self.actor
    }

    async fn record(&self, action: &str, details: String) -> Result<()> {
        self.store
            .audit(AuditEntry::new(self.actor.clone(), action, details))
            .await
    }

    async fn require_user(&self, principal: &PrincipalName) -> Result<MirrorRecord> {
        self.store
            .find_user(principal)
            .await?
            .ok_or_else(|| StoreError::not_found("user", principal))
    }

    async fn require_server(&self, id: RadiusServerId) -> Result<RadiusServer> {
        self.store
            .get_server(id)
            .await?
            .ok_or_else(|| StoreError::not_found("radius server", id))
    }

    pub async fn grant(&self, principal: &PrincipalName, server: RadiusServerId) -> Result<bool> {
        self.require_user(principal).await?;
        let server = self.require_server(server).await?;

        let inserted = self
            .store
            .grant_access(&AccessGrant {
                principal_name: principal.clone(),
                radius_server_id: server.id,
            })
            .await?;

        if inserted {
            tracing::info!(principal = %principal, server = %server.name, "Granted VPN access");
            self.record(
                actions::GRANT_VPN_ACCESS,
                format!("Granted access to {} for {}", server.name, principal),
            )
            .await?;
        }
        Ok(inserted)
    }

    pub async fn revoke(&self, principal: &PrincipalName, server: RadiusServerId) -> Result<bool> {
        let server = self.require_server(server).await?;
        let removed = self
            .store
            .revoke_access(&AccessGrant {
                principal_name: principal.clone(),
                radius_server_id: server.id,
            })
            .await?;

        if removed {
            tracing::info!(principal = %principal, server = %server.name, "Revoked VPN access");
            self.record(
                actions::REVOKE_VPN_ACCESS,
                format!("Revoked access to {} for {}", server.name, principal),
            )
            .await?;
        }
        Ok(removed)
    }

    /// Replace the set of servers `principal` may use.
    pub async fn set_access(
        &self,
        principal: &PrincipalName,
        servers: &BTreeSet<RadiusServerId>,
    ) -> Result<AccessChange> {
        self.require_user(principal).await?;

        let known: BTreeMap<RadiusServerId, RadiusServer> = self
            .store
            .list_servers()
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        if let Some(missing) = servers.iter().find(|id| !known.contains_key(id)) {
            return Err(StoreError::not_found("radius server", missing));
        }

        let current = self.store.grants_for(principal).await?;
        let pick = |ids: Vec<&RadiusServerId>| -> Vec<RadiusServer> {
            ids.into_iter()
                .filter_map(|id| known.get(id).cloned())
                .collect()
        };
        let change = AccessChange {
            granted: pick(servers.difference(&current).collect()),
            revoked: pick(current.difference(servers).collect()),
        };

        if !change.is_empty() {
            self.store.replace_grants(principal, servers).await?;
        }

        let details = match change.action() {
            actions::UPDATE_VPN_ACCESS => format!(
                "Updated access for {}: granted {}; revoked {}",
                principal,
                names(&change.granted),
                names(&change.revoked)
            ),
            actions::GRANT_VPN_ACCESS => format!(
                "Granted access to {} for {}",
                names(&change.granted),
                principal
            ),
            actions::REVOKE_VPN_ACCESS => format!(
                "Revoked access to {} for {}",
                names(&change.revoked),
                principal
            ),
            _ => format!("No access changes for {}", principal),
        };
        self.record(change.action(), details).await?;

        Ok(change)
    }

    /// Servers `principal` is currently granted, ordered by name.
    pub async fn access_for(&self, principal: &PrincipalName) -> Result<Vec<RadiusServer>> {
        let ids = self.store.grants_for(principal).await?;
        Ok(self
            .store
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| ids.contains(&s.id))
            .collect())
    }

    /// Mirrored principals holding at least one grant, ordered by display name.
    ///
    /// Grants whose principal is not in the mirror are left out.
    pub async fn users_with_access(&self) -> Result<Vec<PrincipalAccess>> {
        let servers: BTreeMap<RadiusServerId, RadiusServer> = self
            .store
            .list_servers()
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut by_principal: BTreeMap<PrincipalName, Vec<RadiusServer>> = BTreeMap::new();
        for grant in self.store.list_grants().await? {
            if let Some(server) = servers.get(&grant.radius_server_id) {
                by_principal
                    .entry(grant.principal_name)
                    .or_default()
                    .push(server.clone());
            }
        }

        let mirror: BTreeMap<PrincipalName, MirrorRecord> = self
            .store
            .read_mirror()
            .await?
            .into_iter()
            .map(|r| (r.principal_name.clone(), r))
            .collect();

        let mut users: Vec<PrincipalAccess> = by_principal
            .into_iter()
            .filter_map(|(principal, mut servers)| {
                let record = mirror.get(&principal)?;
                servers.sort_by(|a, b| a.name.cmp(&b.name));
                Some(PrincipalAccess {
                    principal_name: principal,
                    display_name: record.display_name.clone(),
                    servers,
                })
            })
            .collect();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.principal_name.cmp(&b.principal_name))
        });
        Ok(users)
    }

    pub async fn search_users(&self, term: &str, limit: usize) -> Result<Vec<MirrorRecord>> {
        self.store.search_users(term, limit).await
    }

    pub async fn list_servers(&self) -> Result<Vec<RadiusServer>> {
        self.store.list_servers().await
    }

    pub async fn create_server(&self, name: &str, description: Option<&str>) -> Result<RadiusServer> {
        let name = RadiusServerNameValidator::validate(name)
            .map_err(|e| StoreError::validation("name", e))?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        let server = self.store.create_server(&name, description).await?;
        tracing::info!(id = %server.id, name = %server.name, "Created RADIUS server");
        self.record(
            actions::CREATE_RADIUS_SERVER,
            format!("Created RADIUS server {} (id {})", server.name, server.id),
        )
        .await?;
        Ok(server)
    }

    /// Delete a server together with every grant that references it.
    pub async fn delete_server(&self, id: RadiusServerId) -> Result<RadiusServer> {
        let server = self.require_server(id).await?;
        let grants = self.store.delete_server(id).await?;
        tracing::info!(id = %id, name = %server.name, grants, "Deleted RADIUS server");
        self.record(
            actions::DELETE_RADIUS_SERVER,
            format!(
                "Deleted RADIUS server {} (id {}) and {} access grants",
                server.name, id, grants
            ),
        )
        .await?;
        Ok(server)
    }

    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.store.list_audit(limit).await
    }

    pub async fn recent_sync_events(&self, limit: usize) -> Result<Vec<SyncEvent>> {
        self.store.list_sync_events(limit).await
    }
}
