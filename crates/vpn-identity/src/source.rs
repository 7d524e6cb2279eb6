//! The directory source interface and its offline implementations

use crate::error::{DirectoryError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use vpn_types::{DirectoryUser, DomainFilter};

/// Produces the current list of directory users.
///
/// Implementations handle paging and domain filtering themselves; callers
/// see one finite snapshot per call. Any failure aborts the whole fetch.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn fetch_users(&self) -> Result<Vec<DirectoryUser>>;
}

/// Keep only users admitted by `filter`, logging per-domain counts.
pub fn apply_domain_filter(users: Vec<DirectoryUser>, filter: &DomainFilter) -> Vec<DirectoryUser> {
    let total = users.len();
    let mut per_domain: BTreeMap<String, usize> = BTreeMap::new();
    let kept: Vec<DirectoryUser> = users
        .into_iter()
        .filter(|u| match filter.matched_suffix(&u.principal_name) {
            Some(suffix) => {
                *per_domain.entry(suffix.to_string()).or_default() += 1;
                true
            }
            None => false,
        })
        .collect();

    for (domain, count) in &per_domain {
        tracing::debug!(domain = %domain, count, "Directory users per domain");
    }
    tracing::info!(
        fetched = total,
        kept = kept.len(),
        "Applied allowed-domain filter"
    );
    kept
}

/// In-memory directory snapshot that can be swapped or made to fail.
pub struct StaticDirectory {
    state: RwLock<std::result::Result<Vec<DirectoryUser>, String>>,
}

impl StaticDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        Self {
            state: RwLock::new(Ok(users)),
        }
    }

    pub async fn set_users(&self, users: Vec<DirectoryUser>) {
        *self.state.write().await = Ok(users);
    }

    /// Make subsequent fetches fail until users are set again.
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.state.write().await = Err(message.into());
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl DirectorySource for StaticDirectory {
    async fn fetch_users(&self) -> Result<Vec<DirectoryUser>> {
        match &*self.state.read().await {
            Ok(users) => Ok(users.clone()),
            Err(message) => Err(DirectoryError::Unavailable(message.clone())),
        }
    }
}

/// Directory snapshot read from a JSON array of users on disk.
pub struct FileDirectory {
    path: PathBuf,
    filter: Option<DomainFilter>,
}

impl FileDirectory {
    pub fn new<P: AsRef<Path>>(path: P, filter: Option<DomainFilter>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            filter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DirectorySource for FileDirectory {
    async fn fetch_users(&self) -> Result<Vec<DirectoryUser>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DirectoryError::Unavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let users: Vec<DirectoryUser> = serde_json::from_str(&content)?;
        tracing::debug!(path = %self.path.display(), count = users.len(), "Loaded directory file");

        Ok(match &self.filter {
            Some(filter) => apply_domain_filter(users, filter),
            None => users,
        })
    }
}
