//! One reconciliation pass: fetch, diff, terminate sessions, mutate storage

use crate::diff::{dedup_snapshot, DirectoryDiff};
use crate::error::{Result, SyncError};
use crate::terminator::{SessionTerminator, TerminationSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use vpn_identity::DirectorySource;
use vpn_types::{MirrorRecord, PrincipalName, SyncCounts};
use vpn_users::SyncBackend;

/// Counts reported by a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total_users: usize,
    pub has_changes: bool,
    pub terminations: TerminationSummary,
}

impl SyncReport {
    fn new(counts: SyncCounts, terminations: TerminationSummary) -> Self {
        Self {
            added: counts.added,
            updated: counts.updated,
            removed: counts.deleted,
            total_users: counts.total_users,
            has_changes: counts.has_changes(),
            terminations,
        }
    }
}

/// Clears the running flag when the pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Brings the mirror in line with the directory.
///
/// A pass holds the store's sync lock from fetch through commit, so passes
/// never overlap even across processes sharing one database. A pass that
/// finds the lock taken, by this reconciler or any other, returns
/// [`SyncError::AlreadyRunning`].
pub struct Reconciler {
    directory: Arc<dyn DirectorySource>,
    store: Arc<dyn SyncBackend>,
    terminator: SessionTerminator,
    running: AtomicBool,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn DirectorySource>,
        store: Arc<dyn SyncBackend>,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            directory,
            store,
            terminator,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let lease = self
            .store
            .try_lock_sync()
            .await
            .map_err(SyncError::SyncLock)?
            .ok_or(SyncError::AlreadyRunning)?;

        let result = self.run_locked().await;
        if let Err(e) = lease.release().await {
            warn!(error = %e, "Releasing the sync lock failed");
        }
        result
    }

    async fn run_locked(&self) -> Result<SyncReport> {
        info!("Starting directory reconciliation");

        let fetched = self.directory.fetch_users().await?;
        let (directory, duplicates) = dedup_snapshot(fetched);
        if duplicates > 0 {
            warn!(duplicates, "Directory snapshot repeats principals, keeping the last occurrence");
        }
        let mirror = self.store.read_mirror().await.map_err(SyncError::MirrorRead)?;

        let diff = DirectoryDiff::compute(&directory, &mirror);
        let counts = diff.counts(directory.len());
        info!(
            added = counts.added,
            updated = counts.updated,
            removed = counts.deleted,
            total = counts.total_users,
            "Computed directory diff"
        );

        let terminations = self.terminate_removed(&diff.removed).await?;

        let records: Vec<MirrorRecord> = directory.into_iter().map(MirrorRecord::from).collect();
        if let Err(source) = self.apply(&diff.removed, &records, &counts).await {
            if terminations.terminated > 0 {
                warn!(
                    terminated = terminations.terminated,
                    "Storage mutation failed after VPN sessions were terminated; terminations stand"
                );
            }
            return Err(SyncError::StorageMutation {
                source,
                pending: counts,
                terminations,
            });
        }

        let report = SyncReport::new(counts, terminations);
        info!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            total = report.total_users,
            has_changes = report.has_changes,
            "Directory reconciliation completed"
        );
        Ok(report)
    }

    /// Terminate sessions for removed principals that still hold access.
    async fn terminate_removed(
        &self,
        removed: &BTreeSet<PrincipalName>,
    ) -> Result<TerminationSummary> {
        if removed.is_empty() {
            return Ok(TerminationSummary::default());
        }

        let with_access = self
            .store
            .find_access_grants(removed)
            .await
            .map_err(SyncError::AccessLookup)?;
        if with_access.is_empty() {
            return Ok(TerminationSummary::default());
        }

        info!(
            removed = removed.len(),
            with_access = with_access.len(),
            "Removed users hold VPN access"
        );
        Ok(self.terminator.terminate_sessions(&with_access).await)
    }

    async fn apply(
        &self,
        removed: &BTreeSet<PrincipalName>,
        records: &[MirrorRecord],
        counts: &SyncCounts,
    ) -> vpn_users::Result<()> {
        let mut tx = self.store.begin_sync().await?;
        if !removed.is_empty() {
            let revoked = tx.delete_access_grants(removed).await?;
            info!(revoked, "Revoked access grants of removed users");
        }
        tx.replace_mirror(records).await?;
        if counts.has_changes() {
            tx.insert_sync_event(counts).await?;
        }
        tx.commit().await
    }
}
